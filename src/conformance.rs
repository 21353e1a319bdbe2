//! Fixture-driven conformance checks for device profiles.
//!
//! A fixture is a recorded set of query/reply exchanges with the values and
//! command outcomes they should produce. The harness replays it through a
//! deterministic [`StubTransport`], runs one full poll cycle and every command
//! exchange, and reports each divergence with the descriptor and byte range
//! responsible.

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::{CommandError, TransportError, UpsResult};
use crate::protocol::{
    CommandDispatcher, CommandRequest, DescriptorTable, DeviceState, PollMode, Poller, Transport,
    Value, VariableDescriptor,
};

/// Numeric tolerance used when comparing expected values.
pub const FLOAT_TOLERANCE: f64 = 1e-6;

// =============================================================================
// Fixture format
// =============================================================================

/// Recorded exchanges and the results they must produce.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixture {
    /// What the recording covers.
    #[serde(default)]
    pub description: Option<String>,
    /// Recorded exchanges, in order.
    pub exchanges: Vec<Exchange>,
    /// Results the exchanges must produce.
    #[serde(default)]
    pub expect: Expectations,
}

/// One query and the reply the device gave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    /// Query or command as sent, terminator included.
    pub query: String,
    /// Reply as received.
    pub reply: String,
}

/// Expected values and command outcomes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Expectations {
    /// Expected poll values by name.
    #[serde(default)]
    pub values: BTreeMap<String, ExpectedValue>,
    /// Expected outcome per command, keyed by the command as sent.
    #[serde(default)]
    pub commands: BTreeMap<String, Outcome>,
}

/// Expected value of a polled name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpectedValue {
    /// Compared within [`FLOAT_TOLERANCE`].
    Number(f64),
    /// Compared literally, or against a number's rendered form.
    Text(String),
}

impl ExpectedValue {
    fn matches(&self, actual: &Value) -> bool {
        match (self, actual) {
            (ExpectedValue::Number(expected), Value::Number { value, .. }) => {
                (expected - value).abs() <= FLOAT_TOLERANCE
            }
            (ExpectedValue::Text(expected), Value::Text(actual)) => expected == actual,
            (ExpectedValue::Text(expected), number) => *expected == number.to_string(),
            (ExpectedValue::Number(_), Value::Text(_)) => false,
        }
    }
}

impl fmt::Display for ExpectedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedValue::Number(n) => write!(f, "{n}"),
            ExpectedValue::Text(s) => write!(f, "{s:?}"),
        }
    }
}

/// Outcome of one command exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Reply matched the ACK literal.
    Ack,
    /// Reply was the NAK literal.
    Rejected,
    /// No reply, or one matching neither.
    NoResponse,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::Ack => "ack",
            Outcome::Rejected => "rejected",
            Outcome::NoResponse => "no_response",
        })
    }
}

impl Fixture {
    /// Parses a YAML fixture.
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Loads a YAML fixture from disk.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture: {}", path.display()))?;
        let fixture = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse fixture: {}", path.display()))?;
        debug!(
            "Loaded fixture {} ({} exchanges)",
            path.display(),
            fixture.exchanges.len()
        );
        Ok(fixture)
    }
}

// =============================================================================
// Stub transport
// =============================================================================

/// Deterministic transport answering from a fixed reply map.
///
/// Unknown queries time out. Every request is recorded in order.
#[derive(Debug, Clone, Default)]
pub struct StubTransport {
    replies: HashMap<Vec<u8>, Vec<u8>>,
    sent: Vec<Vec<u8>>,
    disconnected: bool,
}

impl StubTransport {
    /// Stub with no replies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stub answering every exchange of `fixture`.
    pub fn from_fixture(fixture: &Fixture) -> Self {
        let mut stub = Self::new();
        for exchange in &fixture.exchanges {
            stub.insert(&exchange.query, &exchange.reply);
        }
        stub
    }

    /// Adds or replaces the reply to `query`.
    pub fn insert(&mut self, query: &str, reply: &str) {
        self.replies
            .insert(query.as_bytes().to_vec(), reply.as_bytes().to_vec());
    }

    /// Makes every further exchange fail as disconnected.
    pub fn disconnect(&mut self) {
        self.disconnected = true;
    }

    /// Requests sent so far, in order.
    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    /// Number of requests sent so far.
    pub fn calls(&self) -> usize {
        self.sent.len()
    }

    /// How many times `query` was sent.
    pub fn count(&self, query: &str) -> usize {
        self.sent.iter().filter(|s| s.as_slice() == query.as_bytes()).count()
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        if self.disconnected {
            return Err(TransportError::Disconnected);
        }
        self.sent.push(request.to_vec());
        self.replies
            .get(request)
            .cloned()
            .ok_or(TransportError::Timeout)
    }
}

// =============================================================================
// Report
// =============================================================================

/// Outcome of one replayed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    /// Command as sent.
    pub command: String,
    /// Descriptor the command was recognised as.
    pub name: String,
    /// What the device answered.
    pub outcome: Outcome,
}

/// A divergence between the fixture and what the engine produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    /// Name (or command) that diverged.
    pub descriptor: String,
    /// Byte range of the first descriptor involved.
    pub bytes: Option<(usize, usize)>,
    /// Expected value, rendered.
    pub expected: String,
    /// Actual value, rendered; `None` when nothing was produced.
    pub actual: Option<String>,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.descriptor)?;
        if let Some((from, to)) = self.bytes {
            write!(f, " [bytes {from}..={to}]")?;
        }
        match &self.actual {
            Some(actual) => write!(f, ": expected {}, got {}", self.expected, actual),
            None => write!(f, ": expected {}, got nothing", self.expected),
        }
    }
}

/// Everything one harness run produced.
#[derive(Debug, Clone, Serialize)]
pub struct ConformanceReport {
    /// Profile display name.
    pub profile: String,
    /// Values of the poll cycle.
    pub values: BTreeMap<String, Value>,
    /// Replayed commands, in fixture order.
    pub commands: Vec<CommandOutcome>,
    /// Field failures of the poll cycle, rendered.
    pub failures: Vec<String>,
    /// Divergences from the fixture.
    pub mismatches: Vec<Mismatch>,
}

impl ConformanceReport {
    /// Whether the run matched the fixture.
    pub fn is_pass(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// Turns a report with mismatches into an error.
    pub fn into_result(self) -> Result<Self, ConformanceError> {
        if self.is_pass() {
            Ok(self)
        } else {
            Err(ConformanceError::Mismatches(Box::new(self)))
        }
    }
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Profile: {}", self.profile)?;
        for (name, value) in &self.values {
            writeln!(f, "  {name} = {value}")?;
        }
        for command in &self.commands {
            writeln!(
                f,
                "  {} ({}) -> {}",
                command.command.escape_debug(),
                command.name,
                command.outcome
            )?;
        }
        for failure in &self.failures {
            writeln!(f, "  failed: {failure}")?;
        }
        if self.mismatches.is_empty() {
            write!(f, "PASS")
        } else {
            for mismatch in &self.mismatches {
                writeln!(f, "  MISMATCH {mismatch}")?;
            }
            write!(f, "FAIL ({} mismatches)", self.mismatches.len())
        }
    }
}

/// The engine's behaviour diverged from the fixture.
#[derive(Error, Debug)]
pub enum ConformanceError {
    /// At least one mismatch; carries the full report.
    #[error("{} mismatch(es), first: {}", .0.mismatches.len(), .0.mismatches.first().map(ToString::to_string).unwrap_or_default())]
    Mismatches(Box<ConformanceReport>),
}

// =============================================================================
// Harness
// =============================================================================

/// Replays fixtures against one descriptor table.
#[derive(Debug, Clone)]
pub struct ConformanceHarness<'t> {
    table: &'t DescriptorTable,
    timeout: Duration,
}

impl<'t> ConformanceHarness<'t> {
    /// Harness for `table`, waiting at most `timeout` per exchange.
    pub fn new(table: &'t DescriptorTable, timeout: Duration) -> Self {
        Self { table, timeout }
    }

    /// Runs one full poll cycle and every command exchange of `fixture`.
    pub async fn run(&self, fixture: &Fixture) -> UpsResult<ConformanceReport> {
        let mut transport = StubTransport::from_fixture(fixture);
        let mut state = DeviceState::new(self.table);

        let cycle = Poller::new(self.table, self.timeout)
            .poll(&mut transport, &mut state, PollMode::Full)
            .await?;

        let dispatcher = CommandDispatcher::new(self.table, self.timeout);
        let mut commands = Vec::new();
        for exchange in &fixture.exchanges {
            let Some(descriptor) = self.command_for(&exchange.query) else {
                continue;
            };
            let request = CommandRequest::literal(descriptor.name.clone(), exchange.query.clone());
            let outcome = match dispatcher
                .dispatch(&mut transport, descriptor, &request)
                .await
            {
                Ok(()) => Outcome::Ack,
                Err(CommandError::Rejected { .. }) => Outcome::Rejected,
                Err(CommandError::NoResponse { .. }) => Outcome::NoResponse,
            };
            commands.push(CommandOutcome {
                command: exchange.query.clone(),
                name: descriptor.name.clone(),
                outcome,
            });
        }

        let mut mismatches = Vec::new();
        for (name, expected) in &fixture.expect.values {
            let actual = cycle.values.get(name);
            if actual.is_some_and(|actual| expected.matches(actual)) {
                continue;
            }
            mismatches.push(Mismatch {
                descriptor: name.clone(),
                bytes: self.bytes_of(name),
                expected: expected.to_string(),
                actual: actual.map(ToString::to_string),
            });
        }

        for (command, expected) in &fixture.expect.commands {
            let actual = commands.iter().find(|c| &c.command == command);
            if actual.is_some_and(|c| c.outcome == *expected) {
                continue;
            }
            let descriptor = self.command_for(command);
            mismatches.push(Mismatch {
                descriptor: descriptor
                    .map(|d| d.name.clone())
                    .unwrap_or_else(|| command.escape_debug().to_string()),
                bytes: descriptor.map(|d| (d.from, d.to)),
                expected: expected.to_string(),
                actual: actual.map(|c| c.outcome.to_string()),
            });
        }

        let failures = cycle
            .failures
            .iter()
            .map(|f| format!("{} [bytes {}..={}]: {}", f.name, f.from, f.to, f.error))
            .collect();

        info!(
            profile = %self.table.metadata().id,
            values = cycle.values.len(),
            commands = commands.len(),
            mismatches = mismatches.len(),
            "conformance run complete"
        );

        Ok(ConformanceReport {
            profile: self.table.metadata().name.clone(),
            values: cycle.values,
            commands,
            failures,
            mismatches,
        })
    }

    /// The CMD descriptor `command` was rendered from.
    ///
    /// Literal templates win over parametrized ones, then the template with
    /// the most literal text; ties go to the earlier descriptor.
    fn command_for(&self, command: &str) -> Option<&'t VariableDescriptor> {
        let table: &'t DescriptorTable = self.table;
        table
            .commands_matching(command)
            .into_iter()
            .min_by_key(|d| match &d.query {
                Some(q) => (q.is_parametrized(), Reverse(q.literal_len())),
                None => (true, Reverse(0)),
            })
    }

    fn bytes_of(&self, name: &str) -> Option<(usize, usize)> {
        self.table
            .descriptors()
            .iter()
            .find(|d| d.name == name && d.query.is_some())
            .map(|d| (d.from, d.to))
    }
}
