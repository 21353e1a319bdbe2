//! Poll cycle engine.
//!
//! A cycle walks the table in order, sends every distinct query once, and
//! decodes each field of the reply. Field failures are recorded and the cycle
//! carries on; only a lost transport ends it early.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::descriptor::{Flags, VariableDescriptor};
use super::format::Value;
use super::parser;
use super::state::DeviceState;
use super::status::StatusAggregator;
use super::table::DescriptorTable;
use super::transport::{exchange_with_timeout, Transport};
use crate::error::{ProtocolError, TransportError, UpsResult};

/// Which descriptors a cycle refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollMode {
    /// Every polled descriptor plus setvar values.
    #[default]
    Full,
    /// Only descriptors flagged QUICK_POLL.
    Quick,
}

/// Why a single field produced no value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// The reply did not match the descriptor.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The query got no usable reply.
    #[error("no reply: {0}")]
    NoReply(String),
}

/// A field that failed during a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFailure {
    /// Descriptor name.
    pub name: String,
    /// Query the field belongs to.
    pub query: String,
    /// First byte of the field.
    pub from: usize,
    /// Last byte of the field.
    pub to: usize,
    /// What went wrong.
    pub error: FieldError,
}

impl FieldFailure {
    fn new(descriptor: &VariableDescriptor, error: FieldError) -> Self {
        Self {
            name: descriptor.name.clone(),
            query: descriptor
                .query
                .as_ref()
                .map(|q| q.as_str().to_string())
                .unwrap_or_default(),
            from: descriptor.from,
            to: descriptor.to,
            error,
        }
    }
}

/// Result of one poll cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PollCycle {
    /// Fresh name/value map.
    pub values: BTreeMap<String, Value>,
    /// Fields that could not be decoded.
    #[serde(skip)]
    pub failures: Vec<FieldFailure>,
    /// Queries written to the transport.
    pub queries_sent: usize,
}

impl PollCycle {
    /// Value decoded for `name` this cycle.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Whether every selected field produced a value.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs poll cycles against one table.
#[derive(Debug, Clone)]
pub struct Poller<'t> {
    table: &'t DescriptorTable,
    timeout: Duration,
}

impl<'t> Poller<'t> {
    /// Poller for `table`, waiting at most `timeout` per query.
    pub fn new(table: &'t DescriptorTable, timeout: Duration) -> Self {
        Self { table, timeout }
    }

    /// Runs one cycle.
    ///
    /// STATIC values already in `state` are reported from the cache without
    /// touching the device; fresh ones are cached.
    pub async fn poll<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        state: &mut DeviceState,
        mode: PollMode,
    ) -> UpsResult<PollCycle> {
        let table = self.table;
        let mut cycle = PollCycle::default();
        let mut aggregator = StatusAggregator::new(table);

        let mut selected: Vec<(usize, &VariableDescriptor)> = Vec::new();
        for (index, descriptor) in table.descriptors().iter().enumerate() {
            if !descriptor.is_polled() {
                continue;
            }
            if mode == PollMode::Quick && !descriptor.has(Flags::QUICK_POLL) {
                continue;
            }
            if descriptor.has(Flags::STATIC) {
                if let Some(value) = state.cached(&descriptor.name) {
                    cycle.values.insert(descriptor.name.clone(), value.clone());
                    continue;
                }
            }
            selected.push((index, descriptor));
        }

        let mut queries: Vec<&str> = Vec::new();
        for (_, descriptor) in &selected {
            if let Some(query) = &descriptor.query {
                if !queries.contains(&query.as_str()) {
                    queries.push(query.as_str());
                }
            }
        }

        for query in queries {
            let fields = selected
                .iter()
                .filter(|(_, d)| d.query.as_ref().is_some_and(|q| q.as_str() == query));

            cycle.queries_sent += 1;
            let reply = match exchange_with_timeout(&mut *transport, query.as_bytes(), self.timeout).await
            {
                Ok(reply) => reply,
                Err(TransportError::Disconnected) => {
                    warn!(query = %query.escape_debug(), "transport disconnected, aborting cycle");
                    return Err(TransportError::Disconnected.into());
                }
                Err(e) => {
                    warn!(query = %query.escape_debug(), error = %e, "query failed");
                    for (_, descriptor) in fields {
                        cycle
                            .failures
                            .push(FieldFailure::new(descriptor, FieldError::NoReply(e.to_string())));
                    }
                    continue;
                }
            };

            for &(index, descriptor) in fields {
                let outcome = if descriptor.status_bit().is_some() {
                    aggregator.fold(index, &reply)
                } else {
                    parser::decode(descriptor, &reply).map(|value| {
                        if descriptor.has(Flags::STATIC) {
                            state.cache(&descriptor.name, value.clone());
                        }
                        cycle.values.insert(descriptor.name.clone(), value);
                    })
                };
                if let Err(e) = outcome {
                    warn!(
                        name = %descriptor.name,
                        from = descriptor.from,
                        to = descriptor.to,
                        error = %e,
                        "field failed"
                    );
                    cycle
                        .failures
                        .push(FieldFailure::new(descriptor, FieldError::Protocol(e)));
                }
            }
        }

        // Composites are published only when all of their bits were read.
        let read: BTreeSet<usize> = selected.iter().map(|&(index, _)| index).collect();
        let mut composites = aggregator.finish().into_map();
        for rule in table.aggregation_rules() {
            if !rule.bits.iter().all(|i| read.contains(i)) {
                continue;
            }
            let Some(value) = composites.remove(&rule.name) else {
                continue;
            };
            let value = Value::Text(value);
            if rule
                .bits
                .iter()
                .all(|&i| table.descriptors()[i].has(Flags::STATIC))
            {
                state.cache(&rule.name, value.clone());
            }
            cycle.values.insert(rule.name.clone(), value);
        }

        if mode == PollMode::Full {
            for descriptor in table.descriptors().iter().filter(|d| d.has(Flags::SETVAR)) {
                if let Some(value) = state.setvar(&descriptor.name) {
                    cycle.values.insert(
                        descriptor.name.clone(),
                        Value::Number { value, decimals: 0 },
                    );
                }
            }
        }

        debug!(
            mode = ?mode,
            queries = cycle.queries_sent,
            values = cycle.values.len(),
            failures = cycle.failures.len(),
            "poll cycle complete"
        );
        Ok(cycle)
    }
}
