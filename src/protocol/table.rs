//! Descriptor tables and the YAML profiles they are loaded from.
//!
//! A table is built once, validated against the descriptor invariants, and is
//! read-only afterwards. Status aggregation rules are derived at build time so
//! the engine never has to rediscover them by scanning.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use super::descriptor::{Flags, Processor, VariableDescriptor};
use super::format::Template;
use crate::error::TableError;

/// Top-level profile document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Device family identification.
    pub metadata: ProfileMetadata,

    /// Driver-wide constants.
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Descriptors in table order.
    pub descriptors: Vec<VariableDescriptor>,
}

/// Identifies the device family a profile describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileMetadata {
    /// Short identifier, e.g. `mecer`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Profile version.
    pub version: String,
    /// Free-form notes.
    #[serde(default)]
    pub description: Option<String>,
}

/// Driver-wide protocol constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Literal found in the ACK field of a command reply.
    #[serde(default = "default_ack")]
    pub ack: String,
    /// Whole reply signalling a rejected command.
    #[serde(default = "default_nak")]
    pub nak: String,
    /// Status character meaning "set".
    #[serde(default = "default_bit_set")]
    pub bit_set: char,
    /// Status character meaning "clear".
    #[serde(default = "default_bit_clear")]
    pub bit_clear: char,
    /// Line terminator every query and command template must end with.
    #[serde(default = "default_terminator")]
    pub terminator: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            ack: default_ack(),
            nak: default_nak(),
            bit_set: default_bit_set(),
            bit_clear: default_bit_clear(),
            terminator: default_terminator(),
        }
    }
}

fn default_ack() -> String {
    "ACK".to_string()
}
fn default_nak() -> String {
    "(NAK\r".to_string()
}
fn default_bit_set() -> char {
    '1'
}
fn default_bit_clear() -> char {
    '0'
}
fn default_terminator() -> String {
    "\r".to_string()
}

/// Ordered bit descriptors feeding one composite name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationRule {
    /// Composite name, e.g. `ups.status`.
    pub name: String,
    /// Descriptor indices in table order.
    pub bits: Vec<usize>,
}

/// A byte offset of one reply feeding more than one name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlap {
    /// Query whose reply holds the byte.
    pub query: String,
    /// Byte offset.
    pub offset: usize,
    /// Names fed by the byte, in table order.
    pub names: Vec<String>,
}

/// Immutable, validated descriptor table.
#[derive(Debug, Clone)]
pub struct DescriptorTable {
    metadata: ProfileMetadata,
    protocol: ProtocolConfig,
    descriptors: Vec<VariableDescriptor>,
    rules: Vec<AggregationRule>,
}

impl DescriptorTable {
    /// Validates a profile and derives its aggregation rules.
    pub fn from_profile(profile: Profile) -> Result<Self, TableError> {
        let Profile {
            metadata,
            protocol,
            descriptors,
        } = profile;

        for (index, descriptor) in descriptors.iter().enumerate() {
            validate_descriptor(index, descriptor, &protocol)?;
        }

        let mut rules: Vec<AggregationRule> = Vec::new();
        for (index, descriptor) in descriptors.iter().enumerate() {
            if descriptor.status_bit().is_none() {
                continue;
            }
            let position = match rules.iter().position(|r| r.name == descriptor.name) {
                Some(position) => position,
                None => {
                    rules.push(AggregationRule {
                        name: descriptor.name.clone(),
                        bits: Vec::new(),
                    });
                    rules.len() - 1
                }
            };
            rules[position].bits.push(index);
        }

        let table = Self {
            metadata,
            protocol,
            descriptors,
            rules,
        };

        for overlap in table.overlapping_offsets() {
            debug!(
                query = %overlap.query.escape_debug(),
                offset = overlap.offset,
                names = ?overlap.names,
                "byte offset feeds several names"
            );
        }

        Ok(table)
    }

    /// Parses and validates a YAML profile.
    pub fn from_yaml(content: &str) -> Result<Self, TableError> {
        let profile: Profile = serde_yaml::from_str(content)?;
        Self::from_profile(profile)
    }

    /// Loads a YAML profile from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read profile: {}", path.display()))?;
        let table = Self::from_yaml(&content)
            .with_context(|| format!("Invalid profile: {}", path.display()))?;
        info!(
            "Loaded profile {} ({} descriptors) from {}",
            table.metadata.name,
            table.descriptors.len(),
            path.display()
        );
        Ok(table)
    }

    /// Profile identification.
    pub fn metadata(&self) -> &ProfileMetadata {
        &self.metadata
    }

    /// Driver-wide protocol constants.
    pub fn protocol(&self) -> &ProtocolConfig {
        &self.protocol
    }

    /// All descriptors, in table order.
    pub fn descriptors(&self) -> &[VariableDescriptor] {
        &self.descriptors
    }

    /// Number of descriptors.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether the table has no descriptors.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// The instant command called `name`.
    pub fn command(&self, name: &str) -> Option<&VariableDescriptor> {
        self.descriptors
            .iter()
            .find(|d| d.name == name && d.has(Flags::CMD))
    }

    /// The settable variable called `name`.
    pub fn setvar(&self, name: &str) -> Option<&VariableDescriptor> {
        self.descriptors
            .iter()
            .find(|d| d.name == name && d.has(Flags::SETVAR))
    }

    /// Instant commands whose template renders to `command`, in table order.
    pub fn commands_matching(&self, command: &str) -> Vec<&VariableDescriptor> {
        self.descriptors
            .iter()
            .filter(|d| d.has(Flags::CMD) && d.query.as_ref().is_some_and(|q| q.matches(command)))
            .collect()
    }

    /// Status aggregation rules, ordered by first appearance.
    pub fn aggregation_rules(&self) -> &[AggregationRule] {
        &self.rules
    }

    /// Distinct query strings among polled descriptors, in first-appearance order.
    pub fn distinct_queries(&self) -> Vec<&Template> {
        let mut queries: Vec<&Template> = Vec::new();
        for descriptor in self.descriptors.iter().filter(|d| d.is_polled()) {
            if let Some(query) = &descriptor.query {
                if !queries.contains(&query) {
                    queries.push(query);
                }
            }
        }
        queries
    }

    /// Single-byte offsets that feed more than one name.
    pub fn overlapping_offsets(&self) -> Vec<Overlap> {
        let mut by_offset: BTreeMap<(String, usize), Vec<String>> = BTreeMap::new();
        for descriptor in self.descriptors.iter().filter(|d| d.is_polled()) {
            let Some(query) = &descriptor.query else {
                continue;
            };
            for offset in descriptor.bytes() {
                let names = by_offset
                    .entry((query.as_str().to_string(), offset))
                    .or_default();
                if !names.contains(&descriptor.name) {
                    names.push(descriptor.name.clone());
                }
            }
        }
        by_offset
            .into_iter()
            .filter(|(_, names)| names.len() > 1)
            .map(|((query, offset), names)| Overlap {
                query,
                offset,
                names,
            })
            .collect()
    }
}

fn validate_descriptor(
    index: usize,
    d: &VariableDescriptor,
    protocol: &ProtocolConfig,
) -> Result<(), TableError> {
    let fail = |reason: String| TableError::InvalidDescriptor {
        index,
        name: d.name.clone(),
        reason,
    };

    if d.name.is_empty() {
        return Err(fail("empty name".into()));
    }

    let absent = d.has(Flags::ABSENT);
    let setvar = d.has(Flags::SETVAR);
    let cmd = d.has(Flags::CMD);

    if cmd && setvar {
        return Err(fail("CMD and SETVAR are exclusive".into()));
    }

    match (&d.query, absent) {
        (None, false) => return Err(fail("missing query (only ABSENT descriptors may omit it)".into())),
        (Some(_), true) => return Err(fail("ABSENT descriptors must not declare a query".into())),
        _ => {}
    }
    if absent && !setvar {
        return Err(fail("ABSENT is only supported on SETVAR descriptors".into()));
    }

    if let Some(query) = &d.query {
        if !query.as_str().ends_with(protocol.terminator.as_str()) {
            return Err(fail(format!(
                "query {query} does not end with the terminator {:?}",
                protocol.terminator
            )));
        }
        if query.is_parametrized() && !(cmd || setvar) {
            return Err(fail(format!("polled query {query} must not take arguments")));
        }
        if !(d.from <= d.to && d.to < d.length) {
            return Err(fail(format!(
                "byte range {}..={} does not fit a {}-byte reply",
                d.from, d.to, d.length
            )));
        }
        match d.marker {
            Some(marker) if marker.is_ascii() => {}
            Some(marker) => return Err(fail(format!("marker {marker:?} is not ASCII"))),
            None => return Err(fail("missing marker".into())),
        }
    }

    match &d.processor {
        Processor::None => {}
        Processor::StatusBit(_) => {
            if d.from != d.to {
                return Err(fail("status bits must cover exactly one byte".into()));
            }
            if !d.is_polled() {
                return Err(fail("status bits must be polled descriptors".into()));
            }
        }
        Processor::CommandArg(_) => {
            if !cmd {
                return Err(fail("command arguments require CMD".into()));
            }
        }
        Processor::SetVar(rule) => {
            if !setvar {
                return Err(fail("setvar rules require SETVAR".into()));
            }
            if d.has(Flags::RANGE) && !(rule.min <= rule.default && rule.default <= rule.max) {
                return Err(fail(format!(
                    "default {} outside [{}..{}]",
                    rule.default, rule.min, rule.max
                )));
            }
        }
    }

    if setvar && d.setvar_rule().is_none() {
        return Err(fail("SETVAR requires a set_var processor".into()));
    }
    if d.has(Flags::RANGE) && !setvar {
        return Err(fail("RANGE requires SETVAR".into()));
    }
    if setvar && !d.rw {
        return Err(fail("SETVAR descriptors must be rw".into()));
    }

    Ok(())
}
