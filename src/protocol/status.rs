//! Folding of status bits into composite, space-separated values.
//!
//! Several descriptors may feed one name (`ups.status` collects `OL`, `OB`,
//! `LB`, ...). The grouping is precomputed by [`DescriptorTable`]; this module
//! only records which bits fired during one cycle and joins the tokens in
//! table order.

use std::collections::BTreeMap;

use tracing::trace;

use super::parser;
use super::table::DescriptorTable;
use crate::error::ProtocolError;

/// Composite values produced by one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatedStatus {
    values: BTreeMap<String, String>,
}

impl AggregatedStatus {
    /// Composite value for `name`; empty when no bit fired.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Composite names and values, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of composite names.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no composite was produced.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consumes the result into its name/value map.
    pub fn into_map(self) -> BTreeMap<String, String> {
        self.values
    }
}

/// Per-cycle accumulator of decoded status bits.
#[derive(Debug)]
pub struct StatusAggregator<'t> {
    table: &'t DescriptorTable,
    /// Per descriptor: `None` until decoded, then the token it contributes.
    bits: Vec<Option<Option<&'t str>>>,
}

impl<'t> StatusAggregator<'t> {
    /// Empty accumulator for one cycle over `table`.
    pub fn new(table: &'t DescriptorTable) -> Self {
        Self {
            table,
            bits: vec![None; table.len()],
        }
    }

    /// Decodes the bit held by descriptor `index` in `response`.
    ///
    /// Descriptors that are not status bits are ignored. A character other
    /// than the profile's set/clear encodings leaves the bit undecoded.
    pub fn fold(&mut self, index: usize, response: &[u8]) -> Result<(), ProtocolError> {
        let table: &'t DescriptorTable = self.table;
        let Some(descriptor) = table.descriptors().get(index) else {
            return Ok(());
        };
        let Some(bit) = descriptor.status_bit() else {
            return Ok(());
        };

        let field = parser::extract(descriptor, response)?;
        let protocol = table.protocol();
        let token = match field {
            [c] if char::from(*c) == protocol.bit_set => Some(bit.set.as_str()),
            [c] if char::from(*c) == protocol.bit_clear => bit.clear.as_deref(),
            _ => {
                return Err(ProtocolError::Malformed {
                    field: String::from_utf8_lossy(field).into_owned(),
                    reason: format!(
                        "status bit must be {:?} or {:?}",
                        protocol.bit_set, protocol.bit_clear
                    ),
                })
            }
        };

        trace!(name = %descriptor.name, offset = descriptor.from, ?token, "status bit");
        self.bits[index] = Some(token);
        Ok(())
    }

    /// Joins the recorded tokens per name, in table order.
    ///
    /// Names none of whose bits were decoded are left out.
    pub fn finish(self) -> AggregatedStatus {
        let mut values = BTreeMap::new();
        for rule in self.table.aggregation_rules() {
            let decoded: Vec<Option<&str>> =
                rule.bits.iter().filter_map(|&i| self.bits[i]).collect();
            if decoded.is_empty() {
                continue;
            }
            let joined = decoded.into_iter().flatten().collect::<Vec<_>>().join(" ");
            values.insert(rule.name.clone(), joined);
        }
        AggregatedStatus { values }
    }
}

/// Aggregates every status bit carried by the reply to `query`.
///
/// Returns the composite values along with the failures of individual bits,
/// keyed by descriptor index.
pub fn aggregate_response(
    table: &DescriptorTable,
    query: &str,
    response: &[u8],
) -> (AggregatedStatus, Vec<(usize, ProtocolError)>) {
    let mut aggregator = StatusAggregator::new(table);
    let mut failures = Vec::new();
    for (index, descriptor) in table.descriptors().iter().enumerate() {
        let same_query = descriptor
            .query
            .as_ref()
            .is_some_and(|q| q.as_str() == query);
        if !same_query || descriptor.status_bit().is_none() {
            continue;
        }
        if let Err(err) = aggregator.fold(index, response) {
            failures.push((index, err));
        }
    }
    (aggregator.finish(), failures)
}
