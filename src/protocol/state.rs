//! Caller-owned device state carried between cycles.

use std::collections::HashMap;

use super::descriptor::Flags;
use super::format::Value;
use super::table::DescriptorTable;

/// STATIC value cache and current setvar values for one device.
#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    statics: HashMap<String, Value>,
    setvars: HashMap<String, f64>,
}

impl DeviceState {
    /// Fresh state with every setvar at its declared default.
    pub fn new(table: &DescriptorTable) -> Self {
        let setvars = table
            .descriptors()
            .iter()
            .filter(|d| d.has(Flags::SETVAR))
            .filter_map(|d| d.setvar_rule().map(|rule| (d.name.clone(), rule.default)))
            .collect();
        Self {
            statics: HashMap::new(),
            setvars,
        }
    }

    /// Current value of a setvar.
    pub fn setvar(&self, name: &str) -> Option<f64> {
        self.setvars.get(name).copied()
    }

    pub(crate) fn store_setvar(&mut self, name: &str, value: f64) {
        self.setvars.insert(name.to_string(), value);
    }

    /// All setvars with their current values.
    pub fn setvars(&self) -> impl Iterator<Item = (&str, f64)> {
        self.setvars.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Cached value of a STATIC descriptor.
    pub fn cached(&self, name: &str) -> Option<&Value> {
        self.statics.get(name)
    }

    pub(crate) fn cache(&mut self, name: &str, value: Value) {
        self.statics.insert(name.to_string(), value);
    }

    /// Drops cached static values so the next full cycle re-reads them.
    pub fn invalidate_statics(&mut self) {
        self.statics.clear();
    }
}
