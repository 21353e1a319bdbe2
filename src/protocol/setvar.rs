//! Range checking and application of settable variables.

use std::time::Duration;
use tracing::{debug, info};

use super::descriptor::{Flags, SetVarRule, VariableDescriptor};
use super::dispatch::{CommandDispatcher, CommandRequest};
use super::state::DeviceState;
use super::table::DescriptorTable;
use super::transport::Transport;
use crate::error::{UpsResult, ValidationError};

/// Validates and applies setvar requests for one table.
#[derive(Debug, Clone)]
pub struct SetVarValidator<'t> {
    table: &'t DescriptorTable,
    dispatcher: CommandDispatcher<'t>,
}

impl<'t> SetVarValidator<'t> {
    /// Validator for `table`; device-backed setvars wait at most `timeout`.
    pub fn new(table: &'t DescriptorTable, timeout: Duration) -> Self {
        Self {
            table,
            dispatcher: CommandDispatcher::new(table, timeout),
        }
    }

    /// Checks `value` for `name` and returns the quantized value to apply.
    pub fn validate(&self, name: &str, value: f64) -> Result<f64, ValidationError> {
        let (descriptor, rule) = self.lookup(name)?;
        if !descriptor.rw {
            return Err(ValidationError::ReadOnly(name.to_string()));
        }
        if !value.is_finite() {
            return Err(ValidationError::InvalidArgument {
                name: name.to_string(),
                reason: format!("{value} is not a number"),
            });
        }
        if descriptor.has(Flags::RANGE) && !rule.contains(value) {
            return Err(ValidationError::OutOfRange {
                name: name.to_string(),
                value,
                min: rule.min,
                max: rule.max,
            });
        }
        Ok(rule.quantize(value))
    }

    /// Validates `value` and applies it.
    ///
    /// Variables with a query template are written to the device and stored
    /// only once acknowledged. Absent variables are stored directly. Returns
    /// the value actually stored.
    pub async fn set<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        state: &mut DeviceState,
        name: &str,
        value: f64,
    ) -> UpsResult<f64> {
        let applied = self.validate(name, value)?;
        let (descriptor, _) = self.lookup(name)?;

        if let Some(template) = &descriptor.query {
            let command = template
                .render(&template.args_from_value(applied))
                .map_err(|reason| ValidationError::InvalidArgument {
                    name: name.to_string(),
                    reason,
                })?;
            let request = CommandRequest {
                name: name.to_string(),
                args: template.args_from_value(applied),
                command,
            };
            self.dispatcher
                .dispatch(&mut *transport, descriptor, &request)
                .await?;
        }

        if applied != value {
            debug!(variable = name, requested = value, applied, "value quantized");
        }
        state.store_setvar(name, applied);
        info!(variable = name, value = applied, "variable set");
        Ok(applied)
    }

    fn lookup(&self, name: &str) -> Result<(&'t VariableDescriptor, &'t SetVarRule), ValidationError> {
        let table: &'t DescriptorTable = self.table;
        let descriptor = table
            .descriptors()
            .iter()
            .filter(|d| d.name == name)
            .find(|d| d.has(Flags::SETVAR) || !d.has(Flags::CMD));
        match descriptor {
            Some(d) if d.has(Flags::SETVAR) => match d.setvar_rule() {
                Some(rule) => Ok((d, rule)),
                None => Err(ValidationError::UnknownVariable(name.to_string())),
            },
            Some(_) => Err(ValidationError::ReadOnly(name.to_string())),
            None => Err(ValidationError::UnknownVariable(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{TransportError, UpsError};
    use async_trait::async_trait;

    const PROFILE: &str = r#"
metadata: { id: sv, name: Sv, version: "1" }
descriptors:
  - { name: input.voltage, query: "Q1\r", length: 47, marker: "(", from: 1, to: 5, format: "%.1f" }
  - name: ups.delay.shutdown
    rw: true
    flags: [absent, setvar, range]
    processor: { kind: set_var, default: 30, min: 12, max: 600, step: 60, fine_step: { below: 60, step: 6 } }
  - name: ups.delay.start
    rw: true
    flags: [absent, setvar, range]
    processor: { kind: set_var, default: 180, min: 0, max: 599940, step: 60 }
  - name: battery.charge.low
    rw: true
    query: "BL%d\r"
    length: 5
    marker: "("
    from: 1
    to: 3
    flags: [setvar, range]
    processor: { kind: set_var, default: 20, min: 10, max: 90 }
"#;

    #[derive(Default)]
    struct Recorder {
        sent: Vec<Vec<u8>>,
        reply: Vec<u8>,
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
            self.sent.push(request.to_vec());
            Ok(self.reply.clone())
        }
    }

    fn table() -> DescriptorTable {
        DescriptorTable::from_yaml(PROFILE).unwrap()
    }

    #[test]
    fn test_validate_bounds() {
        let table = table();
        let validator = SetVarValidator::new(&table, Duration::from_secs(1));
        assert_eq!(validator.validate("ups.delay.start", 0.0), Ok(0.0));
        assert_eq!(validator.validate("ups.delay.start", 599_940.0), Ok(599_940.0));
        assert!(matches!(
            validator.validate("ups.delay.start", 600_000.0),
            Err(ValidationError::OutOfRange { .. })
        ));
        assert!(matches!(
            validator.validate("ups.delay.shutdown", 11.0),
            Err(ValidationError::OutOfRange { .. })
        ));
        assert_eq!(validator.validate("ups.delay.shutdown", 45.0), Ok(42.0));
    }

    #[test]
    fn test_unknown_and_read_only() {
        let table = table();
        let validator = SetVarValidator::new(&table, Duration::from_secs(1));
        assert_eq!(
            validator.validate("ups.delay.reboot", 10.0),
            Err(ValidationError::UnknownVariable("ups.delay.reboot".into()))
        );
        assert_eq!(
            validator.validate("input.voltage", 10.0),
            Err(ValidationError::ReadOnly("input.voltage".into()))
        );
    }

    #[tokio::test]
    async fn test_absent_variable_is_stored_without_traffic() {
        let table = table();
        let mut state = DeviceState::new(&table);
        let mut transport = Recorder::default();
        let validator = SetVarValidator::new(&table, Duration::from_secs(1));

        let applied = validator
            .set(&mut transport, &mut state, "ups.delay.start", 330.0)
            .await
            .unwrap();
        assert_eq!(applied, 300.0);
        assert_eq!(state.setvar("ups.delay.start"), Some(300.0));
        assert!(transport.sent.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_sends_nothing() {
        let table = table();
        let mut state = DeviceState::new(&table);
        let mut transport = Recorder::default();
        let validator = SetVarValidator::new(&table, Duration::from_secs(1));

        let err = validator
            .set(&mut transport, &mut state, "battery.charge.low", 95.0)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UpsError::Validation(ValidationError::OutOfRange { .. })
        ));
        assert!(transport.sent.is_empty());
        assert_eq!(state.setvar("battery.charge.low"), Some(20.0));
    }

    #[tokio::test]
    async fn test_device_variable_stored_only_when_acknowledged() {
        let table = table();
        let mut state = DeviceState::new(&table);
        let validator = SetVarValidator::new(&table, Duration::from_secs(1));

        let mut nak = Recorder {
            reply: b"(NAK\r".to_vec(),
            ..Default::default()
        };
        assert!(validator
            .set(&mut nak, &mut state, "battery.charge.low", 30.0)
            .await
            .is_err());
        assert_eq!(nak.sent, vec![b"BL30\r".to_vec()]);
        assert_eq!(state.setvar("battery.charge.low"), Some(20.0));

        let mut ack = Recorder {
            reply: b"(ACK\r".to_vec(),
            ..Default::default()
        };
        validator
            .set(&mut ack, &mut state, "battery.charge.low", 30.0)
            .await
            .unwrap();
        assert_eq!(state.setvar("battery.charge.low"), Some(30.0));
    }
}
