//! Instant command rendering, dispatch and ACK/NAK verification.
//!
//! Commands are sent at most once. A refused command is reported as
//! [`CommandError::Rejected`]; a missing, late or unrecognised reply as
//! [`CommandError::NoResponse`]. Retrying is left to the caller.

use std::time::Duration;
use tracing::{debug, info, warn};

use super::descriptor::{ArgSource, CommandArg, Processor, VariableDescriptor};
use super::format::Arg;
use super::parser;
use super::state::DeviceState;
use super::table::DescriptorTable;
use super::transport::{exchange_with_timeout, Transport};
use crate::error::{CommandError, UpsResult, ValidationError};

/// A rendered command, ready to be written to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Descriptor name the command was rendered from.
    pub name: String,
    /// Wire form, terminator included.
    pub command: String,
    /// Arguments substituted into the template.
    pub args: Vec<Arg>,
}

impl CommandRequest {
    /// A request carrying an already rendered command.
    pub fn literal(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
        }
    }
}

/// Renders and issues instant commands for one table.
#[derive(Debug, Clone)]
pub struct CommandDispatcher<'t> {
    table: &'t DescriptorTable,
    timeout: Duration,
}

impl<'t> CommandDispatcher<'t> {
    /// Dispatcher for `table`, waiting at most `timeout` per reply.
    pub fn new(table: &'t DescriptorTable, timeout: Duration) -> Self {
        Self { table, timeout }
    }

    /// Builds the request for command `name`.
    ///
    /// `value` is the caller's argument, if any (seconds for duration
    /// commands). Nothing is sent.
    pub fn prepare(
        &self,
        state: &DeviceState,
        name: &str,
        value: Option<f64>,
    ) -> Result<CommandRequest, ValidationError> {
        let descriptor = self
            .table
            .command(name)
            .ok_or_else(|| ValidationError::UnknownVariable(name.to_string()))?;
        let template = descriptor
            .query
            .as_ref()
            .ok_or_else(|| ValidationError::UnknownVariable(name.to_string()))?;

        let args = match &descriptor.processor {
            Processor::CommandArg(arg) => command_args(name, arg, state, value)?,
            _ if template.is_parametrized() => match value {
                Some(value) => template.args_from_value(value),
                None => {
                    return Err(ValidationError::InvalidArgument {
                        name: name.to_string(),
                        reason: "command requires a value".into(),
                    })
                }
            },
            _ => {
                if value.is_some() {
                    debug!(command = name, "ignoring value for plain command");
                }
                Vec::new()
            }
        };

        let command = template
            .render(&args)
            .map_err(|reason| ValidationError::InvalidArgument {
                name: name.to_string(),
                reason,
            })?;

        Ok(CommandRequest {
            name: name.to_string(),
            command,
            args,
        })
    }

    /// Prepares and dispatches command `name`.
    pub async fn execute<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        state: &DeviceState,
        name: &str,
        value: Option<f64>,
    ) -> UpsResult<()> {
        let request = self.prepare(state, name, value)?;
        let descriptor = self
            .table
            .command(name)
            .ok_or_else(|| ValidationError::UnknownVariable(name.to_string()))?;
        self.dispatch(&mut *transport, descriptor, &request).await?;
        Ok(())
    }

    /// Sends `request` once and checks the reply against `descriptor`.
    pub async fn dispatch<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        descriptor: &VariableDescriptor,
        request: &CommandRequest,
    ) -> Result<(), CommandError> {
        let protocol = self.table.protocol();
        let reply = exchange_with_timeout(&mut *transport, request.command.as_bytes(), self.timeout)
            .await
            .map_err(|e| {
                warn!(command = %request.name, error = %e, "command got no reply");
                CommandError::NoResponse {
                    command: request.command.clone(),
                    detail: e.to_string(),
                }
            })?;

        if let Ok(field) = parser::extract(descriptor, &reply) {
            if field == protocol.ack.as_bytes() {
                info!(command = %request.name, "command acknowledged");
                return Ok(());
            }
        }

        if reply == protocol.nak.as_bytes() {
            warn!(command = %request.name, "command rejected");
            return Err(CommandError::Rejected {
                command: request.command.clone(),
            });
        }

        let detail = match parser::validate(descriptor, &reply) {
            Err(e) => format!("invalid reply {:?}: {e}", String::from_utf8_lossy(&reply)),
            Ok(()) => format!("unexpected reply {:?}", String::from_utf8_lossy(&reply)),
        };
        warn!(command = %request.name, %detail, "command not acknowledged");
        Err(CommandError::NoResponse {
            command: request.command.clone(),
            detail,
        })
    }
}

fn command_args(
    name: &str,
    arg: &CommandArg,
    state: &DeviceState,
    value: Option<f64>,
) -> Result<Vec<Arg>, ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidArgument {
        name: name.to_string(),
        reason,
    };

    match arg.source {
        ArgSource::Minutes => {
            let seconds = value.ok_or_else(|| invalid("duration in seconds required".into()))?;
            // Bounds are in minutes; the request is checked in seconds.
            let min = arg.min.map_or(f64::NEG_INFINITY, |m| m as f64 * 60.0);
            let max = arg.max.map_or(f64::INFINITY, |m| m as f64 * 60.0);
            if !seconds.is_finite() || seconds < min || seconds > max {
                return Err(ValidationError::OutOfRange {
                    name: name.to_string(),
                    value: seconds,
                    min,
                    max,
                });
            }
            Ok(vec![Arg::Int((seconds / 60.0).trunc() as i64)])
        }
        ArgSource::ShutdownReturn | ArgSource::ShutdownStayOff => {
            let off = state
                .setvar(&arg.off_delay)
                .ok_or_else(|| invalid(format!("{} is not set", arg.off_delay)))?
                as i64;
            let mut token = if off < 60 {
                format!(".{}", off / 6)
            } else {
                format!("{:02}", off / 60)
            };

            if arg.source == ArgSource::ShutdownReturn {
                let on = state
                    .setvar(&arg.on_delay)
                    .ok_or_else(|| invalid(format!("{} is not set", arg.on_delay)))?
                    as i64;
                let on_minutes = on / 60;
                if on_minutes != 0 {
                    token.push_str(&format!("R{on_minutes:04}"));
                }
            }
            Ok(vec![Arg::Text(token)])
        }
    }
}
