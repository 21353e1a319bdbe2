//! Declarative Q1-family protocol engine.
//!
//! A device family is described by a [`DescriptorTable`] loaded from a YAML
//! profile. The engine components interpret that table:
//!
//! - [`parser`]: validates a reply and slices one field out of it
//! - [`status`]: folds status bits into composite values
//! - [`dispatch`]: renders instant commands and checks ACK/NAK
//! - [`setvar`]: range-checks and applies settable variables
//! - [`poll`]: runs full and quick poll cycles
//!
//! All of them talk to the device through the [`Transport`] trait.

pub mod descriptor;
pub mod dispatch;
pub mod format;
pub mod parser;
pub mod poll;
pub mod setvar;
pub mod state;
pub mod status;
pub mod table;
pub mod transport;

pub use descriptor::{
    ArgSource, CommandArg, FineStep, Flag, Flags, Processor, SetVarRule, StatusBit,
    VariableDescriptor,
};
pub use dispatch::{CommandDispatcher, CommandRequest};
pub use format::{Arg, Template, Value, ValueFormat};
pub use poll::{FieldError, FieldFailure, PollCycle, PollMode, Poller};
pub use setvar::SetVarValidator;
pub use state::DeviceState;
pub use status::{aggregate_response, AggregatedStatus, StatusAggregator};
pub use table::{AggregationRule, DescriptorTable, Profile, ProfileMetadata, ProtocolConfig};
pub use transport::{exchange_with_timeout, Transport};
