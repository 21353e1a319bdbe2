//! Variable descriptors: one row of a device's declarative table.
//!
//! A descriptor says which query elicits a value, what the reply must look
//! like and which bytes hold the value. Post-extraction behaviour is chosen
//! from a closed set of [`Processor`] variants interpreted by the engine.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::ops::RangeInclusive;

use super::format::{Template, ValueFormat};

bitflags::bitflags! {
    /// Behaviour flags. Not mutually exclusive.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Flags: u8 {
        /// Fetched once, then served from the caller's cache.
        const STATIC = 1 << 0;
        /// Refreshed on quick cycles as well as full ones.
        const QUICK_POLL = 1 << 1;
        /// Instant command; the byte range locates the ACK literal.
        const CMD = 1 << 2;
        /// Server-settable variable.
        const SETVAR = 1 << 3;
        /// Setvar with declared bounds.
        const RANGE = 1 << 4;
        /// Strip surrounding whitespace from the extracted field.
        const TRIM = 1 << 5;
        /// No live query; the value is synthesized.
        const ABSENT = 1 << 6;
    }
}

impl Default for Flags {
    fn default() -> Self {
        Flags::empty()
    }
}

/// Profile spelling of a single flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flag {
    /// [`Flags::STATIC`]
    Static,
    /// [`Flags::QUICK_POLL`]
    QuickPoll,
    /// [`Flags::CMD`]
    Cmd,
    /// [`Flags::SETVAR`]
    Setvar,
    /// [`Flags::RANGE`]
    Range,
    /// [`Flags::TRIM`]
    Trim,
    /// [`Flags::ABSENT`]
    Absent,
}

impl Flag {
    const ALL: [Flag; 7] = [
        Flag::Static,
        Flag::QuickPoll,
        Flag::Cmd,
        Flag::Setvar,
        Flag::Range,
        Flag::Trim,
        Flag::Absent,
    ];
}

impl From<Flag> for Flags {
    fn from(flag: Flag) -> Self {
        match flag {
            Flag::Static => Flags::STATIC,
            Flag::QuickPoll => Flags::QUICK_POLL,
            Flag::Cmd => Flags::CMD,
            Flag::Setvar => Flags::SETVAR,
            Flag::Range => Flags::RANGE,
            Flag::Trim => Flags::TRIM,
            Flag::Absent => Flags::ABSENT,
        }
    }
}

impl<'de> Deserialize<'de> for Flags {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let names = Vec::<Flag>::deserialize(deserializer)?;
        Ok(names.into_iter().map(Flags::from).collect())
    }
}

impl Serialize for Flags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let names: Vec<Flag> = Flag::ALL
            .into_iter()
            .filter(|f| self.contains(Flags::from(*f)))
            .collect();
        names.serialize(serializer)
    }
}

/// Post-extraction transform applied by the engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Processor {
    /// Value used as decoded.
    #[default]
    None,
    /// One bit of a status pattern, folded into a composite value.
    StatusBit(StatusBit),
    /// Builds the arguments of a parametrized instant command.
    CommandArg(CommandArg),
    /// Bounds, default and granularity of a settable variable.
    SetVar(SetVarRule),
}

/// Tokens contributed by one status bit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusBit {
    /// Token appended when the bit is set.
    pub set: String,
    /// Token appended when the bit is clear, if any.
    #[serde(default)]
    pub clear: Option<String>,
}

/// Where a command's template arguments come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgSource {
    /// Caller supplies seconds; the template takes whole minutes.
    Minutes,
    /// Shutdown, then restart after the start delay.
    ShutdownReturn,
    /// Shutdown and stay off.
    ShutdownStayOff,
}

/// Argument construction for a parametrized instant command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandArg {
    /// Argument source.
    pub source: ArgSource,
    /// Lower bound of the converted argument.
    #[serde(default)]
    pub min: Option<i64>,
    /// Upper bound of the converted argument.
    #[serde(default)]
    pub max: Option<i64>,
    /// Setvar holding the shutdown delay, in seconds.
    #[serde(default = "default_off_delay")]
    pub off_delay: String,
    /// Setvar holding the restart delay, in seconds.
    #[serde(default = "default_on_delay")]
    pub on_delay: String,
}

fn default_off_delay() -> String {
    "ups.delay.shutdown".to_string()
}
fn default_on_delay() -> String {
    "ups.delay.start".to_string()
}

/// Finer granularity used below a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FineStep {
    /// Values strictly below this use `step`.
    pub below: u32,
    /// Granularity below the threshold.
    pub step: u32,
}

/// Default, bounds and granularity of a settable variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetVarRule {
    /// Value used until the caller sets one; must lie within the bounds.
    pub default: f64,
    /// Inclusive lower bound.
    pub min: f64,
    /// Inclusive upper bound.
    pub max: f64,
    /// Values are truncated to a multiple of this.
    #[serde(default = "default_step")]
    pub step: u32,
    /// Finer granularity for small values.
    #[serde(default)]
    pub fine_step: Option<FineStep>,
}

fn default_step() -> u32 {
    1
}

impl SetVarRule {
    /// Whether `value` lies within `[min, max]`.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Truncates `value` to the applicable granularity.
    pub fn quantize(&self, value: f64) -> f64 {
        let step = match self.fine_step {
            Some(fine) if value < f64::from(fine.below) => fine.step,
            _ => self.step,
        };
        if step <= 1 {
            return value.trunc();
        }
        let step = f64::from(step);
        (value / step).trunc() * step
    }
}

/// One row of a device table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDescriptor {
    /// Target name; several descriptors may share one.
    pub name: String,

    /// Writable by the server.
    #[serde(default)]
    pub rw: bool,

    /// Query or command template; absent for synthesized values.
    #[serde(default)]
    pub query: Option<Template>,

    /// Expected total reply length, terminator included.
    #[serde(default)]
    pub length: usize,

    /// Expected first byte of the reply.
    #[serde(default)]
    pub marker: Option<char>,

    /// First byte of the field (inclusive).
    #[serde(default)]
    pub from: usize,

    /// Last byte of the field (inclusive).
    #[serde(default)]
    pub to: usize,

    /// Value format; absent for raw string fields.
    #[serde(default)]
    pub format: Option<ValueFormat>,

    /// Behaviour flags.
    #[serde(default)]
    pub flags: Flags,

    /// Post-extraction transform.
    #[serde(default)]
    pub processor: Processor,
}

impl VariableDescriptor {
    /// Shorthand for `self.flags.contains(flag)`.
    pub fn has(&self, flag: Flags) -> bool {
        self.flags.contains(flag)
    }

    /// Byte range of the field within the reply.
    pub fn bytes(&self) -> RangeInclusive<usize> {
        self.from..=self.to
    }

    /// Whether this descriptor is read during poll cycles.
    pub fn is_polled(&self) -> bool {
        !self.has(Flags::CMD) && !self.has(Flags::SETVAR) && !self.has(Flags::ABSENT)
    }

    /// Status bit processor, if this is a bit descriptor.
    pub fn status_bit(&self) -> Option<&StatusBit> {
        match &self.processor {
            Processor::StatusBit(bit) => Some(bit),
            _ => None,
        }
    }

    /// Setvar rule, if this is a settable variable.
    pub fn setvar_rule(&self) -> Option<&SetVarRule> {
        match &self.processor {
            Processor::SetVar(rule) => Some(rule),
            _ => None,
        }
    }
}
