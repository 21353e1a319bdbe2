//! Printf-style value formats and command templates.
//!
//! Device tables describe numeric fields the way the devices document them
//! (`%.1f`, `%.0f`, `%s`) and parametrized commands with `%s` / `%02d`
//! placeholders. Only that subset is supported; anything else is refused when
//! the table is loaded.

use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

use crate::error::TableError;

/// Format attached to a descriptor's extracted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ValueFormat {
    /// `%.Nf`: decimal number rendered with `decimals` places.
    Float {
        /// Decimal places (6 when the precision is omitted).
        decimals: usize,
    },
    /// `%d`, `%0Nd`: integer.
    Integer {
        /// Minimum rendered width.
        width: usize,
        /// Pad with zeros instead of spaces.
        zero_pad: bool,
    },
    /// `%s`: text, kept verbatim.
    Text,
}

impl ValueFormat {
    /// Parses a single printf conversion such as `%.1f` or `%02d`.
    pub fn parse(text: &str) -> Result<Self, TableError> {
        let invalid = |reason: &str| TableError::InvalidFormat {
            format: text.to_string(),
            reason: reason.to_string(),
        };

        let body = text
            .strip_prefix('%')
            .ok_or_else(|| invalid("must start with '%'"))?;
        let (conversion, body) = match body.chars().last() {
            Some(c) => (c, &body[..body.len() - c.len_utf8()]),
            None => return Err(invalid("missing conversion")),
        };
        let directive = Directive::parse(body).ok_or_else(|| invalid("bad flags or width"))?;

        match conversion {
            'f' => Ok(ValueFormat::Float {
                decimals: directive.precision.unwrap_or(6),
            }),
            'd' if directive.precision.is_none() => Ok(ValueFormat::Integer {
                width: directive.width,
                zero_pad: directive.zero_pad,
            }),
            's' if directive.is_plain() => Ok(ValueFormat::Text),
            _ => Err(invalid("unsupported conversion")),
        }
    }

    /// Whether this format yields a number.
    pub fn is_numeric(&self) -> bool {
        !matches!(self, ValueFormat::Text)
    }

    /// Interprets an extracted field according to this format.
    ///
    /// Surrounding whitespace is ignored for numbers.
    pub fn decode(&self, field: &str) -> Result<Value, String> {
        match self {
            ValueFormat::Float { decimals } => field
                .trim()
                .parse::<f64>()
                .map(|value| Value::Number {
                    value,
                    decimals: *decimals,
                })
                .map_err(|e| format!("not a number: {e}")),
            ValueFormat::Integer { .. } => field
                .trim()
                .parse::<i64>()
                .map(|value| Value::Number {
                    value: value as f64,
                    decimals: 0,
                })
                .map_err(|e| format!("not an integer: {e}")),
            ValueFormat::Text => Ok(Value::Text(field.to_string())),
        }
    }
}

impl fmt::Display for ValueFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueFormat::Float { decimals } => write!(f, "%.{decimals}f"),
            ValueFormat::Integer { width: 0, .. } => write!(f, "%d"),
            ValueFormat::Integer { width, zero_pad } => {
                write!(f, "%{}{width}d", if *zero_pad { "0" } else { "" })
            }
            ValueFormat::Text => write!(f, "%s"),
        }
    }
}

impl TryFrom<String> for ValueFormat {
    type Error = TableError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ValueFormat::parse(&value)
    }
}

impl From<ValueFormat> for String {
    fn from(value: ValueFormat) -> Self {
        value.to_string()
    }
}

/// Flags, width and precision between `%` and the conversion character.
#[derive(Debug, Default)]
struct Directive {
    zero_pad: bool,
    width: usize,
    precision: Option<usize>,
}

impl Directive {
    fn parse(body: &str) -> Option<Self> {
        let (width_part, precision) = match body.split_once('.') {
            Some((w, p)) => (w, Some(parse_digits(p)?)),
            None => (body, None),
        };
        let zero_pad = width_part.starts_with('0');
        let digits = width_part.trim_start_matches('0');
        let width = if digits.is_empty() {
            0
        } else {
            parse_digits(digits)?
        };
        Some(Self {
            zero_pad,
            width,
            precision,
        })
    }

    fn is_plain(&self) -> bool {
        !self.zero_pad && self.width == 0 && self.precision.is_none()
    }
}

fn parse_digits(s: &str) -> Option<usize> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

// =============================================================================
// Decoded values
// =============================================================================

/// A decoded parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Numeric value with the number of decimals its format prescribes.
    Number {
        /// Parsed value.
        value: f64,
        /// Decimal places used when rendering.
        decimals: usize,
    },
    /// Text value.
    Text(String),
}

impl Value {
    /// Numeric view of the value, if it is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number { value, .. } => Some(*value),
            Value::Text(_) => None,
        }
    }

    /// Text view of the value, if it is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Number { .. } => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number { value, decimals } => write!(f, "{:.*}", *decimals, value),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Number { value, .. } => serializer.serialize_f64(*value),
            Value::Text(s) => serializer.serialize_str(s),
        }
    }
}

// =============================================================================
// Command templates
// =============================================================================

/// Argument substituted into a [`Template`] placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// Fills `%d` / `%0Nd`.
    Int(i64),
    /// Fills `%s`.
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Text,
    Integer { width: usize, zero_pad: bool },
}

/// A query or command string with optional printf-style placeholders.
///
/// The terminator is part of the template (`"Q1\r"`, `"T%02d\r"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
    matcher: Regex,
}

impl Template {
    /// Parses a template, compiling the matcher used to recognise its
    /// rendered form.
    pub fn parse(source: &str) -> Result<Self, TableError> {
        let invalid = |reason: &str| TableError::InvalidFormat {
            format: source.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }
            if chars.peek() == Some(&'%') {
                chars.next();
                literal.push('%');
                continue;
            }

            let mut placeholder_text = String::from("%");
            loop {
                match chars.next() {
                    Some(c) if c.is_ascii_alphabetic() => {
                        placeholder_text.push(c);
                        break;
                    }
                    Some(c) => placeholder_text.push(c),
                    None => return Err(invalid("unterminated placeholder")),
                }
            }
            let placeholder = match ValueFormat::parse(&placeholder_text)? {
                ValueFormat::Text => Segment::Text,
                ValueFormat::Integer { width, zero_pad } => Segment::Integer { width, zero_pad },
                ValueFormat::Float { .. } => {
                    return Err(invalid("float placeholders are not supported in commands"))
                }
            };
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(placeholder);
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        let mut pattern = String::from("(?s)^");
        for segment in &segments {
            match segment {
                Segment::Literal(text) => pattern.push_str(&regex::escape(text)),
                Segment::Text => pattern.push_str(".*?"),
                Segment::Integer { width, .. } if *width > 0 => {
                    pattern.push_str(&format!(r"-?\d{{{width},}}"))
                }
                Segment::Integer { .. } => pattern.push_str(r"-?\d+"),
            }
        }
        pattern.push('$');
        let matcher = Regex::new(&pattern).map_err(|e| invalid(&e.to_string()))?;

        Ok(Self {
            source: source.to_string(),
            segments,
            matcher,
        })
    }

    /// The template text as written in the profile.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Number of placeholders to fill.
    pub fn placeholder_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| !matches!(s, Segment::Literal(_)))
            .count()
    }

    /// Number of literal characters, placeholders excluded.
    pub fn literal_len(&self) -> usize {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Literal(text) => text.len(),
                _ => 0,
            })
            .sum()
    }

    /// Whether the template needs arguments.
    pub fn is_parametrized(&self) -> bool {
        self.placeholder_count() > 0
    }

    /// Wraps a caller-supplied number into the argument kind each placeholder
    /// expects.
    pub fn args_from_value(&self, value: f64) -> Vec<Arg> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Literal(_) => None,
                Segment::Integer { .. } => Some(Arg::Int(value.round() as i64)),
                Segment::Text if value.fract() == 0.0 => {
                    Some(Arg::Text(format!("{}", value as i64)))
                }
                Segment::Text => Some(Arg::Text(value.to_string())),
            })
            .collect()
    }

    /// Substitutes `args` into the placeholders, in order.
    pub fn render(&self, args: &[Arg]) -> Result<String, String> {
        let expected = self.placeholder_count();
        if args.len() != expected {
            return Err(format!(
                "template {:?} takes {} argument(s), got {}",
                self.source,
                expected,
                args.len()
            ));
        }

        let mut out = String::with_capacity(self.source.len() + 8);
        let mut args = args.iter();
        for segment in &self.segments {
            match (segment, segment_arg(segment, &mut args)) {
                (Segment::Literal(text), _) => out.push_str(text),
                (Segment::Text, Some(Arg::Text(s))) => out.push_str(s),
                (Segment::Text, Some(Arg::Int(n))) => out.push_str(&n.to_string()),
                (Segment::Integer { width, zero_pad }, Some(Arg::Int(n))) => {
                    if *zero_pad {
                        out.push_str(&format!("{n:0width$}", width = *width));
                    } else {
                        out.push_str(&format!("{n:width$}", width = *width));
                    }
                }
                (Segment::Integer { .. }, Some(Arg::Text(s))) => {
                    return Err(format!("expected an integer argument, got {s:?}"));
                }
                (_, None) => return Err("missing argument".to_string()),
            }
        }
        Ok(out)
    }

    /// Whether `command` is a rendering of this template.
    pub fn matches(&self, command: &str) -> bool {
        self.matcher.is_match(command)
    }
}

fn segment_arg<'a>(segment: &Segment, args: &mut std::slice::Iter<'a, Arg>) -> Option<&'a Arg> {
    match segment {
        Segment::Literal(_) => None,
        _ => args.next(),
    }
}

impl PartialEq for Template {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Template {}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.source)
    }
}

impl TryFrom<String> for Template {
    type Error = TableError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Template::parse(&value)
    }
}

impl From<Template> for String {
    fn from(value: Template) -> Self {
        value.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_formats() {
        assert_eq!(
            ValueFormat::parse("%.1f").unwrap(),
            ValueFormat::Float { decimals: 1 }
        );
        assert_eq!(
            ValueFormat::parse("%.0f").unwrap(),
            ValueFormat::Float { decimals: 0 }
        );
        assert_eq!(
            ValueFormat::parse("%02d").unwrap(),
            ValueFormat::Integer {
                width: 2,
                zero_pad: true
            }
        );
        assert_eq!(ValueFormat::parse("%s").unwrap(), ValueFormat::Text);

        assert!(ValueFormat::parse("1f").is_err());
        assert!(ValueFormat::parse("%x").is_err());
        assert!(ValueFormat::parse("%.f").is_err());
        assert!(ValueFormat::parse("%05s").is_err());
    }

    #[test]
    fn test_decode_respects_decimals() {
        let value = ValueFormat::Float { decimals: 2 }.decode("22.7").unwrap();
        assert_eq!(value.as_f64(), Some(22.7));
        assert_eq!(value.to_string(), "22.70");

        let load = ValueFormat::Float { decimals: 0 }.decode("014").unwrap();
        assert_eq!(load.to_string(), "14");

        assert!(ValueFormat::Float { decimals: 1 }.decode("---.-").is_err());
    }

    #[test]
    fn test_template_render() {
        let template = Template::parse("T%02d\r").unwrap();
        assert!(template.is_parametrized());
        assert_eq!(template.render(&[Arg::Int(4)]).unwrap(), "T04\r");
        assert_eq!(template.render(&[Arg::Int(42)]).unwrap(), "T42\r");
        assert!(template.render(&[]).is_err());
        assert!(template.render(&[Arg::Text("x".into())]).is_err());

        let shutdown = Template::parse("S%sR0000\r").unwrap();
        assert_eq!(
            shutdown.render(&[Arg::Text(".5".into())]).unwrap(),
            "S.5R0000\r"
        );

        let percent = Template::parse("100%%\r").unwrap();
        assert!(!percent.is_parametrized());
        assert_eq!(percent.render(&[]).unwrap(), "100%\r");
    }

    #[test]
    fn test_template_matches_rendered_commands() {
        let test = Template::parse("T%02d\r").unwrap();
        assert!(test.matches("T04\r"));
        assert!(!test.matches("TL\r"));
        assert!(!test.matches("T\r"));

        let stay_off = Template::parse("S%sR0000\r").unwrap();
        assert!(stay_off.matches("S.5R0000\r"));
        assert!(!stay_off.matches("S02R0005\r"));

        let plain = Template::parse("Q1\r").unwrap();
        assert!(plain.matches("Q1\r"));
        assert!(!plain.matches("Q1"));
    }

    #[test]
    fn test_template_rejects_float_placeholder() {
        assert!(Template::parse("V%.1f\r").is_err());
        assert!(Template::parse("V%").is_err());
    }

    #[test]
    fn test_args_from_value() {
        let template = Template::parse("PSD%03d\r").unwrap();
        assert_eq!(template.args_from_value(12.0), vec![Arg::Int(12)]);

        let text = Template::parse("S%s\r").unwrap();
        assert_eq!(text.args_from_value(3.0), vec![Arg::Text("3".into())]);
    }
}
