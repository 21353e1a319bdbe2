//! Response validation and field extraction.

use super::descriptor::{Flags, VariableDescriptor};
use super::format::Value;
use crate::error::ProtocolError;

/// Bytes allowed after the expected length of a reply.
fn is_trailing_filler(byte: u8) -> bool {
    matches!(byte, b'\r' | b'\n' | b' ' | 0)
}

/// Checks length and marker of `response` against `descriptor`.
pub fn validate(descriptor: &VariableDescriptor, response: &[u8]) -> Result<(), ProtocolError> {
    let expected = descriptor.length;
    let actual = response.len();
    if actual < expected
        || response[expected..]
            .iter()
            .any(|b| !is_trailing_filler(*b))
    {
        return Err(ProtocolError::LengthMismatch { expected, actual });
    }

    if let Some(marker) = descriptor.marker {
        let first = response.first().copied();
        if first != u8::try_from(marker).ok() {
            return Err(ProtocolError::MarkerMismatch {
                expected: marker,
                actual: first.map(char::from),
            });
        }
    }
    Ok(())
}

/// Validates `response` and returns the descriptor's byte range, trimmed when
/// the descriptor asks for it.
pub fn extract<'r>(
    descriptor: &VariableDescriptor,
    response: &'r [u8],
) -> Result<&'r [u8], ProtocolError> {
    validate(descriptor, response)?;
    let field = &response[descriptor.bytes()];
    if descriptor.has(Flags::TRIM) {
        Ok(field.trim_ascii())
    } else {
        Ok(field)
    }
}

/// Decodes the descriptor's field from `response` into a typed value.
pub fn decode(descriptor: &VariableDescriptor, response: &[u8]) -> Result<Value, ProtocolError> {
    let field = extract(descriptor, response)?;
    let text = std::str::from_utf8(field).map_err(|e| ProtocolError::Malformed {
        field: String::from_utf8_lossy(field).into_owned(),
        reason: format!("not valid text: {e}"),
    })?;

    match &descriptor.format {
        Some(format) => format
            .decode(text)
            .map_err(|reason| ProtocolError::Malformed {
                field: text.to_string(),
                reason,
            }),
        None => Ok(Value::Text(text.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::format::{Template, ValueFormat};

    const Q1: &[u8] = b"(215.0 195.0 230.0 014 49.0 22.7 30.0 00000000\r";

    fn field(from: usize, to: usize, format: Option<&str>) -> VariableDescriptor {
        VariableDescriptor {
            name: "test".into(),
            rw: false,
            query: Some(Template::parse("Q1\r").unwrap()),
            length: 47,
            marker: Some('('),
            from,
            to,
            format: format.map(|f| ValueFormat::parse(f).unwrap()),
            flags: Flags::empty(),
            processor: Default::default(),
        }
    }

    #[test]
    fn test_decode_numeric_fields() {
        let voltage = decode(&field(1, 5, Some("%.1f")), Q1).unwrap();
        assert_eq!(voltage.to_string(), "215.0");

        let load = decode(&field(19, 21, Some("%.0f")), Q1).unwrap();
        assert_eq!(load.as_f64(), Some(14.0));
        assert_eq!(load.to_string(), "14");

        let battery = decode(&field(28, 31, Some("%.2f")), Q1).unwrap();
        assert_eq!(battery.to_string(), "22.70");
    }

    #[test]
    fn test_short_response_is_length_mismatch() {
        let err = decode(&field(1, 5, Some("%.1f")), &Q1[..46]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::LengthMismatch {
                expected: 47,
                actual: 46
            }
        );
    }

    #[test]
    fn test_trailing_terminators_are_tolerated() {
        let mut padded = Q1.to_vec();
        padded.extend_from_slice(b"\n\0");
        assert!(decode(&field(1, 5, Some("%.1f")), &padded).is_ok());

        let mut garbage = Q1.to_vec();
        garbage.push(b'X');
        assert!(matches!(
            decode(&field(1, 5, Some("%.1f")), &garbage),
            Err(ProtocolError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_marker_mismatch() {
        let mut reply = Q1.to_vec();
        reply[0] = b'#';
        assert_eq!(
            decode(&field(1, 5, Some("%.1f")), &reply).unwrap_err(),
            ProtocolError::MarkerMismatch {
                expected: '(',
                actual: Some('#')
            }
        );
    }

    #[test]
    fn test_non_numeric_field_is_malformed() {
        let mut reply = Q1.to_vec();
        reply[2] = b'x';
        assert!(matches!(
            decode(&field(1, 5, Some("%.1f")), &reply),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn test_trim_and_raw_text() {
        let info = b"#NOT_A_LIVE_UPS  TESTING    TESTING   \r";
        let mut desc = field(1, 15, None);
        desc.length = 39;
        desc.marker = Some('#');
        assert_eq!(
            decode(&desc, info).unwrap(),
            Value::Text("NOT_A_LIVE_UPS ".into())
        );

        desc.flags = Flags::TRIM;
        assert_eq!(
            decode(&desc, info).unwrap(),
            Value::Text("NOT_A_LIVE_UPS".into())
        );
    }
}
