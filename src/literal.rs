use booksync_core::{Guid, Numeric, Path, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::error::AppError;

/// Reads a command-line literal as the narrowest value it spells.
///
/// Tried in order: int64, `num/denom` numeric, double, guid, RFC 3339
/// timestamp. Anything else, or text wrapped in double quotes, is a string.
pub fn parse_literal(text: &str) -> Value {
    if let Some(quoted) = text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        return Value::String(quoted.to_string());
    }
    if let Ok(i) = text.parse::<i64>() {
        return Value::Int64(i);
    }
    if let Some(numeric) = parse_numeric(text) {
        return Value::Numeric(numeric);
    }
    if text.chars().any(|c| c.is_ascii_digit()) {
        if let Ok(f) = text.parse::<f64>() {
            return Value::Double(f);
        }
    }
    if let Ok(guid) = Guid::parse_str(text) {
        return Value::Guid(guid);
    }
    if let Ok(ts) = OffsetDateTime::parse(text, &Rfc3339) {
        return Value::Timestamp(ts);
    }
    Value::String(text.to_string())
}

fn parse_numeric(text: &str) -> Option<Numeric> {
    let (num, denom) = text.split_once('/')?;
    Numeric::new(num.trim().parse().ok()?, denom.trim().parse().ok()?)
}

/// Splits `path=value` into a slot path and its literal value.
pub fn parse_assignment(assignment: &str) -> Result<(Path, Value), AppError> {
    let (path, value) = assignment
        .split_once('=')
        .ok_or_else(|| AppError::InvalidAssignment(assignment.to_string()))?;
    Ok((Path::parse(path)?, parse_literal(value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_kinds() {
        assert_eq!(parse_literal("42"), Value::Int64(42));
        assert_eq!(parse_literal("-7"), Value::Int64(-7));
        assert_eq!(parse_literal("3/4"), Value::Numeric(Numeric::new(3, 4).unwrap()));
        assert_eq!(parse_literal("2.5"), Value::Double(2.5));
        assert_eq!(parse_literal("inf"), Value::from("inf"));
        assert_eq!(parse_literal("\"42\""), Value::from("42"));
        assert_eq!(parse_literal("Checking"), Value::from("Checking"));

        let guid = Guid::new_v4();
        assert_eq!(parse_literal(&guid.to_string()), Value::Guid(guid));
        assert_eq!(parse_literal("2024-03-01T12:00:00Z").tag(), booksync_core::ValueTag::Timestamp);
    }

    #[test]
    fn test_zero_denominator_is_a_string() {
        assert_eq!(parse_literal("1/0"), Value::from("1/0"));
    }

    #[test]
    fn test_assignment() {
        let (path, value) = parse_assignment("options/budget/period=12").unwrap();
        assert_eq!(path.to_string(), "options/budget/period");
        assert_eq!(value, Value::Int64(12));

        let (_, value) = parse_assignment("note=a=b").unwrap();
        assert_eq!(value, Value::from("a=b"));

        assert!(matches!(parse_assignment("no-equals"), Err(AppError::InvalidAssignment(_))));
        assert!(matches!(parse_assignment("a//b=1"), Err(AppError::Frame(_))));
    }
}
