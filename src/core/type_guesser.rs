use regex::Regex;
use std::sync::LazyLock;

static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]+\.?[0-9]*$").unwrap());
static DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$").unwrap());
static BOOLEAN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?i:true|false)$").unwrap());
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_+-]+(\.[A-Za-z0-9_+-]+)*@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)+$").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuessedType {
    Number,
    Date,
    Boolean,
    Email,
    Unknown,
}

/// Classifies a raw cell. Patterns are tried in a fixed order and the first
/// whole-string match wins.
///
/// A date is only checked for shape here; `2024-02-30` is still `Date`, and
/// turning it into a calendar value is the caller's job.
pub fn guess_type(value: &str) -> GuessedType {
    if NUMBER.is_match(value) {
        GuessedType::Number
    } else if DATE.is_match(value) {
        GuessedType::Date
    } else if BOOLEAN.is_match(value) {
        GuessedType::Boolean
    } else if EMAIL.is_match(value) {
        GuessedType::Email
    } else {
        GuessedType::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers() {
        for value in ["123", "123.45", "0", "999999", "12."] {
            assert_eq!(guess_type(value), GuessedType::Number, "{value}");
        }
        for value in ["-1", "1e5", "1,000", "1.2.3", ".5"] {
            assert_ne!(guess_type(value), GuessedType::Number, "{value}");
        }
    }

    #[test]
    fn test_dates() {
        assert_eq!(guess_type("2024-01-15"), GuessedType::Date);
        assert_eq!(guess_type("1990-05-20"), GuessedType::Date);
        // shape only, the calendar check happens during conversion
        assert_eq!(guess_type("2024-02-30"), GuessedType::Date);
        assert_eq!(guess_type("2024-1-15"), GuessedType::Unknown);
        assert_eq!(guess_type("2024-01-15T10:00:00"), GuessedType::Unknown);
    }

    #[test]
    fn test_booleans() {
        for value in ["true", "FALSE", "True", "fAlSe"] {
            assert_eq!(guess_type(value), GuessedType::Boolean, "{value}");
        }
        assert_eq!(guess_type("yes"), GuessedType::Unknown);
        assert_eq!(guess_type("truely"), GuessedType::Unknown);
    }

    #[test]
    fn test_emails() {
        for value in [
            "test@example.com",
            "user.name@domain.org",
            "admin+tag@company.co.uk",
        ] {
            assert_eq!(guess_type(value), GuessedType::Email, "{value}");
        }
        for value in [
            "not-an-email",
            "user@localhost",
            "a@@b.com",
            "two words@example.com",
            "John <john@example.com>",
            ".lead@example.com",
        ] {
            assert_eq!(guess_type(value), GuessedType::Unknown, "{value}");
        }
    }

    #[test]
    fn test_unknown() {
        assert_eq!(guess_type(""), GuessedType::Unknown);
        assert_eq!(guess_type("hello world"), GuessedType::Unknown);
        assert_eq!(guess_type("abc123"), GuessedType::Unknown);
    }

    #[test]
    fn test_label_matches_converted_value() {
        use crate::core::normalizer::convert_text;
        use crate::domain::model::FieldValue;

        for value in ["42", "3.5", "2024-01-15", "TRUE", "false", "a@b.io", "plain", ""] {
            let label = guess_type(value);
            let converted = convert_text("c", 1, value.to_string()).unwrap();
            let consistent = match (label, &converted) {
                (GuessedType::Number, FieldValue::Number(_)) => true,
                (GuessedType::Date, FieldValue::Date(d)) => d.format("%Y-%m-%d").to_string() == value,
                (GuessedType::Boolean, FieldValue::Bool(_)) => true,
                (GuessedType::Email, FieldValue::Text(addr)) => guess_type(addr) == GuessedType::Email,
                (GuessedType::Unknown, FieldValue::Text(text)) => text == value,
                _ => false,
            };
            assert!(consistent, "{value} labelled {label:?} converted to {converted:?}");
            assert_eq!(guess_type(value), label, "{value}");
        }
    }
}
