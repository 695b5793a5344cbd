//! Validation message catalogue.
//!
//! Fixed strings are constants; parameterised ones are small formatting
//! helpers used when a schema precomputes its messages.

use std::fmt::Display;

use serde_json::Value;

pub const EXPECTED_RFC3339_DATE_TIME: &str = "expected string to be RFC 3339 date-time";
pub const EXPECTED_RFC1123_DATE_TIME: &str = "expected string to be RFC 1123 date-time";
pub const EXPECTED_RFC3339_DATE: &str = "expected string to be RFC 3339 date";
pub const EXPECTED_RFC3339_TIME: &str = "expected string to be RFC 3339 time";
pub const EXPECTED_RFC5322_EMAIL: &str = "expected string to be RFC 5322 email";
pub const EXPECTED_RFC5890_HOSTNAME: &str = "expected string to be RFC 5890 hostname";
pub const EXPECTED_RFC2673_IPV4: &str = "expected string to be RFC 2673 ipv4";
pub const EXPECTED_RFC2373_IPV6: &str = "expected string to be RFC 2373 ipv6";
pub const EXPECTED_RFC6570_URI_TEMPLATE: &str = "expected string to be RFC 6570 uri-template";
pub const EXPECTED_RFC6901_JSON_POINTER: &str = "expected string to be RFC 6901 json-pointer";
pub const EXPECTED_RFC6901_RELATIVE_JSON_POINTER: &str =
    "expected string to be RFC 6901 relative-json-pointer";

pub const EXPECTED_MATCH_AT_LEAST_ONE_SCHEMA: &str =
    "expected value to match at least one schema but matched none";
pub const EXPECTED_MATCH_EXACTLY_ONE_SCHEMA: &str =
    "expected value to match exactly one schema but matched none";
pub const EXPECTED_MATCH_EXACTLY_ONE_SCHEMA_MULTIPLE: &str =
    "expected value to match exactly one schema but matched multiple";
pub const EXPECTED_NOT_MATCH_SCHEMA: &str = "expected value to not match schema";
pub const EXPECTED_PROPERTY_NAME_IN_OBJECT: &str =
    "expected propertyName value to be present in object";

pub const EXPECTED_BOOLEAN: &str = "expected boolean";
pub const EXPECTED_NUMBER: &str = "expected number";
pub const EXPECTED_INTEGER: &str = "expected integer";
pub const EXPECTED_STRING: &str = "expected string";
pub const EXPECTED_BASE64_STRING: &str = "expected string to be base64 encoded";
pub const EXPECTED_ARRAY: &str = "expected array";
pub const EXPECTED_OBJECT: &str = "expected object";
pub const EXPECTED_ARRAY_ITEMS_UNIQUE: &str = "expected array items to be unique";

pub const UNEXPECTED_PROPERTY: &str = "unexpected property";
pub const WRITE_ONLY_NON_ZERO: &str = "write only property is non-zero";

pub fn expected_rfc3986_uri(err: impl Display) -> String {
    format!("expected string to be RFC 3986 uri: {}", err)
}

pub fn expected_rfc4122_uuid(err: impl Display) -> String {
    format!("expected string to be RFC 4122 uuid: {}", err)
}

pub fn expected_regexp(err: impl Display) -> String {
    format!("expected string to be regex: {}", err)
}

/// `expected value to be one of "a, b"`. Strings are rendered without quotes.
pub fn expected_one_of(values: &[Value]) -> String {
    let joined = values
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("expected value to be one of \"{}\"", joined)
}

pub fn expected_minimum_number(n: f64) -> String {
    format!("expected number >= {}", n)
}

pub fn expected_exclusive_minimum_number(n: f64) -> String {
    format!("expected number > {}", n)
}

pub fn expected_maximum_number(n: f64) -> String {
    format!("expected number <= {}", n)
}

pub fn expected_exclusive_maximum_number(n: f64) -> String {
    format!("expected number < {}", n)
}

pub fn expected_multiple_of(n: f64) -> String {
    format!("expected number to be a multiple of {}", n)
}

pub fn expected_min_length(n: usize) -> String {
    format!("expected length >= {}", n)
}

pub fn expected_max_length(n: usize) -> String {
    format!("expected length <= {}", n)
}

pub fn expected_be_pattern(description: &str) -> String {
    format!("expected string to be {}", description)
}

pub fn expected_match_pattern(pattern: &str) -> String {
    format!("expected string to match pattern {}", pattern)
}

pub fn expected_min_items(n: usize) -> String {
    format!("expected array length >= {}", n)
}

pub fn expected_max_items(n: usize) -> String {
    format!("expected array length <= {}", n)
}

pub fn expected_min_properties(n: usize) -> String {
    format!("expected object with at least {} properties", n)
}

pub fn expected_max_properties(n: usize) -> String {
    format!("expected object with at most {} properties", n)
}

pub fn expected_required_property(name: &str) -> String {
    format!("expected required property {} to be present", name)
}

pub fn expected_dependent_required(dependent: &str, name: &str) -> String {
    format!(
        "expected property {} to be present when {} is present",
        dependent, name
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn one_of_renders_strings_raw() {
        let msg = expected_one_of(&[json!("a"), json!("b")]);
        assert_eq!(msg, "expected value to be one of \"a, b\"");

        let msg = expected_one_of(&[json!(1), json!(2.5), json!(true)]);
        assert_eq!(msg, "expected value to be one of \"1, 2.5, true\"");
    }

    #[test]
    fn whole_floats_render_without_fraction() {
        assert_eq!(expected_minimum_number(1.0), "expected number >= 1");
        assert_eq!(expected_maximum_number(2.5), "expected number <= 2.5");
    }
}
