//! String `format` checks.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveTime};
use regex::Regex;
use serde_json::Value;
use url::Url;

use super::ValidateResult;
use crate::messages;
use crate::path_buffer::PathBuffer;

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // RFC 5322 simplified
    RE.get_or_init(|| {
        Regex::new(
            r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
        )
        .unwrap()
    })
}

fn hostname_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*\.?$")
            .unwrap()
    })
}

fn uri_template_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([^{}]|\{[^{}]+\})*$").unwrap())
}

fn json_pointer_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:/(?:[^~/]|~0|~1)*)*$").unwrap())
}

fn relative_json_pointer_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:0|[1-9][0-9]*)(?:#|(?:/(?:[^~/]|~0|~1)*)*)$").unwrap())
}

fn base64_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:[A-Za-z0-9+/_-]{4})*(?:[A-Za-z0-9+/_-]{2}(?:==)?|[A-Za-z0-9+/_-]{3}=?)?$")
            .unwrap()
    })
}

pub(crate) fn is_base64(text: &str) -> bool {
    base64_regex().is_match(text)
}

fn is_rfc3339_time(text: &str) -> bool {
    if NaiveTime::parse_from_str(text, "%H:%M:%S").is_ok() {
        return true;
    }
    // Times with a fractional part or offset are checked by anchoring them
    // to an arbitrary date.
    DateTime::parse_from_rfc3339(&format!("1970-01-01T{}", text)).is_ok()
}

/// Check `text` against a named format. Unknown formats are accepted.
pub fn validate_format(path: &PathBuffer, format: &str, text: &str, res: &mut ValidateResult) {
    let failure: Option<String> = match format {
        "date-time" => DateTime::parse_from_rfc3339(text)
            .err()
            .map(|_| messages::EXPECTED_RFC3339_DATE_TIME.to_string()),
        "date-time-http" => DateTime::parse_from_rfc2822(text)
            .err()
            .map(|_| messages::EXPECTED_RFC1123_DATE_TIME.to_string()),
        "date" => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .err()
            .map(|_| messages::EXPECTED_RFC3339_DATE.to_string()),
        "time" => (!is_rfc3339_time(text)).then(|| messages::EXPECTED_RFC3339_TIME.to_string()),
        "email" | "idn-email" => {
            (!email_regex().is_match(text)).then(|| messages::EXPECTED_RFC5322_EMAIL.to_string())
        }
        "hostname" => (text.len() >= 256 || !hostname_regex().is_match(text))
            .then(|| messages::EXPECTED_RFC5890_HOSTNAME.to_string()),
        "idn-hostname" => url::Host::parse(text)
            .err()
            .map(|_| messages::EXPECTED_RFC5890_HOSTNAME.to_string()),
        "ipv4" => text
            .parse::<Ipv4Addr>()
            .err()
            .map(|_| messages::EXPECTED_RFC2673_IPV4.to_string()),
        "ipv6" => match text.parse::<IpAddr>() {
            Ok(IpAddr::V6(_)) => None,
            _ => Some(messages::EXPECTED_RFC2373_IPV6.to_string()),
        },
        "uri" | "iri" => Url::parse(text).err().map(messages::expected_rfc3986_uri),
        "uri-reference" | "iri-reference" => reference_base()
            .join(text)
            .err()
            .map(messages::expected_rfc3986_uri),
        "uri-template" => match reference_base().join(text) {
            Err(err) => Some(messages::expected_rfc3986_uri(err)),
            Ok(_) if !uri_template_regex().is_match(text) => {
                Some(messages::EXPECTED_RFC6570_URI_TEMPLATE.to_string())
            }
            Ok(_) => None,
        },
        "json-pointer" => (!json_pointer_regex().is_match(text))
            .then(|| messages::EXPECTED_RFC6901_JSON_POINTER.to_string()),
        "relative-json-pointer" => (!relative_json_pointer_regex().is_match(text))
            .then(|| messages::EXPECTED_RFC6901_RELATIVE_JSON_POINTER.to_string()),
        "uuid" => uuid::Uuid::parse_str(text)
            .err()
            .map(messages::expected_rfc4122_uuid),
        "regex" => Regex::new(text).err().map(messages::expected_regexp),
        _ => None,
    };

    if let Some(msg) = failure {
        res.add(path, &Value::String(text.to_string()), msg);
    }
}

fn reference_base() -> &'static Url {
    static BASE: OnceLock<Url> = OnceLock::new();
    BASE.get_or_init(|| Url::parse("http://localhost/").unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(format: &str, text: &str) -> Option<String> {
        let mut res = ValidateResult::new();
        let mut path = PathBuffer::new();
        path.push("field");
        validate_format(&path, format, text, &mut res);
        res.errors.into_iter().next().map(|e| {
            assert_eq!(e.location, "field");
            e.message
        })
    }

    #[test]
    fn accepted_values() {
        let ok = [
            ("date-time", "2023-01-02T03:04:05Z"),
            ("date-time", "2023-01-02T03:04:05.123+02:00"),
            ("date-time-http", "Mon, 02 Jan 2006 15:04:05 GMT"),
            ("date", "2023-12-31"),
            ("time", "13:45:00"),
            ("time", "13:45:00.5Z"),
            ("email", "user.name+tag@example.co.uk"),
            ("hostname", "api.example.com"),
            ("ipv4", "192.168.0.1"),
            ("ipv6", "::1"),
            ("uri", "https://example.com/a?b=c"),
            ("uri-reference", "/relative/path"),
            ("uri-template", "/items/{id}"),
            ("json-pointer", "/a/b~1c"),
            ("relative-json-pointer", "1/a"),
            ("uuid", "67e55044-10b1-426f-9247-bb680e5fe0c8"),
            ("regex", "^a+$"),
            ("something-custom", "anything"),
        ];
        for (format, text) in ok {
            assert_eq!(check(format, text), None, "{format}: {text}");
        }
    }

    #[test]
    fn rejected_values() {
        let bad = [
            ("date-time", "2023-01-02 03:04:05", messages::EXPECTED_RFC3339_DATE_TIME),
            ("date", "2023-13-01", messages::EXPECTED_RFC3339_DATE),
            ("time", "25:00:00", messages::EXPECTED_RFC3339_TIME),
            ("email", "not-an-email", messages::EXPECTED_RFC5322_EMAIL),
            ("hostname", "-bad-.com", messages::EXPECTED_RFC5890_HOSTNAME),
            ("ipv4", "256.0.0.1", messages::EXPECTED_RFC2673_IPV4),
            ("ipv6", "127.0.0.1", messages::EXPECTED_RFC2373_IPV6),
            ("uri-template", "/items/{id", messages::EXPECTED_RFC6570_URI_TEMPLATE),
            ("json-pointer", "a/b", messages::EXPECTED_RFC6901_JSON_POINTER),
            (
                "relative-json-pointer",
                "/a",
                messages::EXPECTED_RFC6901_RELATIVE_JSON_POINTER,
            ),
        ];
        for (format, text, msg) in bad {
            assert_eq!(check(format, text).as_deref(), Some(msg), "{format}: {text}");
        }
    }

    #[test]
    fn parse_errors_are_included() {
        let msg = check("uuid", "nope").unwrap();
        assert!(msg.starts_with("expected string to be RFC 4122 uuid: "));

        let msg = check("uri", "no scheme").unwrap();
        assert!(msg.starts_with("expected string to be RFC 3986 uri: "));

        let msg = check("regex", "(").unwrap();
        assert!(msg.starts_with("expected string to be regex: "));
    }

    #[test]
    fn base64_accepts_padded_and_url_safe() {
        assert!(is_base64("aGVsbG8="));
        assert!(is_base64("aGVsbG8"));
        assert!(is_base64("a-_b"));
        assert!(!is_base64("a"));
        assert!(!is_base64("not base64!"));
    }
}
