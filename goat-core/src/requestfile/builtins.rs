use base64::{engine::general_purpose, Engine as _};
use chrono::format::{Item, StrftimeItems};
use minijinja::{Environment, Error, ErrorKind, State, Value};
use rand::Rng;
use sha2::{Digest, Sha256, Sha512};
use std::fmt::Write as _;

const RANDOM_CHARSET: &[u8] = b"abcdefhijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ1234567890";
const DEFAULT_RANDOM_STRING_LEN: usize = 8;

pub(super) fn register(env: &mut Environment<'static>) {
    env.add_function("base64", base64_std);
    env.add_function("base64Url", base64_url);
    env.add_function("base64Unpadded", base64_std_unpadded);
    env.add_function("base64UrlUnpadded", base64_url_unpadded);
    env.add_function("sha256", sha256);
    env.add_function("sha512", sha512);
    env.add_function("randomString", random_string);
    env.add_function("randomInt", random_int);
    env.add_function("timestamp", timestamp);
    env.add_function("isset", isset);
    env.add_function("json", json);
}

fn base64_std(v: Value) -> String {
    general_purpose::STANDARD.encode(v.to_string())
}

fn base64_url(v: Value) -> String {
    general_purpose::URL_SAFE.encode(v.to_string())
}

fn base64_std_unpadded(v: Value) -> String {
    general_purpose::STANDARD_NO_PAD.encode(v.to_string())
}

fn base64_url_unpadded(v: Value) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(v.to_string())
}

fn sha256(v: Value) -> String {
    hex::encode(Sha256::digest(v.to_string()))
}

fn sha512(v: Value) -> String {
    hex::encode(Sha512::digest(v.to_string()))
}

fn random_string(len: Option<usize>) -> String {
    let len = len.unwrap_or(DEFAULT_RANDOM_STRING_LEN);
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| RANDOM_CHARSET[rng.gen_range(0..RANDOM_CHARSET.len())] as char)
        .collect()
}

fn random_int(max: Option<i64>) -> Result<i64, Error> {
    let mut rng = rand::thread_rng();
    match max {
        Some(max) if max <= 0 => Err(Error::new(
            ErrorKind::InvalidOperation,
            "randomInt: max must be larger than 0",
        )),
        Some(max) => Ok(rng.gen_range(0..max)),
        None => Ok(rng.gen_range(0..i64::MAX)),
    }
}

/// Maps the case insensitive names of well known layouts to strftime patterns.
fn named_format(name: &str) -> Option<&'static str> {
    Some(match name.to_uppercase().as_str() {
        "ANSIC" => "%a %b %e %H:%M:%S %Y",
        "UNIXDATE" => "%a %b %e %H:%M:%S %Z %Y",
        "RUBYDATE" => "%a %b %d %H:%M:%S %z %Y",
        "RFC822" => "%d %b %y %H:%M %Z",
        "RFC822Z" => "%d %b %y %H:%M %z",
        "RFC850" => "%A, %d-%b-%y %H:%M:%S %Z",
        "RFC1123" => "%a, %d %b %Y %H:%M:%S %Z",
        "RFC1123Z" => "%a, %d %b %Y %H:%M:%S %z",
        "RFC3339" => "%Y-%m-%dT%H:%M:%S%:z",
        "RFC3339NANO" => "%Y-%m-%dT%H:%M:%S%.9f%:z",
        "KITCHEN" => "%-I:%M%p",
        "STAMP" => "%b %e %H:%M:%S",
        "STAMPMILLI" => "%b %e %H:%M:%S%.3f",
        "STAMPMICRO" => "%b %e %H:%M:%S%.6f",
        "STAMPNANO" => "%b %e %H:%M:%S%.9f",
        "DATETIME" => "%Y-%m-%d %H:%M:%S",
        "DATEONLY" => "%Y-%m-%d",
        "TIMEONLY" => "%H:%M:%S",
        _ => return None,
    })
}

/// Without a format the current unix timestamp in seconds, otherwise the current local time
/// formatted with either a named layout or a strftime pattern.
fn timestamp(format: Option<String>) -> Result<Value, Error> {
    let now = chrono::Local::now();
    let Some(format) = format else {
        return Ok(Value::from(now.timestamp()));
    };

    let pattern = named_format(&format).unwrap_or(&format);
    let items: Vec<Item> = StrftimeItems::new(pattern).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("timestamp: invalid format '{format}'"),
        ));
    }

    let mut out = String::new();
    write!(out, "{}", now.format_with_items(items.into_iter())).map_err(|_| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("timestamp: failed formatting with '{format}'"),
        )
    })?;
    Ok(Value::from(out))
}

/// `isset("key")` checks the template context, `isset(map, "key")` checks a map. A key is set
/// when it exists and is not none.
fn isset(state: &State, target: Value, key: Option<String>) -> Result<bool, Error> {
    let value = match key {
        Some(key) => target.get_attr(&key)?,
        None => {
            let name = target.as_str().ok_or_else(|| {
                Error::new(ErrorKind::InvalidOperation, "isset: key must be a string")
            })?;
            match state.lookup(name) {
                Some(value) => value,
                None => return Ok(false),
            }
        }
    };
    Ok(!value.is_undefined() && !value.is_none())
}

fn json(value: Value, indent: Option<usize>) -> Result<String, Error> {
    let map_err = |err: serde_json::Error| {
        Error::new(ErrorKind::InvalidOperation, "json: serialization failed").with_source(err)
    };

    let Some(indent) = indent else {
        return serde_json::to_string(&value).map_err(map_err);
    };

    let indent = " ".repeat(indent);
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    serde::Serialize::serialize(&value, &mut ser).map_err(map_err)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod test {
    use crate::engine::State as RuntimeState;
    use crate::requestfile::template::apply;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use test_case::test_case;

    fn state(v: serde_json::Value) -> RuntimeState {
        match v {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn render(tmpl: &str) -> String {
        let st = state(json!({
            "user": "admin",
            "password": "secret",
            "obj": {"a": 1, "nothing": null},
            "nothing": null,
        }));
        apply(tmpl, &st).unwrap()
    }

    #[test_case(r#"{{ base64("admin:secret") }}"#, "YWRtaW46c2VjcmV0"; "base64")]
    #[test_case(r#"{{ base64(user ~ ":" ~ password) }}"#, "YWRtaW46c2VjcmV0"; "base64 of expression")]
    #[test_case(r#"{{ base64Url("??>") }}"#, "Pz8-"; "base64 url")]
    #[test_case(r#"{{ base64Unpadded("a") }}"#, "YQ"; "base64 unpadded")]
    #[test_case(r#"{{ base64UrlUnpadded("??>a") }}"#, "Pz8-YQ"; "base64 url unpadded")]
    #[test_case(
        r#"{{ sha256("abc") }}"#,
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        "sha256"
    )]
    fn encoders(tmpl: &str, expected: &str) {
        assert_eq!(render(tmpl), expected);
    }

    #[test]
    fn sha512_length() {
        assert_eq!(render(r#"{{ sha512("abc") }}"#).len(), 128);
    }

    #[test]
    fn random_string_lengths() {
        assert_eq!(render("{{ randomString() }}").len(), 8);
        assert_eq!(render("{{ randomString(32) }}").len(), 32);
    }

    #[test]
    fn random_int_bounds() {
        for _ in 0..20 {
            let v: i64 = render("{{ randomInt(5) }}").parse().unwrap();
            assert!((0..5).contains(&v));
        }
        assert!(apply("{{ randomInt(0) }}", &RuntimeState::new()).is_err());
    }

    #[test]
    fn timestamps() {
        let unix: i64 = render("{{ timestamp() }}").parse().unwrap();
        assert!(unix > 1_600_000_000);

        let date = render(r#"{{ timestamp("dateonly") }}"#);
        assert_eq!(date.len(), 10);
        assert_eq!(&date[4..5], "-");

        let custom = render(r#"{{ timestamp("%Y") }}"#);
        assert_eq!(custom.len(), 4);

        assert!(apply(r#"{{ timestamp("%Q") }}"#, &RuntimeState::new()).is_err());
    }

    #[test_case(r#"{{ isset("user") }}"#, "true"; "set")]
    #[test_case(r#"{{ isset("missing") }}"#, "false"; "missing")]
    #[test_case(r#"{{ isset("nothing") }}"#, "false"; "null")]
    #[test_case(r#"{{ isset(obj, "a") }}"#, "true"; "map key set")]
    #[test_case(r#"{{ isset(obj, "b") }}"#, "false"; "map key missing")]
    #[test_case(r#"{{ isset(obj, "nothing") }}"#, "false"; "map key null")]
    fn isset(tmpl: &str, expected: &str) {
        assert_eq!(render(tmpl), expected);
    }

    #[test]
    fn json_output() {
        assert_eq!(render("{{ json(obj) }}"), r#"{"a":1,"nothing":null}"#);
        assert_eq!(render("{{ json(obj, 2) }}"), "{\n  \"a\": 1,\n  \"nothing\": null\n}");
    }
}
