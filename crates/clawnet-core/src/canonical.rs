//! JSON Canonicalization Scheme (RFC 8785).
//!
//! Two semantically equal JSON values always canonicalize to the same UTF-8
//! bytes: object keys sorted by UTF-16 code units, no insignificant
//! whitespace, numbers in ECMA-262 shortest round-trip form. Content
//! addressing and signing both hash these bytes, so this module is
//! consensus-critical.

use serde_json::Value;

use crate::error::ClawError;

/// Canonical UTF-8 bytes of a JSON value.
pub fn canonical_bytes(value: &Value) -> Result<Vec<u8>, ClawError> {
    let mut out = Vec::with_capacity(128);
    write_value(value, &mut out)?;
    Ok(out)
}

/// Canonical form as a string, for logs and snapshot files.
pub fn canonical_string(value: &Value) -> Result<String, ClawError> {
    let bytes = canonical_bytes(value)?;
    String::from_utf8(bytes).map_err(|e| ClawError::Canonicalization(e.to_string()))
}

fn write_value(value: &Value, out: &mut Vec<u8>) -> Result<(), ClawError> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => write_number(n, out)?,
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            // RFC 8785 §3.2.3: sort by UTF-16 code units, not Unicode scalars.
            keys.sort_by_cached_key(|k| k.encode_utf16().collect::<Vec<u16>>());
            out.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(key.as_str(), out);
                out.push(b':');
                write_value(&map[key.as_str()], out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    out.push(b'"');
    for c in s.chars() {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\u{0008}' => out.extend_from_slice(b"\\b"),
            '\u{0009}' => out.extend_from_slice(b"\\t"),
            '\u{000A}' => out.extend_from_slice(b"\\n"),
            '\u{000C}' => out.extend_from_slice(b"\\f"),
            '\u{000D}' => out.extend_from_slice(b"\\r"),
            c if (c as u32) < 0x20 => {
                out.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}

fn write_number(n: &serde_json::Number, out: &mut Vec<u8>) -> Result<(), ClawError> {
    if let Some(u) = n.as_u64() {
        out.extend_from_slice(u.to_string().as_bytes());
    } else if let Some(i) = n.as_i64() {
        out.extend_from_slice(i.to_string().as_bytes());
    } else if let Some(f) = n.as_f64() {
        if !f.is_finite() {
            return Err(ClawError::Canonicalization("non-finite number".into()));
        }
        out.extend_from_slice(format_ecma_number(f).as_bytes());
    } else {
        return Err(ClawError::Canonicalization("unrepresentable number".into()));
    }
    Ok(())
}

/// ECMA-262 `Number::toString(10)`: shortest digits that round-trip, with the
/// positional/exponential cutover at 10^21 and 10^-7.
fn format_ecma_number(x: f64) -> String {
    if x == 0.0 {
        return "0".to_string();
    }
    if x < 0.0 {
        return format!("-{}", format_ecma_number(-x));
    }

    // `{:e}` yields Rust's shortest round-trip mantissa plus a decimal
    // exponent, e.g. "1.2345e3" or "5e-7".
    let sci = format!("{x:e}");
    let (mantissa, exp_str) = sci
        .split_once('e')
        .expect("float scientific form always contains an exponent");
    let exp: i32 = exp_str
        .parse()
        .expect("float exponent is a valid integer");
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let k = digits.len() as i32;
    let n = exp + 1; // position of the decimal point relative to `digits`

    if k <= n && n <= 21 {
        // Integer with trailing zeros: 123000
        let mut s = digits;
        s.extend(std::iter::repeat('0').take((n - k) as usize));
        s
    } else if 0 < n && n <= 21 {
        // Point inside the digits: 12.345
        format!("{}.{}", &digits[..n as usize], &digits[n as usize..])
    } else if -6 < n && n <= 0 {
        // Leading zeros: 0.0012345
        let zeros: String = std::iter::repeat('0').take((-n) as usize).collect();
        format!("0.{zeros}{digits}")
    } else {
        // Exponential: 1.2345e+30 / 5e-7
        let e = n - 1;
        let sign = if e >= 0 { "+" } else { "-" };
        if digits.len() == 1 {
            format!("{digits}e{sign}{}", e.abs())
        } else {
            format!("{}.{}e{sign}{}", &digits[..1], &digits[1..], e.abs())
        }
    }
}
