//! Id <-> filename codec
//!
//! Filename format:
//! ```text
//! _<base64(json(id)) with '+' -> "_p", '=' -> "_e", '/' -> "_f">
//! ```
//!
//! The standard base64 alphabet never contains `_`, so every escape is
//! unambiguous and decoding is an exact inverse.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;

/// Leading character of every entry filename
pub const FILENAME_PREFIX: char = '_';

const ESCAPES: [(char, &str); 3] = [('+', "_p"), ('=', "_e"), ('/', "_f")];

/// Map a JSON id onto a cache key.
///
/// Strings pass through; every other JSON value collapses onto the empty key.
pub fn normalize_id(id: &Value) -> &str {
    match id {
        Value::String(s) => s,
        _ => "",
    }
}

/// Encode an id into a filesystem-safe filename
pub fn encode(id: &str) -> String {
    // Serializing a str cannot fail
    let json = serde_json::to_string(id).unwrap_or_else(|_| String::from("\"\""));
    let b64 = STANDARD.encode(json.as_bytes());

    let mut filename = String::with_capacity(b64.len() + 8);
    filename.push(FILENAME_PREFIX);
    for c in b64.chars() {
        match ESCAPES.iter().find(|(raw, _)| *raw == c) {
            Some((_, escaped)) => filename.push_str(escaped),
            None => filename.push(c),
        }
    }
    filename
}

/// Decode a filename produced by [`encode`].
///
/// Anything that does not decode to a JSON string yields the empty id.
pub fn decode(filename: &str) -> String {
    try_decode(filename).unwrap_or_default()
}

fn try_decode(filename: &str) -> Option<String> {
    let body = filename.strip_prefix(FILENAME_PREFIX)?;

    let mut b64 = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '_' {
            b64.push(c);
            continue;
        }
        let raw = match chars.next()? {
            'p' => '+',
            'e' => '=',
            'f' => '/',
            _ => return None,
        };
        b64.push(raw);
    }

    let bytes = STANDARD.decode(b64.as_bytes()).ok()?;
    match serde_json::from_slice::<Value>(&bytes).ok()? {
        Value::String(id) => Some(id),
        _ => None,
    }
}
