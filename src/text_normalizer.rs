//! Text repair for anything entering or leaving the generation pipeline:
//! lesson text, PDF text layers and raw model completions.
//!
//! The same fixed policy is applied everywhere. Output is always valid UTF-8,
//! free of control characters other than `\n` and `\t`, uses `\n` line
//! endings and is trimmed.
//!
//! Code points outside the Basic Multilingual Plane (emoji, rare symbol
//! planes) are dropped on purpose. Storage columns downstream only accept
//! characters that fit in three UTF-8 bytes, so this lossy step is a known
//! tradeoff rather than a bug.

use encoding_rs::WINDOWS_1252;
use serde::Serialize;
use serde_json::Value;

/// Encodings recognised when decoding raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEncoding {
    Utf8,
    /// Windows-1252, a superset of the printable ISO-8859-1 range.
    Windows1252,
}

type Pass = fn(&str) -> String;

/// Repair passes run, in order, over already-decoded text. NUL is a control
/// character, so the first pass also covers stray zero bytes.
const PASSES: &[(&str, Pass)] = &[
    ("strip_control_characters", strip_control_characters),
    ("replace_problem_characters", replace_problem_characters),
    ("normalize_line_endings", normalize_line_endings),
    ("strip_supplementary_planes", strip_supplementary_planes),
    ("trim", trim),
];

/// Normalize a string. Never fails; empty input yields an empty string.
pub fn normalize(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    PASSES
        .iter()
        .fold(text.to_string(), |current, (_, pass)| pass(&current))
}

/// Normalize an optional string, mapping `None` to `""`.
pub fn normalize_optional(text: Option<&str>) -> String {
    text.map(normalize).unwrap_or_default()
}

/// Decode raw bytes of unknown encoding, then normalize them.
pub fn normalize_bytes(raw: &[u8]) -> String {
    if raw.is_empty() {
        return String::new();
    }
    normalize(&decode_canonical(raw))
}

/// Recursively normalize every string leaf of a JSON value. Object keys,
/// numbers, booleans and nulls are left untouched.
pub fn deep_normalize(value: Value) -> Value {
    match value {
        Value::String(text) => Value::String(normalize(&text)),
        Value::Array(items) => Value::Array(items.into_iter().map(deep_normalize).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, deep_normalize(value)))
                .collect(),
        ),
        other => other,
    }
}

/// Serialize a payload and sanitize it before it goes out on the wire.
pub fn deep_normalize_payload<T: Serialize>(payload: &T) -> serde_json::Result<Value> {
    serde_json::to_value(payload).map(deep_normalize)
}

/// Guess the encoding of raw bytes.
///
/// Valid UTF-8 is UTF-8. Otherwise, bytes that still contain well-formed
/// multi-byte UTF-8 sequences are treated as damaged UTF-8; anything else is
/// read as a legacy 8-bit Western encoding.
pub fn detect_encoding(raw: &[u8]) -> SourceEncoding {
    if std::str::from_utf8(raw).is_ok() {
        return SourceEncoding::Utf8;
    }

    let has_multibyte = raw
        .utf8_chunks()
        .any(|chunk| chunk.valid().chars().any(|c| c.len_utf8() > 1));

    if has_multibyte {
        SourceEncoding::Utf8
    } else {
        SourceEncoding::Windows1252
    }
}

/// Transcode raw bytes into UTF-8, dropping whatever cannot be decoded.
pub fn decode_canonical(raw: &[u8]) -> String {
    match detect_encoding(raw) {
        SourceEncoding::Utf8 => drop_invalid_utf8(raw),
        SourceEncoding::Windows1252 => {
            let (decoded, _) = WINDOWS_1252.decode_without_bom_handling(raw);
            // Second pass through UTF-8 keeps the output free of any
            // sequence the transcoder may have let through.
            drop_invalid_utf8(decoded.as_bytes())
        }
    }
}

fn drop_invalid_utf8(raw: &[u8]) -> String {
    raw.utf8_chunks().map(|chunk| chunk.valid()).collect()
}

fn strip_control_characters(text: &str) -> String {
    // CR survives here so that line endings can be normalized afterwards.
    text.chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t' | '\r'))
        .collect()
}

fn replace_problem_characters(text: &str) -> String {
    text.chars()
        .filter_map(|c| match c {
            '\u{00A0}' => Some(' '),
            '\u{FEFF}' => None,
            other => Some(other),
        })
        .collect()
}

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn strip_supplementary_planes(text: &str) -> String {
    text.chars().filter(|c| (*c as u32) <= 0xFFFF).collect()
}

fn trim(text: &str) -> String {
    text.trim().to_string()
}
