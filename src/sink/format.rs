//! Line encodings for the results file.
//!
//! `plain` writes `<payload> <body>` with backslash escapes so every record
//! stays on one line: `\\`, `\n` and `\r` in both fields, plus `\s` for a
//! space inside the payload. The first literal space is always the
//! separator. `jsonl` writes one `{"input": ..., "body": ...}` object per line.

use serde::Serialize;

use crate::error::Result;
use crate::models::Payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkFormat {
    #[default]
    Plain,
    JsonLines,
}

impl SinkFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "plain" | "text" => Some(Self::Plain),
            "jsonl" | "ndjson" | "json" => Some(Self::JsonLines),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::JsonLines => "jsonl",
        }
    }

    /// Encode one record, trailing newline included
    pub fn encode(&self, payload: &Payload, body: &str) -> Result<String> {
        let mut line = match self {
            Self::Plain => format!(
                "{} {}",
                escape_field(payload.as_str(), true),
                escape_field(body, false)
            ),
            Self::JsonLines => serde_json::to_string(&JsonRecord {
                input: payload.as_str(),
                body,
            })?,
        };
        line.push('\n');
        Ok(line)
    }
}

impl std::fmt::Display for SinkFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    input: &'a str,
    body: &'a str,
}

fn escape_field(value: &str, escape_space: bool) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ' ' if escape_space => out.push_str("\\s"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_field(value: &str) -> Option<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            '\\' => out.push('\\'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            's' => out.push(' '),
            _ => return None,
        }
    }
    Some(out)
}

/// Split a `plain` line back into `(payload, body)`.
///
/// Returns `None` for lines that were not written by [`SinkFormat::Plain`].
pub fn decode_plain_line(line: &str) -> Option<(String, String)> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let (payload, body) = line.split_once(' ')?;
    Some((unescape_field(payload)?, unescape_field(body)?))
}
