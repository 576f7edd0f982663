use crate::error::{Result, TetherError};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, TimeZone};
use std::fmt::Display;

/// Moment-style tokens, longest first so `YYYY` wins over `YY`
const TOKENS: &[(&str, &str)] = &[
    ("YYYY", "%Y"),
    ("SSS", "%3f"),
    ("YY", "%y"),
    ("MM", "%m"),
    ("DD", "%d"),
    ("HH", "%H"),
    ("hh", "%I"),
    ("mm", "%M"),
    ("ss", "%S"),
    ("ZZ", "%z"),
    ("M", "%-m"),
    ("D", "%-d"),
    ("H", "%-H"),
    ("h", "%-I"),
    ("m", "%-M"),
    ("s", "%-S"),
    ("A", "%p"),
    ("a", "%P"),
    ("Z", "%:z"),
];

/// Line timestamp format for the log router.
///
/// Accepts either a moment-style pattern (`YYYY-MM-DD HH:mm:ss`, the
/// PM2 convention) or a chrono strftime pattern containing `%`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampFormat {
    pattern: String,
}

impl TimestampFormat {
    pub fn parse(input: &str) -> Result<Self> {
        let pattern = if input.contains('%') {
            input.to_string()
        } else {
            translate_moment(input)
        };

        if StrftimeItems::new(&pattern).any(|item| matches!(item, Item::Error)) {
            return Err(TetherError::ConfigValidationError(format!(
                "Invalid log_date_format: {}",
                input
            )));
        }

        Ok(Self { pattern })
    }

    pub fn format<Tz>(&self, at: &DateTime<Tz>) -> String
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        at.format(&self.pattern).to_string()
    }
}

fn translate_moment(input: &str) -> String {
    let mut out = String::with_capacity(input.len() * 2);
    let mut rest = input;

    'outer: while let Some(c) = rest.chars().next() {
        // [literal text]
        if c == '[' {
            if let Some(end) = rest.find(']') {
                out.push_str(&rest[1..end].replace('%', "%%"));
                rest = &rest[end + 1..];
                continue;
            }
        }

        for (token, strftime) in TOKENS {
            if rest.starts_with(token) {
                out.push_str(strftime);
                rest = &rest[token.len()..];
                continue 'outer;
            }
        }

        out.push(c);
        rest = &rest[c.len_utf8()..];
    }

    out
}
