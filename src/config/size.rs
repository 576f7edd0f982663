use crate::error::{Result, TetherError};
use serde::{Deserialize, Serialize};

const KB: u64 = 1_000;
const MB: u64 = KB * 1_000;
const GB: u64 = MB * 1_000;

/// Memory threshold as written in the config: `"500M"` or a raw byte count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MemoryThreshold {
    Bytes(u64),
    Text(String),
}

impl MemoryThreshold {
    pub fn to_bytes(&self) -> Result<u64> {
        match self {
            MemoryThreshold::Bytes(0) => Err(TetherError::InvalidMemorySize(
                "0".to_string(),
                "threshold must be at least one byte".to_string(),
            )),
            MemoryThreshold::Bytes(bytes) => Ok(*bytes),
            MemoryThreshold::Text(text) => parse_memory_size(text),
        }
    }
}

/// Parse a human memory size such as `500M`, `1.5G` or `2048K` into bytes.
///
/// Units are decimal (K = 1 000, M = 1 000 000, G = 1 000 000 000) and
/// case-insensitive; an optional trailing `B` is accepted (`MB`).
pub fn parse_memory_size(input: &str) -> Result<u64> {
    let invalid =
        |reason: &str| TetherError::InvalidMemorySize(input.to_string(), reason.to_string());

    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty value"));
    }

    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    if number.is_empty() {
        return Err(invalid("missing number"));
    }

    let value: f64 = number.parse().map_err(|_| invalid("not a number"))?;

    let multiplier = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" => KB,
        "M" | "MB" => MB,
        "G" | "GB" => GB,
        other => return Err(invalid(&format!("unknown unit '{}'", other))),
    };

    let bytes = (value * multiplier as f64).round();
    if bytes < 1.0 {
        return Err(invalid("threshold must be at least one byte"));
    }
    // `u64::MAX as f64` rounds up to 2^64, which does not fit
    if !bytes.is_finite() || bytes >= u64::MAX as f64 {
        return Err(invalid("threshold is too large"));
    }

    Ok(bytes as u64)
}
