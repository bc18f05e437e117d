//! CPU and memory quantities in Kubernetes notation.
//!
//! Supported forms:
//! - cores: `"2"`, `"0.5"`, `"500m"`
//! - bytes: `"1073741824"`, `"512Mi"`, `"1Gi"`, `"1024Ki"`, `"1G"`
//!
//! Values may be wrapped in double quotes, as they are when taken verbatim
//! from a JSON document.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::UnitError;

const MILLICORES_PER_CORE: i64 = 1000;

const KIBIBYTE: f64 = 1024.0;
const MEBIBYTE: f64 = KIBIBYTE * 1024.0;
const GIBIBYTE: f64 = MEBIBYTE * 1024.0;
const TEBIBYTE: f64 = GIBIBYTE * 1024.0;

fn unquote(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

fn parse_number(s: &str) -> Option<f64> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    s.parse::<f64>().ok()
}

/// A CPU quantity, stored as millicores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cores {
    millicores: i64,
}

impl Cores {
    /// Create a quantity from millicores.
    pub const fn from_millicores(millicores: i64) -> Self {
        Self { millicores }
    }

    /// Parse a quantity such as `"500m"` or `"2"`.
    pub fn parse(s: &str) -> Result<Self, UnitError> {
        let raw = unquote(s);
        if raw.is_empty() {
            return Err(UnitError::Empty);
        }

        let invalid = || UnitError::InvalidCores(s.to_string());

        if let Some(milli) = raw.strip_suffix('m') {
            if milli.is_empty() || !milli.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid());
            }
            let millicores = milli.parse::<i64>().map_err(|_| invalid())?;
            return Ok(Self { millicores });
        }

        let cores = parse_number(raw).ok_or_else(invalid)?;
        Ok(Self {
            millicores: (cores * MILLICORES_PER_CORE as f64).round() as i64,
        })
    }

    pub fn millicores(&self) -> i64 {
        self.millicores
    }

    /// Fractional number of cores.
    pub fn cores(&self) -> f64 {
        self.millicores as f64 / MILLICORES_PER_CORE as f64
    }

    pub fn is_zero(&self) -> bool {
        self.millicores == 0
    }
}

impl FromStr for Cores {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Cores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}m", self.millicores)
    }
}

/// A memory quantity, stored as bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Bytes {
    bytes: u64,
}

impl Bytes {
    pub const fn from_bytes(bytes: u64) -> Self {
        Self { bytes }
    }

    /// Parse a quantity such as `"512Mi"` or `"1Gi"`.
    pub fn parse(s: &str) -> Result<Self, UnitError> {
        let raw = unquote(s);
        if raw.is_empty() {
            return Err(UnitError::Empty);
        }

        let split = raw
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(raw.len());
        let (number, suffix) = raw.split_at(split);

        let value = parse_number(number).ok_or_else(|| UnitError::InvalidBytes(s.to_string()))?;
        let multiplier = match suffix {
            "" => 1.0,
            "Ki" => KIBIBYTE,
            "Mi" => MEBIBYTE,
            "Gi" => GIBIBYTE,
            "Ti" => TEBIBYTE,
            "K" | "k" => 1e3,
            "M" => 1e6,
            "G" => 1e9,
            "T" => 1e12,
            _ => return Err(UnitError::InvalidBytes(s.to_string())),
        };

        Ok(Self {
            bytes: (value * multiplier) as u64,
        })
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn mebibytes(&self) -> f64 {
        self.bytes as f64 / MEBIBYTE
    }

    pub fn gibibytes(&self) -> f64 {
        self.bytes as f64 / GIBIBYTE
    }

    pub fn is_zero(&self) -> bool {
        self.bytes == 0
    }
}

impl FromStr for Bytes {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Mi", self.mebibytes() as u64)
    }
}
