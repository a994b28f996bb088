//! Per-group bad-channel handling
//!
//! `remove_bad_emg_chans` accepts booleans or strings:
//!
//! | value             | meaning                                      |
//! |-------------------|----------------------------------------------|
//! | `false`           | detect with `mad` and report, keep channels  |
//! | `true`            | detect with `mad` and remove                 |
//! | `"mad"`, `"std"`  | detect with that method and remove           |
//! | `"mad3.5"`        | same, with an explicit threshold             |
//! | `"none"`          | skip detection entirely                      |

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Statistic used to flag a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BadChannelMethod {
    Mad,
    Std,
    CoherencePsd,
}

impl BadChannelMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BadChannelMethod::Mad => "mad",
            BadChannelMethod::Std => "std",
            BadChannelMethod::CoherencePsd => "coherence+psd",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name {
            "mad" => Some(BadChannelMethod::Mad),
            "std" => Some(BadChannelMethod::Std),
            "coherence+psd" => Some(BadChannelMethod::CoherencePsd),
            _ => None,
        }
    }
}

impl fmt::Display for BadChannelMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PolicyRepr", into = "PolicyRepr")]
pub enum BadChannelPolicy {
    /// Detect and report, keep every channel
    Off,
    /// Detect with the method's default threshold and remove
    Auto(BadChannelMethod),
    /// Detect with an explicit threshold and remove
    Threshold(BadChannelMethod, f64),
    /// No detection at all
    Disabled,
}

impl BadChannelPolicy {
    pub const DEFAULT_THRESHOLD: f64 = 5.0;

    /// Parse the string form (`"mad"`, `"std2.5"`, `"none"`, ...)
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("none") || value.eq_ignore_ascii_case("disabled") {
            return Ok(BadChannelPolicy::Disabled);
        }

        let split = value
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(value.len());
        let (name, number) = value.split_at(split);

        let method = BadChannelMethod::parse(name).ok_or_else(|| {
            Error::Config(format!(
                "Unknown bad channel method '{}' (expected mad, std or coherence+psd)",
                name
            ))
        })?;

        if number.is_empty() {
            return Ok(BadChannelPolicy::Auto(method));
        }

        if method == BadChannelMethod::CoherencePsd {
            return Err(Error::Config(format!(
                "Bad channel method 'coherence+psd' does not take a threshold (got '{}')",
                value
            )));
        }

        let threshold: f64 = number.parse().map_err(|_| {
            Error::Config(format!("Invalid bad channel threshold in '{}'", value))
        })?;
        if !(threshold > 0.0) {
            return Err(Error::Config(format!(
                "Bad channel threshold must be positive (got '{}')",
                value
            )));
        }

        Ok(BadChannelPolicy::Threshold(method, threshold))
    }

    /// Detection method and threshold, `None` when detection is disabled
    pub fn detection(&self) -> Option<(BadChannelMethod, f64)> {
        match *self {
            BadChannelPolicy::Off => Some((BadChannelMethod::Mad, Self::DEFAULT_THRESHOLD)),
            BadChannelPolicy::Auto(method) => Some((method, Self::DEFAULT_THRESHOLD)),
            BadChannelPolicy::Threshold(method, threshold) => Some((method, threshold)),
            BadChannelPolicy::Disabled => None,
        }
    }

    /// Whether detected channels are dropped from the group
    pub fn removes_channels(&self) -> bool {
        matches!(
            self,
            BadChannelPolicy::Auto(_) | BadChannelPolicy::Threshold(_, _)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum PolicyRepr {
    Flag(bool),
    Text(String),
}

impl TryFrom<PolicyRepr> for BadChannelPolicy {
    type Error = String;

    fn try_from(repr: PolicyRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            PolicyRepr::Flag(true) => Ok(BadChannelPolicy::Auto(BadChannelMethod::Mad)),
            PolicyRepr::Flag(false) => Ok(BadChannelPolicy::Off),
            PolicyRepr::Text(text) => BadChannelPolicy::parse(&text).map_err(|e| e.to_string()),
        }
    }
}

impl From<BadChannelPolicy> for PolicyRepr {
    fn from(policy: BadChannelPolicy) -> Self {
        match policy {
            BadChannelPolicy::Off => PolicyRepr::Flag(false),
            BadChannelPolicy::Auto(BadChannelMethod::Mad) => PolicyRepr::Flag(true),
            BadChannelPolicy::Auto(method) => PolicyRepr::Text(method.as_str().to_string()),
            BadChannelPolicy::Threshold(method, threshold) => {
                PolicyRepr::Text(format!("{}{}", method, threshold))
            }
            BadChannelPolicy::Disabled => PolicyRepr::Text("none".to_string()),
        }
    }
}
