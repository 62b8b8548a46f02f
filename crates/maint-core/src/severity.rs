//! Error severity routing.
//!
//! Every failure observed during a run is classified through an
//! [`ErrorRouter`] which looks the failure's category up in the
//! [`ErrorPolicy`] and decides whether the run continues.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{error, warn};

/// Well-known error categories used by the orchestrator.
pub mod category {
    pub const UPDATE: &str = "update";
    pub const REBOOT: &str = "reboot";
    pub const SPMIG: &str = "spmig";
    pub const SCRIPT: &str = "script";
    pub const CONFIG_UPDATE: &str = "configupdate";
    pub const TIMEOUT_PASSED: &str = "timeout_passed";
    pub const REFRESH: &str = "refresh";
    pub const CHANNEL_CHANGE: &str = "channelchange";
    pub const PRECONDITION: &str = "precondition";
    pub const SUBMISSION: &str = "submission";
    pub const POLLING: &str = "polling";
    pub const REMOTE: &str = "remote";

    pub const ALL: &[&str] = &[
        UPDATE,
        REBOOT,
        SPMIG,
        SCRIPT,
        CONFIG_UPDATE,
        TIMEOUT_PASSED,
        REFRESH,
        CHANNEL_CHANGE,
    ];
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Fatal,
    Error,
    Warning,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Fatal => "fatal",
            Severity::Error => "error",
            Severity::Warning => "warning",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fatal" => Ok(Severity::Fatal),
            "error" | "minor" => Ok(Severity::Error),
            "warning" => Ok(Severity::Warning),
            other => Err(format!(
                "unknown severity '{other}', should be fatal, error or warning"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// ErrorPolicy
// ---------------------------------------------------------------------------

/// Category → severity, as configured under `error_handling`.
///
/// Values stay raw strings so a typo in the config degrades to `fatal`
/// at lookup time instead of rejecting the whole file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorPolicy {
    entries: HashMap<String, String>,
}

impl ErrorPolicy {
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }

    pub fn set(&mut self, category: impl Into<String>, severity: Severity) {
        self.entries
            .insert(category.into(), severity.as_str().to_string());
    }

    /// Resolve the severity for `category`. Anything not configured, or
    /// configured with an unknown severity, is `fatal`.
    pub fn severity(&self, category: &str) -> Severity {
        match self.entries.get(category) {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                warn!(category, "{e}; assuming fatal");
                Severity::Fatal
            }),
            None => Severity::Fatal,
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// ---------------------------------------------------------------------------
// ErrorRouter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedError {
    pub category: String,
    pub severity: Severity,
    pub message: String,
}

/// Classifies failures and accumulates the run's error buffer.
#[derive(Debug)]
pub struct ErrorRouter {
    policy: ErrorPolicy,
    buffer: Vec<RecordedError>,
}

impl ErrorRouter {
    pub fn new(policy: ErrorPolicy) -> Self {
        Self {
            policy,
            buffer: Vec::new(),
        }
    }

    /// Classify a failure by its category's configured severity.
    pub fn handle(&mut self, category: &str, message: &str) -> Verdict {
        let severity = self.policy.severity(category);
        self.handle_as(severity, category, message)
    }

    /// Classify a failure with an explicit severity, bypassing the policy.
    pub fn handle_as(&mut self, severity: Severity, category: &str, message: &str) -> Verdict {
        match severity {
            Severity::Fatal => {
                error!(category, "{message}");
                self.push(severity, category, message);
                Verdict::Abort
            }
            Severity::Error => {
                error!(category, "{message}");
                self.push(severity, category, message);
                Verdict::Continue
            }
            Severity::Warning => {
                warn!(category, "{message}");
                Verdict::Continue
            }
        }
    }

    /// Record a recoverable error that has no policy category.
    pub fn record_error(&mut self, category: &str, message: &str) {
        self.handle_as(Severity::Error, category, message);
    }

    fn push(&mut self, severity: Severity, category: &str, message: &str) {
        self.buffer.push(RecordedError {
            category: category.to_string(),
            severity,
            message: message.to_string(),
        });
    }

    pub fn errors(&self) -> &[RecordedError] {
        &self.buffer
    }

    pub fn has_errors(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn into_errors(self) -> Vec<RecordedError> {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_category_is_fatal() {
        let policy = ErrorPolicy::default();
        assert_eq!(policy.severity("does_not_exist"), Severity::Fatal);
    }

    #[test]
    fn unconfigured_known_categories_are_fatal() {
        let policy = ErrorPolicy::default();
        for cat in category::ALL {
            assert_eq!(policy.severity(cat), Severity::Fatal, "{cat}");
        }
    }

    #[test]
    fn configured_value_wins() {
        let mut policy = ErrorPolicy::default();
        policy.set(category::REBOOT, Severity::Warning);
        assert_eq!(policy.severity(category::REBOOT), Severity::Warning);
        assert_eq!(policy.severity(category::SCRIPT), Severity::Fatal);
    }

    #[test]
    fn misspelled_severity_degrades_to_fatal() {
        let mut entries = HashMap::new();
        entries.insert("script".to_string(), "warn".to_string());
        let policy = ErrorPolicy::new(entries);
        assert_eq!(policy.severity("script"), Severity::Fatal);
    }

    #[test]
    fn severity_parse_accepts_minor_alias() {
        assert_eq!("Minor".parse::<Severity>().unwrap(), Severity::Error);
        assert_eq!(" WARNING ".parse::<Severity>().unwrap(), Severity::Warning);
        assert!("loud".parse::<Severity>().is_err());
    }

    #[test]
    fn router_buffers_errors_not_warnings() {
        let mut policy = ErrorPolicy::default();
        policy.set("a", Severity::Error);
        policy.set("b", Severity::Warning);
        let mut router = ErrorRouter::new(policy);

        assert_eq!(router.handle("a", "first"), Verdict::Continue);
        assert_eq!(router.handle("b", "second"), Verdict::Continue);
        assert_eq!(router.errors().len(), 1);
        assert_eq!(router.errors()[0].message, "first");
    }

    #[test]
    fn router_fatal_aborts_and_records() {
        let mut router = ErrorRouter::new(ErrorPolicy::default());
        assert_eq!(router.handle(category::SPMIG, "boom"), Verdict::Abort);
        assert!(router.has_errors());
        assert_eq!(router.errors()[0].severity, Severity::Fatal);
    }

    #[test]
    fn policy_yaml_is_a_plain_map() {
        let yaml = "update: fatal\nreboot: warning\n";
        let policy: ErrorPolicy = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(policy.severity("update"), Severity::Fatal);
        assert_eq!(policy.severity("reboot"), Severity::Warning);
    }
}
