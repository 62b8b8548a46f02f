//! Action and job data model.
//!
//! An `Action` is one remote maintenance step for one system: what to do
//! (`ActionKind` with its payload), when, and how a failure is classified.
//! Submitting an action yields a `Job`, whose status only moves forward:
//! `Submitted → Polling → Completed | Failed | TimedOut`.

use crate::error::{MaintError, Result};
use crate::severity::{category, Severity};
use crate::types::{JobId, SystemId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// ActionKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    ApplyErrata {
        errata_ids: Vec<i64>,
    },
    InstallPackages {
        package_ids: Vec<i64>,
    },
    RunScript {
        user: String,
        group: String,
        timeout_seconds: u64,
        body: String,
    },
    ApplyHighstate {
        test: bool,
    },
    Reboot,
    RefreshHardware,
    RefreshPackages,
    Migrate {
        dry_run: bool,
        target_ident: String,
        base_channel: String,
        child_channels: Vec<String>,
    },
    ChangeChannels {
        base_channel: String,
        child_channels: Vec<String>,
    },
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::ApplyErrata { .. } => "apply_errata",
            ActionKind::InstallPackages { .. } => "install_packages",
            ActionKind::RunScript { .. } => "run_script",
            ActionKind::ApplyHighstate { .. } => "apply_highstate",
            ActionKind::Reboot => "reboot",
            ActionKind::RefreshHardware => "refresh_hardware",
            ActionKind::RefreshPackages => "refresh_packages",
            ActionKind::Migrate { dry_run: true, .. } => "migrate_dry_run",
            ActionKind::Migrate { dry_run: false, .. } => "migrate",
            ActionKind::ChangeChannels { .. } => "change_channels",
        }
    }

    /// Error-policy category used when a job of this kind fails.
    pub fn default_category(&self) -> &'static str {
        match self {
            ActionKind::ApplyErrata { .. } => category::UPDATE,
            ActionKind::InstallPackages { .. } | ActionKind::Reboot => category::REBOOT,
            ActionKind::Migrate { .. } => category::SPMIG,
            ActionKind::RunScript { .. } => category::SCRIPT,
            ActionKind::ApplyHighstate { .. } => category::CONFIG_UPDATE,
            ActionKind::RefreshHardware | ActionKind::RefreshPackages => category::REFRESH,
            ActionKind::ChangeChannels { .. } => category::CHANNEL_CHANGE,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub system_id: SystemId,
    /// Operator-facing description, e.g. "Errata update".
    pub label: String,
    pub kind: ActionKind,
    pub scheduled_at: DateTime<Utc>,
    pub category: String,
    /// Fixed severity for a failed or timed-out job, replacing the policy
    /// lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity_override: Option<Severity>,
    /// A rejected submission is routed with `severity_override` instead of
    /// being fatal.
    #[serde(default)]
    pub best_effort: bool,
}

impl Action {
    pub fn new(
        system_id: SystemId,
        label: impl Into<String>,
        kind: ActionKind,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        let category = kind.default_category().to_string();
        Self {
            system_id,
            label: label.into(),
            kind,
            scheduled_at,
            category,
            severity_override: None,
            best_effort: false,
        }
    }

    /// Route job failures at `severity`; submission failures stay fatal.
    pub fn job_severity(mut self, severity: Severity) -> Self {
        self.severity_override = Some(severity);
        self
    }

    /// Route every failure of this action, submission included, at `severity`.
    pub fn best_effort(mut self, severity: Severity) -> Self {
        self.severity_override = Some(severity);
        self.best_effort = true;
        self
    }

    pub fn is_best_effort(&self) -> bool {
        self.best_effort
    }

    /// Severity of a rejected submission.
    pub fn submission_severity(&self) -> Severity {
        match self.severity_override {
            Some(severity) if self.is_best_effort() => severity,
            _ => Severity::Fatal,
        }
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Submitted,
    Polling,
    Completed,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Submitted => "submitted",
            JobStatus::Polling => "polling",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::TimedOut
        )
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Submitted, Polling) | (Polling, Completed) | (Polling, Failed) | (Polling, TimedOut)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub action: Action,
    pub status: JobStatus,
    #[serde(default)]
    pub message: String,
}

impl Job {
    pub fn submitted(id: JobId, action: Action) -> Self {
        Self {
            id,
            action,
            status: JobStatus::Submitted,
            message: String::new(),
        }
    }

    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(MaintError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(kind: ActionKind) -> Action {
        Action::new(SystemId(1000010000), "test", kind, Utc::now())
    }

    #[test]
    fn categories_follow_action_kind() {
        assert_eq!(
            action(ActionKind::ApplyErrata { errata_ids: vec![1] }).category,
            "update"
        );
        assert_eq!(
            action(ActionKind::InstallPackages { package_ids: vec![] }).category,
            "reboot"
        );
        assert_eq!(action(ActionKind::Reboot).category, "reboot");
        assert_eq!(action(ActionKind::ApplyHighstate { test: false }).category, "configupdate");
    }

    #[test]
    fn best_effort_sets_override() {
        let a = action(ActionKind::RefreshPackages).best_effort(Severity::Warning);
        assert!(a.is_best_effort());
        assert_eq!(a.severity_override, Some(Severity::Warning));
        assert_eq!(a.submission_severity(), Severity::Warning);
    }

    #[test]
    fn job_severity_keeps_submission_fatal() {
        let a = action(ActionKind::ApplyErrata { errata_ids: vec![1] })
            .job_severity(Severity::Error);
        assert!(!a.is_best_effort());
        assert_eq!(a.severity_override, Some(Severity::Error));
        assert_eq!(a.submission_severity(), Severity::Fatal);
        assert_eq!(
            action(ActionKind::Reboot).submission_severity(),
            Severity::Fatal
        );
    }

    #[test]
    fn job_transitions_are_monotonic() {
        let mut job = Job::submitted(JobId(7), action(ActionKind::Reboot));
        assert!(job.transition(JobStatus::Completed).is_err());
        job.transition(JobStatus::Polling).unwrap();
        job.transition(JobStatus::Failed).unwrap();
        assert!(job.status.is_terminal());
        assert!(job.transition(JobStatus::Polling).is_err());
        assert!(job.transition(JobStatus::Completed).is_err());
    }

    #[test]
    fn action_kind_json_tagged() {
        let kind = ActionKind::Migrate {
            dry_run: true,
            target_ident: "[base-sles15-sp5]".to_string(),
            base_channel: "sles15-sp5-pool-x86_64".to_string(),
            child_channels: vec![],
        };
        let json = serde_json::to_string(&kind).unwrap();
        assert!(json.contains("\"type\":\"migrate\""));
        assert_eq!(kind.as_str(), "migrate_dry_run");
    }
}
