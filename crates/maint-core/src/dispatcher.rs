//! Job Dispatcher: turns one [`Action`] into exactly one remote job.
//!
//! Submission is never retried locally. A rejected call becomes
//! [`MaintError::Submission`]; classifying it is left to the caller.

use crate::action::{Action, ActionKind, Job};
use crate::api::FleetApi;
use crate::error::{MaintError, Result};
use tracing::debug;

pub struct Dispatcher<'a> {
    api: &'a dyn FleetApi,
}

impl<'a> Dispatcher<'a> {
    pub fn new(api: &'a dyn FleetApi) -> Self {
        Self { api }
    }

    pub fn submit(&self, action: &Action) -> Result<Job> {
        let system = action.system_id;
        if system.0 == 0 {
            return Err(MaintError::Submission {
                action: action.kind.to_string(),
                system_id: 0,
                message: "system id is not resolved".to_string(),
            });
        }
        let at = action.scheduled_at;
        let api = self.api;

        let submitted = match &action.kind {
            ActionKind::ApplyErrata { errata_ids } => api.submit_errata(system, errata_ids, at),
            ActionKind::InstallPackages { package_ids } => {
                api.submit_package_install(system, package_ids, at)
            }
            ActionKind::RunScript {
                user,
                group,
                timeout_seconds,
                body,
            } => api.submit_script_run(system, user, group, *timeout_seconds, body, at),
            ActionKind::ApplyHighstate { test } => api.submit_highstate(system, at, *test),
            ActionKind::Reboot => api.submit_reboot(system, at),
            ActionKind::RefreshHardware => api.submit_hardware_refresh(system, at),
            ActionKind::RefreshPackages => api.submit_package_refresh(system, at),
            ActionKind::Migrate {
                dry_run,
                target_ident,
                base_channel,
                child_channels,
            } => api.submit_migration(
                system,
                target_ident,
                base_channel,
                child_channels,
                *dry_run,
                at,
            ),
            ActionKind::ChangeChannels {
                base_channel,
                child_channels,
            } => api.submit_change_channels(system, base_channel, child_channels, at),
        };

        let id = submitted.map_err(|e| MaintError::Submission {
            action: action.label.clone(),
            system_id: system.0,
            message: e.to_string(),
        })?;
        debug!(job_id = %id, action = %action.kind, "submitted");
        Ok(Job::submitted(id, action.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::JobStatus;
    use crate::api::FakeApi;
    use crate::types::SystemId;
    use chrono::Utc;

    #[test]
    fn submit_returns_submitted_job() {
        let api = FakeApi::new().with_system(1000010000, "web01");
        let action = Action::new(
            SystemId(1000010000),
            "Errata update",
            ActionKind::ApplyErrata {
                errata_ids: vec![11, 12],
            },
            Utc::now(),
        );
        let job = Dispatcher::new(&api).submit(&action).unwrap();
        assert_eq!(job.status, JobStatus::Submitted);
        assert_eq!(job.action, action);
        assert_eq!(api.submitted_names(), vec!["apply_errata"]);
    }

    #[test]
    fn rejected_submission_is_not_retried() {
        let api = FakeApi::new()
            .with_system(1000010000, "web01")
            .rejecting("reboot");
        let action = Action::new(SystemId(1000010000), "Reboot", ActionKind::Reboot, Utc::now());
        let err = Dispatcher::new(&api).submit(&action).unwrap_err();
        assert!(matches!(err, MaintError::Submission { system_id: 1000010000, .. }));
        let submits = api
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("submit:"))
            .count();
        assert_eq!(submits, 1);
    }

    #[test]
    fn zero_system_id_is_rejected_locally() {
        let api = FakeApi::new();
        let action = Action::new(SystemId(0), "Reboot", ActionKind::Reboot, Utc::now());
        assert!(Dispatcher::new(&api).submit(&action).is_err());
        assert!(api.calls().is_empty());
    }
}
