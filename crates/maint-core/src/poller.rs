//! Progress Poller.
//!
//! Waits for a submitted job by sleeping and re-querying the remote
//! schedule. A single wait is bounded by the job timeout plus one wait
//! interval (plus retry backoff when status queries fail). There is no
//! cancellation; a wait ends in a terminal [`JobStatus`] or an error.
//!
//! Once a job leaves the in-progress set the failed set is consulted
//! before the completed set, so an ambiguous answer counts as a failure.

use crate::action::{Job, JobStatus};
use crate::api::FleetApi;
use crate::clock::{to_chrono, Clock};
use crate::config::Config;
use crate::error::{MaintError, Result};
use crate::types::{JobId, JobSystemStatus};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub wait_interval: Duration,
    pub timeout: Duration,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
}

impl PollSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            wait_interval: Duration::from_secs(config.maintenance.wait_between_events_check),
            timeout: config.server.job_timeout(),
            retry_attempts: config.maintenance.poll_retry_attempts.max(1),
            retry_backoff: Duration::from_secs(config.maintenance.poll_retry_backoff_seconds),
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            wait_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(3600),
            retry_attempts: 3,
            retry_backoff: Duration::from_secs(10),
        }
    }
}

pub struct Poller<'a> {
    api: &'a dyn FleetApi,
    clock: &'a dyn Clock,
    settings: PollSettings,
}

impl<'a> Poller<'a> {
    pub fn new(api: &'a dyn FleetApi, clock: &'a dyn Clock, settings: PollSettings) -> Self {
        Self {
            api,
            clock,
            settings,
        }
    }

    /// Block until `job` reaches a terminal status.
    ///
    /// Returns `PollingExhausted` when a status query keeps failing; the job
    /// is marked `Failed` with the exhaustion message first.
    pub fn wait(&self, job: &mut Job) -> Result<()> {
        job.transition(JobStatus::Polling)?;
        match self.poll(job) {
            Err(e @ MaintError::PollingExhausted { .. }) => {
                job.transition(JobStatus::Failed)?;
                job.message = e.to_string();
                Err(e)
            }
            other => other,
        }
    }

    fn poll(&self, job: &mut Job) -> Result<()> {
        let started = self.clock.now();
        let timeout = to_chrono(self.settings.timeout);

        loop {
            self.clock.sleep(self.settings.wait_interval);
            let pending = self.query(job.id, |id| self.api.query_in_progress(id))?;
            if pending.is_empty() {
                break;
            }
            let elapsed = self.clock.now() - started;
            debug!(
                job_id = %job.id,
                elapsed_seconds = elapsed.num_seconds(),
                "job still in progress"
            );
            if elapsed >= timeout {
                job.transition(JobStatus::TimedOut)?;
                job.message = format!(
                    "still in progress after {}s",
                    self.settings.timeout.as_secs()
                );
                return Ok(());
            }
        }

        let failed = self.query(job.id, |id| self.api.query_failed(id))?;
        if let Some(row) = failed.first() {
            job.transition(JobStatus::Failed)?;
            job.message = row.message.clone();
            return Ok(());
        }

        let completed = self.query(job.id, |id| self.api.query_completed(id))?;
        if let Some(row) = completed.first() {
            job.transition(JobStatus::Completed)?;
            job.message = row.message.clone();
        } else {
            job.transition(JobStatus::Failed)?;
            job.message = "job is neither completed nor failed on the server".to_string();
        }
        Ok(())
    }

    fn query<F>(&self, job: JobId, call: F) -> Result<Vec<JobSystemStatus>>
    where
        F: Fn(JobId) -> Result<Vec<JobSystemStatus>>,
    {
        let attempts = self.settings.retry_attempts;
        for attempt in 1..=attempts {
            match call(job) {
                Ok(rows) => return Ok(rows),
                Err(e) => {
                    let transient = MaintError::PollingTransient {
                        job_id: job.0,
                        message: e.to_string(),
                    };
                    warn!(attempt, attempts, "{transient}");
                    if attempt < attempts {
                        self.clock.sleep(self.settings.retry_backoff);
                    }
                }
            }
        }
        Err(MaintError::PollingExhausted {
            job_id: job.0,
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ActionKind};
    use crate::api::fake::FakeOutcome;
    use crate::api::FakeApi;
    use crate::clock::FakeClock;
    use crate::dispatcher::Dispatcher;
    use crate::types::SystemId;

    const SID: i64 = 1000010000;

    fn settings() -> PollSettings {
        PollSettings {
            wait_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(100),
            retry_attempts: 3,
            retry_backoff: Duration::from_secs(10),
        }
    }

    fn submit(api: &FakeApi, kind: ActionKind) -> Job {
        let action = Action::new(SystemId(SID), "step", kind, chrono::Utc::now());
        Dispatcher::new(api).submit(&action).unwrap()
    }

    #[test]
    fn completed_job() {
        let api = FakeApi::new().with_system(SID, "web01").with_polls_before_done(2);
        let clock = FakeClock::default();
        let mut job = submit(&api, ActionKind::RefreshPackages);

        Poller::new(&api, &clock, settings()).wait(&mut job).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        // sleep first, then two more rounds while still in progress
        assert_eq!(clock.sleeps().len(), 3);
    }

    #[test]
    fn failed_job_carries_message() {
        let api = FakeApi::new()
            .with_system(SID, "web01")
            .with_outcome("reboot", FakeOutcome::Fail("minion down".to_string()));
        let clock = FakeClock::default();
        let mut job = submit(&api, ActionKind::Reboot);

        Poller::new(&api, &clock, settings()).wait(&mut job).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.message, "minion down");
        let calls = api.calls();
        let failed_at = calls.iter().position(|c| c == "query_failed").unwrap();
        assert!(!calls[failed_at..].contains(&"query_completed".to_string()));
    }

    #[test]
    fn hanging_job_times_out_within_bound() {
        let api = FakeApi::new()
            .with_system(SID, "web01")
            .with_outcome("reboot", FakeOutcome::Hang);
        let clock = FakeClock::default();
        let mut job = submit(&api, ActionKind::Reboot);
        let s = settings();

        Poller::new(&api, &clock, s).wait(&mut job).unwrap();
        assert_eq!(job.status, JobStatus::TimedOut);
        assert!(clock.total_slept() >= s.timeout);
        assert!(clock.total_slept() <= s.timeout + s.wait_interval);
    }

    #[test]
    fn transient_query_errors_are_retried() {
        let api = FakeApi::new()
            .with_system(SID, "web01")
            .with_failing_queries(2);
        let clock = FakeClock::default();
        let mut job = submit(&api, ActionKind::RefreshHardware);

        Poller::new(&api, &clock, settings()).wait(&mut job).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        let backoffs = clock
            .sleeps()
            .iter()
            .filter(|d| **d == Duration::from_secs(10))
            .count();
        assert_eq!(backoffs, 2);
    }

    #[test]
    fn three_failed_queries_exhaust() {
        let api = FakeApi::new()
            .with_system(SID, "web01")
            .with_failing_queries(3);
        let clock = FakeClock::default();
        let mut job = submit(&api, ActionKind::RefreshHardware);

        let err = Poller::new(&api, &clock, settings())
            .wait(&mut job)
            .unwrap_err();
        assert!(matches!(err, MaintError::PollingExhausted { attempts: 3, .. }));
        assert!(err.is_fatal());
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.message, err.to_string());
    }

    #[test]
    fn huge_timeout_does_not_wrap() {
        let api = FakeApi::new().with_system(SID, "web01").with_polls_before_done(1);
        let clock = FakeClock::default();
        let mut job = submit(&api, ActionKind::RefreshPackages);
        let s = PollSettings {
            timeout: Duration::from_secs(u64::MAX),
            ..settings()
        };

        Poller::new(&api, &clock, s).wait(&mut job).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn settings_follow_config() {
        let mut config = Config::new("https://suma.example.com", "admin");
        config.maintenance.wait_between_events_check = 15;
        config.server.timeout_seconds = 600;
        let s = PollSettings::from_config(&config);
        assert_eq!(s.wait_interval, Duration::from_secs(15));
        assert_eq!(s.timeout, Duration::from_secs(600));
        assert_eq!(s.retry_attempts, 3);
    }
}
