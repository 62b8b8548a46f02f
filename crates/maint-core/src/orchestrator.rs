//! Upgrade Workflow Orchestrator.
//!
//! Drives one target through a full maintenance run:
//!
//! ```text
//! preconditions → begin script → apply config → decide
//!     → patch | migrate → end script → apply config → reboot decision
//! ```
//!
//! Every step is dispatched, then polled to a terminal status before the
//! next one starts. Failures go through the [`ErrorRouter`]; a fatal
//! verdict stops the run and no further action is dispatched.

use crate::action::{Action, ActionKind, JobStatus};
use crate::api::FleetApi;
use crate::clock::Clock;
use crate::config::Config;
use crate::decision::{self, Decision, MigrationPlan};
use crate::dispatcher::Dispatcher;
use crate::error::{MaintError, Result};
use crate::poller::{PollSettings, Poller};
use crate::scripts::{self, Phase};
use crate::session::SessionGuard;
use crate::severity::{category, ErrorRouter, RecordedError, Severity, Verdict};
use crate::target::lookup_target;
use crate::types::{JobId, TargetSystem};
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, info_span};

const SCRIPT_USER: &str = "root";
const SCRIPT_GROUP: &str = "root";
const REMOVAL_SCRIPT_TIMEOUT: u64 = 60;

// ---------------------------------------------------------------------------
// Flags, state, report
// ---------------------------------------------------------------------------

/// Operator choices for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkflowFlags {
    pub no_reboot: bool,
    pub force_reboot: bool,
    pub apply_config: bool,
    pub run_update_script: bool,
    pub no_dry_run: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkflowState {
    pub flags: WorkflowFlags,
    pub errata_driven_reboot: bool,
    pub package_driven_reboot: bool,
    pub reboot_scheduled: bool,
}

impl WorkflowState {
    pub fn new(flags: WorkflowFlags) -> Self {
        Self {
            flags,
            ..Self::default()
        }
    }

    pub fn reboot_required(&self) -> bool {
        let warranted = self.errata_driven_reboot || self.package_driven_reboot;
        (warranted && !self.flags.no_reboot) || self.flags.force_reboot
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPath {
    Patch,
    Migrate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub action: String,
    pub label: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub host: String,
    pub path: Option<WorkflowPath>,
    pub jobs: Vec<JobSummary>,
    pub errors: Vec<RecordedError>,
    pub reboot_scheduled: bool,
    /// A fatal error stopped the run.
    pub aborted: bool,
}

impl RunReport {
    /// Report for a run that could not start.
    pub fn fatal(host: &str, category: &str, err: &MaintError) -> Self {
        error!(host, category, "{err}");
        Self {
            host: host.to_string(),
            path: None,
            jobs: Vec::new(),
            errors: vec![RecordedError {
                category: category.to_string(),
                severity: Severity::Fatal,
                message: err.to_string(),
            }],
            reboot_scheduled: false,
            aborted: true,
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Log in, resolve `hostname`, run the workflow and log out again.
pub fn run_update(
    api: &dyn FleetApi,
    clock: &dyn Clock,
    config: &Config,
    hostname: &str,
    flags: WorkflowFlags,
) -> RunReport {
    let session = match SessionGuard::login(api) {
        Ok(session) => session,
        Err(e) => return RunReport::fatal(hostname, category::REMOTE, &e),
    };
    let target = match lookup_target(&*session, hostname) {
        Ok(target) => target,
        Err(e) => return RunReport::fatal(hostname, category::PRECONDITION, &e),
    };
    Orchestrator::new(&*session, clock, config, target, flags).run()
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrataBatch {
    /// Advisories for the configuration-management agent.
    Agent,
    /// Advisories for the package manager and its libraries.
    PackageManager,
    Remaining,
}

impl ErrataBatch {
    fn label(self) -> &'static str {
        match self {
            ErrataBatch::Agent => "Agent update",
            ErrataBatch::PackageManager => "Package manager update",
            ErrataBatch::Remaining => "Errata update",
        }
    }
}

pub struct Orchestrator<'a> {
    api: &'a dyn FleetApi,
    clock: &'a dyn Clock,
    config: &'a Config,
    target: TargetSystem,
    poll: PollSettings,
    router: ErrorRouter,
    state: WorkflowState,
    path: Option<WorkflowPath>,
    jobs: Vec<JobSummary>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        api: &'a dyn FleetApi,
        clock: &'a dyn Clock,
        config: &'a Config,
        target: TargetSystem,
        flags: WorkflowFlags,
    ) -> Self {
        Self {
            api,
            clock,
            config,
            target,
            poll: PollSettings::from_config(config),
            router: ErrorRouter::new(config.error_handling.clone()),
            state: WorkflowState::new(flags),
            path: None,
            jobs: Vec::new(),
        }
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn run(mut self) -> RunReport {
        let span = info_span!("system_update", host = %self.target.hostname);
        let _enter = span.enter();
        info!("start");

        let aborted = match self.execute() {
            Ok(()) => false,
            Err(MaintError::Aborted { .. }) => true,
            Err(e) => {
                self.router
                    .handle_as(Severity::Fatal, category::REMOTE, &e.to_string());
                true
            }
        };

        if aborted {
            error!("run aborted");
        } else if !self.router.has_errors() {
            info!("finished without errors");
        } else {
            for e in self.router.errors() {
                info!(category = %e.category, "recorded error: {}", e.message);
            }
        }
        let errors = self.router.into_errors();

        RunReport {
            host: self.target.hostname,
            path: self.path,
            jobs: self.jobs,
            errors,
            reboot_scheduled: self.state.reboot_scheduled,
            aborted,
        }
    }

    fn execute(&mut self) -> Result<()> {
        self.check_preconditions()?;

        let configured = self.script_phase(Phase::Begin)?;
        self.apply_config(configured)?;

        match decision::decide(self.api, &self.config.maintenance, &self.target)? {
            Decision::Eligible(plan) => {
                info!(
                    "server will get a support pack migration to {}",
                    plan.destination.base
                );
                self.path = Some(WorkflowPath::Migrate);
                self.migrate(plan)?;
            }
            Decision::NotEligible { .. } => {
                info!("server will be upgraded with latest available patches");
                self.path = Some(WorkflowPath::Patch);
                self.patch()?;
            }
        }

        let configured = self.script_phase(Phase::End)?;
        self.apply_config(configured)?;

        self.reboot_decision()
    }

    // -- routing ------------------------------------------------------------

    fn route(&mut self, category: &str, message: &str) -> Result<()> {
        let verdict = self.router.handle(category, message);
        self.verdict(verdict, category, message)
    }

    fn route_as(&mut self, severity: Severity, category: &str, message: &str) -> Result<()> {
        let verdict = self.router.handle_as(severity, category, message);
        self.verdict(verdict, category, message)
    }

    fn verdict(&self, verdict: Verdict, category: &str, message: &str) -> Result<()> {
        match verdict {
            Verdict::Continue => Ok(()),
            Verdict::Abort => Err(MaintError::Aborted {
                category: category.to_string(),
                message: message.to_string(),
            }),
        }
    }

    fn check_preconditions(&mut self) -> Result<()> {
        let host = self.target.hostname.clone();
        if self.config.maintenance.is_excluded_for_patch(&host) {
            let e = MaintError::PreconditionViolation(format!(
                "server {host} is in list of exceptions and will not be updated"
            ));
            self.route_as(Severity::Fatal, category::PRECONDITION, &e.to_string())?;
        }
        if self.target.inactive {
            let e = MaintError::PreconditionViolation(format!(
                "server {host} is inactive for at least a day; it will not be updated"
            ));
            self.route_as(Severity::Fatal, category::PRECONDITION, &e.to_string())?;
        }
        Ok(())
    }

    // -- single step --------------------------------------------------------

    fn action(&self, label: impl Into<String>, kind: ActionKind) -> Action {
        Action::new(self.target.id, label, kind, self.clock.now())
    }

    /// Dispatch `action` and wait for it. `None` when the submission was
    /// rejected and the rejection was not fatal.
    fn step(&mut self, action: Action) -> Result<Option<JobStatus>> {
        info!(action = %action.kind, "{}", action.label);
        let mut job = match Dispatcher::new(self.api).submit(&action) {
            Ok(job) => job,
            Err(e) => {
                self.route_as(action.submission_severity(), &action.category, &e.to_string())?;
                return Ok(None);
            }
        };
        self.note_dispatch(&action.kind);

        let waited = Poller::new(self.api, self.clock, self.poll).wait(&mut job);
        self.jobs.push(JobSummary {
            id: job.id,
            action: action.kind.to_string(),
            label: action.label.clone(),
            status: job.status,
            message: job.message.clone(),
        });
        if let Err(e) = waited {
            self.route_as(Severity::Fatal, category::POLLING, &e.to_string())?;
            return Ok(Some(job.status));
        }

        match job.status {
            JobStatus::Completed => info!(job_id = %job.id, "{} completed", action.label),
            JobStatus::Failed => {
                let e = MaintError::JobFailed {
                    action: action.label.clone(),
                    message: job.message.clone(),
                };
                match action.severity_override {
                    Some(severity) => self.route_as(severity, &action.category, &e.to_string())?,
                    None => self.route(&action.category, &e.to_string())?,
                }
            }
            JobStatus::TimedOut => {
                let e = MaintError::JobTimedOut {
                    action: action.label.clone(),
                    timeout_seconds: self.poll.timeout.as_secs(),
                };
                match action.severity_override {
                    Some(severity) => self.route_as(severity, &action.category, &e.to_string())?,
                    None => self.route(category::TIMEOUT_PASSED, &e.to_string())?,
                }
            }
            JobStatus::Submitted | JobStatus::Polling => {}
        }
        Ok(Some(job.status))
    }

    fn note_dispatch(&mut self, kind: &ActionKind) {
        match kind {
            ActionKind::ApplyErrata { .. } => self.state.errata_driven_reboot = true,
            ActionKind::InstallPackages { .. } => self.state.package_driven_reboot = true,
            ActionKind::Reboot => self.state.reboot_scheduled = true,
            _ => {}
        }
    }

    fn refresh_packages(&mut self) -> Result<()> {
        let action = self.action("Package refresh", ActionKind::RefreshPackages);
        self.step(action).map(|_| ())
    }

    fn refresh_hardware(&mut self) -> Result<()> {
        let action = self.action("Hardware refresh", ActionKind::RefreshHardware);
        self.step(action).map(|_| ())
    }

    // -- script phases and configuration -------------------------------------

    /// Run the update-script phase. Returns true if it applied configuration.
    fn script_phase(&mut self, phase: Phase) -> Result<bool> {
        if !self.state.flags.run_update_script {
            return Ok(false);
        }
        let Some(dir) = self.config.dirs.update_script_dir.clone() else {
            self.router.record_error(
                category::SCRIPT,
                "dirs.update_script_dir is not configured; update scripts skipped",
            );
            return Ok(false);
        };

        let plan = scripts::assemble(self.api, &dir, &self.target.hostname, phase)?;
        for problem in &plan.problems {
            self.router.record_error(category::SCRIPT, problem);
        }

        match plan.body {
            Some(body) => {
                let action = self.action(
                    format!("{phase} update script"),
                    ActionKind::RunScript {
                        user: SCRIPT_USER.to_string(),
                        group: SCRIPT_GROUP.to_string(),
                        timeout_seconds: plan.timeout_seconds,
                        body,
                    },
                );
                self.step(action)?;
            }
            None => info!("there is no {phase} update script available for server"),
        }

        if plan.channels.is_empty() {
            info!("there are no {phase} state configuration channels available for server");
            return Ok(false);
        }
        self.api.add_config_channels(self.target.id, &plan.channels)?;
        let action = self.action(
            format!("Highstate for {phase} state channels"),
            ActionKind::ApplyHighstate { test: false },
        );
        let applied = self.step(action);
        if let Err(e) = self.api.remove_config_channels(self.target.id, &plan.channels) {
            self.router.record_error(
                category::CONFIG_UPDATE,
                &format!("unable to remove {phase} state channels: {e}"),
            );
        }
        applied?;
        Ok(true)
    }

    fn apply_config(&mut self, already_applied: bool) -> Result<()> {
        if !self.state.flags.apply_config || already_applied {
            return Ok(());
        }
        if !self.target.is_agent_managed() {
            info!("system is not agent-managed; configuration not applied");
            return Ok(());
        }
        let action = self.action("Apply configuration", ActionKind::ApplyHighstate { test: false });
        self.step(action).map(|_| ())
    }

    // -- patch path ---------------------------------------------------------

    fn patch(&mut self) -> Result<()> {
        let system = self.target.id;
        let maintenance = &self.config.maintenance;
        let agent_keywords = maintenance.agent_advisory_keywords.clone();
        let core_keywords = maintenance.core_advisory_keywords.clone();

        let relevant = self.api.get_relevant_errata(system)?;
        if !relevant.is_empty() {
            if self.target.is_agent_managed() {
                let ids: Vec<i64> = relevant
                    .iter()
                    .filter(|e| e.matches_any(&agent_keywords))
                    .map(|e| e.id)
                    .collect();
                self.errata_batch(ErrataBatch::Agent, ids)?;
            }
            let ids: Vec<i64> = relevant
                .iter()
                .filter(|e| e.matches_any(&core_keywords))
                .map(|e| e.id)
                .collect();
            self.errata_batch(ErrataBatch::PackageManager, ids)?;
        }

        let remaining: Vec<i64> = self
            .api
            .get_relevant_errata(system)?
            .iter()
            .map(|e| e.id)
            .collect();
        if remaining.is_empty() {
            info!("errata update not needed; checking for package update");
        } else {
            self.errata_batch(ErrataBatch::Remaining, remaining)?;
        }

        let packages: Vec<i64> = self
            .api
            .list_upgradable_packages(system)?
            .iter()
            .map(|p| p.to_package_id)
            .collect();
        if packages.is_empty() {
            info!("package update not needed");
            return Ok(());
        }
        let action = self.action(
            "Packages update",
            ActionKind::InstallPackages {
                package_ids: packages,
            },
        );
        self.step(action)?;
        self.refresh_packages()?;
        self.refresh_hardware()
    }

    /// Apply `ids` and refresh the package inventory. A failed job in an
    /// early batch is recoverable whatever the `update` policy says; a
    /// rejected submission is not.
    fn errata_batch(&mut self, batch: ErrataBatch, ids: Vec<i64>) -> Result<()> {
        let label = batch.label();
        if ids.is_empty() {
            info!("no advisories for {}", label.to_lowercase());
            return Ok(());
        }
        let mut action = self.action(label, ActionKind::ApplyErrata { errata_ids: ids });
        if batch != ErrataBatch::Remaining {
            action = action.job_severity(Severity::Error);
        }
        self.step(action)?;
        if batch == ErrataBatch::Agent {
            // the agent restarts after updating itself
            self.settle();
        }
        self.refresh_packages()
    }

    fn settle(&self) {
        let settle = Duration::from_secs(self.config.maintenance.settle_seconds);
        if !settle.is_zero() {
            self.clock.sleep(settle);
        }
    }

    // -- migration path -----------------------------------------------------

    fn migrate(&mut self, plan: MigrationPlan) -> Result<()> {
        self.patch()?;
        self.settle();

        let wanted = plan.new_token.to_uppercase();
        let targets = self.api.list_migration_targets(self.target.id)?;
        let Some(ident) = targets
            .iter()
            .find(|t| t.friendly.contains(&wanted))
            .map(|t| t.ident.clone())
        else {
            let e = MaintError::MigrationUnavailable(format!(
                "no {wanted} migration target offered for {}; check the server",
                self.target.hostname
            ));
            info!("{e}");
            return Ok(());
        };

        let migrate = |dry_run: bool| ActionKind::Migrate {
            dry_run,
            target_ident: ident.clone(),
            base_channel: plan.destination.base.clone(),
            child_channels: plan.destination.children.clone(),
        };

        let dry_run_passed = if self.state.flags.no_dry_run {
            true
        } else {
            let action = self.action("Support pack migration dry run", migrate(true));
            self.step(action)? == Some(JobStatus::Completed)
        };

        if dry_run_passed {
            self.run_migration(&plan, migrate(false))?;
        } else {
            info!("dry run did not complete; support pack migration skipped");
        }

        self.refresh_packages()?;
        self.refresh_hardware()
    }

    fn run_migration(&mut self, plan: &MigrationPlan, kind: ActionKind) -> Result<()> {
        let action = self.action("Support pack migration", kind);
        if self.step(action)? != Some(JobStatus::Completed) {
            return Ok(());
        }
        self.state.package_driven_reboot = true;
        info!("support pack migration to {} completed", plan.destination.base);
        if self.config.maintenance.deprecated_extension_tokens.is_empty() {
            return Ok(());
        }
        match self.remove_deprecated(plan) {
            Ok(()) => Ok(()),
            Err(e @ MaintError::Aborted { .. }) => Err(e),
            Err(e) => self.route_as(
                Severity::Warning,
                category::CHANNEL_CHANGE,
                &format!("removing deprecated extensions failed: {e}"),
            ),
        }
    }

    /// Unsubscribe deprecated extension channels and remove their packages.
    fn remove_deprecated(&mut self, plan: &MigrationPlan) -> Result<()> {
        let system = self.target.id;
        let tokens = self.config.maintenance.deprecated_extension_tokens.clone();
        let deprecated = |name: &str| tokens.iter().any(|t| name.contains(t.as_str()));

        let base = self
            .api
            .get_subscribed_base_channel(system)?
            .unwrap_or_else(|| plan.destination.base.clone());
        let children = self.api.list_subscribed_child_channels(system)?;
        let kept: Vec<String> = children
            .iter()
            .filter(|c| !deprecated(c.as_str()))
            .cloned()
            .collect();
        if kept.len() != children.len() {
            let action = self
                .action(
                    "Remove deprecated extension channels",
                    ActionKind::ChangeChannels {
                        base_channel: base,
                        child_channels: kept,
                    },
                )
                .best_effort(Severity::Warning);
            self.step(action)?;
        }

        let packages: Vec<String> = self
            .api
            .list_installed_packages(system)?
            .into_iter()
            .map(|p| p.name)
            .filter(|name| deprecated(name.as_str()))
            .collect();
        if packages.is_empty() {
            return Ok(());
        }
        let body = format!("#!/bin/bash\nzypper -n rm {}\n", packages.join(" "));
        let action = self
            .action(
                "Remove deprecated extension packages",
                ActionKind::RunScript {
                    user: SCRIPT_USER.to_string(),
                    group: SCRIPT_GROUP.to_string(),
                    timeout_seconds: REMOVAL_SCRIPT_TIMEOUT,
                    body,
                },
            )
            .best_effort(Severity::Warning);
        self.step(action)?;
        let refresh = self
            .action("Package refresh", ActionKind::RefreshPackages)
            .best_effort(Severity::Warning);
        self.step(refresh).map(|_| ())
    }

    // -- reboot -------------------------------------------------------------

    fn reboot_decision(&mut self) -> Result<()> {
        if self.state.reboot_scheduled {
            return Ok(());
        }
        if !self.state.reboot_required() {
            if self.state.flags.no_reboot
                && (self.state.errata_driven_reboot || self.state.package_driven_reboot)
            {
                info!("server will not be rebooted; please reboot manually as soon as possible");
            }
            return Ok(());
        }
        let action = self.action("Reboot", ActionKind::Reboot);
        self.step(action).map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
