//! In-memory [`FleetApi`] for tests and dry runs of the orchestration logic.
//!
//! The fake holds one managed system plus a channel catalogue. Submissions
//! are recorded as [`ActionKind`] values; completed jobs apply their effect
//! (applied errata disappear from the relevant list, a migration switches
//! the subscribed channels) so later lookups see the new state.

use super::FleetApi;
use crate::action::ActionKind;
use crate::error::{MaintError, Result};
use crate::types::{
    ChannelInfo, Erratum, InstalledPackage, JobId, JobSystemStatus, MigrationTarget, SystemDetails,
    SystemId, SystemRef, UpgradablePackage,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// How a job of a given action kind ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeOutcome {
    Complete,
    Fail(String),
    /// Never leaves the in-progress set.
    Hang,
}

#[derive(Debug)]
struct FakeJob {
    kind: ActionKind,
    outcome: FakeOutcome,
    polls_remaining: u32,
}

#[derive(Debug, Default)]
struct FakeState {
    system: Option<SystemRef>,
    duplicate: bool,
    entitlement: String,
    inactive: bool,
    base_channel: Option<String>,
    child_channels: Vec<String>,
    catalogue: Vec<ChannelInfo>,
    project_environments: HashMap<String, Vec<String>>,
    errata: Vec<Erratum>,
    packages: Vec<UpgradablePackage>,
    installed: Vec<InstalledPackage>,
    migration_targets: Vec<MigrationTarget>,
    config_channels: HashSet<String>,
    groups: HashMap<String, Vec<SystemRef>>,

    outcomes: HashMap<&'static str, FakeOutcome>,
    rejected: HashSet<&'static str>,
    polls_before_done: u32,
    failing_queries: u32,

    next_job: i64,
    jobs: HashMap<JobId, FakeJob>,
    submitted: Vec<ActionKind>,
    calls: Vec<String>,
    attached_config: Vec<Vec<String>>,
    logged_in: bool,
    logouts: u32,
}

#[derive(Debug, Default)]
pub struct FakeApi {
    state: Mutex<FakeState>,
}

impl FakeApi {
    pub fn new() -> Self {
        let api = Self::default();
        api.lock().next_job = 1;
        api.lock().entitlement = "salt_entitled".to_string();
        api
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -- builders -----------------------------------------------------------

    pub fn with_system(self, id: i64, name: &str) -> Self {
        self.lock().system = Some(SystemRef {
            id: SystemId(id),
            name: name.to_string(),
        });
        self
    }

    /// Make `system.getId` return two matches.
    pub fn with_duplicate_system(self) -> Self {
        self.lock().duplicate = true;
        self
    }

    pub fn with_entitlement(self, entitlement: &str) -> Self {
        self.lock().entitlement = entitlement.to_string();
        self
    }

    pub fn with_inactive(self, inactive: bool) -> Self {
        self.lock().inactive = inactive;
        self
    }

    pub fn with_channels(self, base: &str, children: &[&str]) -> Self {
        {
            let mut st = self.lock();
            st.base_channel = Some(base.to_string());
            st.child_channels = children.iter().map(|c| c.to_string()).collect();
        }
        self
    }

    /// Add a base channel and its children to the catalogue.
    pub fn with_catalogue_entry(self, base: &str, children: &[&str]) -> Self {
        {
            let mut st = self.lock();
            st.catalogue.push(ChannelInfo {
                label: base.to_string(),
                parent_label: None,
            });
            for child in children {
                st.catalogue.push(ChannelInfo {
                    label: child.to_string(),
                    parent_label: Some(base.to_string()),
                });
            }
        }
        self
    }

    pub fn with_project_environments(self, project: &str, envs: &[&str]) -> Self {
        self.lock().project_environments.insert(
            project.to_string(),
            envs.iter().map(|e| e.to_string()).collect(),
        );
        self
    }

    pub fn with_errata(self, errata: Vec<Erratum>) -> Self {
        self.lock().errata = errata;
        self
    }

    pub fn with_packages(self, packages: Vec<UpgradablePackage>) -> Self {
        self.lock().packages = packages;
        self
    }

    pub fn with_installed(self, names: &[&str]) -> Self {
        self.lock().installed = names
            .iter()
            .map(|n| InstalledPackage {
                name: n.to_string(),
            })
            .collect();
        self
    }

    pub fn with_migration_targets(self, targets: &[(&str, &str)]) -> Self {
        self.lock().migration_targets = targets
            .iter()
            .map(|(ident, friendly)| MigrationTarget {
                ident: ident.to_string(),
                friendly: friendly.to_string(),
            })
            .collect();
        self
    }

    pub fn with_config_channels(self, labels: &[&str]) -> Self {
        self.lock()
            .config_channels
            .extend(labels.iter().map(|l| l.to_string()));
        self
    }

    pub fn with_group(self, group: &str, members: &[(i64, &str)]) -> Self {
        self.lock().groups.insert(
            group.to_string(),
            members
                .iter()
                .map(|(id, name)| SystemRef {
                    id: SystemId(*id),
                    name: name.to_string(),
                })
                .collect(),
        );
        self
    }

    /// Decide how jobs of `kind` (an [`ActionKind::as_str`] name) end.
    pub fn with_outcome(self, kind: &'static str, outcome: FakeOutcome) -> Self {
        self.lock().outcomes.insert(kind, outcome);
        self
    }

    /// Reject submissions of `kind` as the remote would for bad parameters.
    pub fn rejecting(self, kind: &'static str) -> Self {
        self.lock().rejected.insert(kind);
        self
    }

    /// Number of in-progress answers each job gives before it settles.
    pub fn with_polls_before_done(self, polls: u32) -> Self {
        self.lock().polls_before_done = polls;
        self
    }

    /// Make the next `n` in-progress queries fail.
    pub fn with_failing_queries(self, n: u32) -> Self {
        self.lock().failing_queries = n;
        self
    }

    // -- inspection ---------------------------------------------------------

    pub fn submitted(&self) -> Vec<ActionKind> {
        self.lock().submitted.clone()
    }

    pub fn submitted_names(&self) -> Vec<&'static str> {
        self.lock().submitted.iter().map(|k| k.as_str()).collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn attached_config_channels(&self) -> Vec<Vec<String>> {
        self.lock().attached_config.clone()
    }

    pub fn logouts(&self) -> u32 {
        self.lock().logouts
    }

    pub fn is_logged_in(&self) -> bool {
        self.lock().logged_in
    }

    pub fn current_channels(&self) -> (Option<String>, Vec<String>) {
        let st = self.lock();
        (st.base_channel.clone(), st.child_channels.clone())
    }

    // -- internals ----------------------------------------------------------

    fn record(&self, call: &str) {
        self.lock().calls.push(call.to_string());
    }

    fn submit(&self, kind: ActionKind) -> Result<JobId> {
        let mut st = self.lock();
        let name = kind.as_str();
        st.calls.push(format!("submit:{name}"));
        if st.rejected.contains(name) {
            return Err(MaintError::Api {
                method: name.to_string(),
                message: "rejected by fake".to_string(),
            });
        }
        let id = JobId(st.next_job);
        st.next_job += 1;
        let outcome = st
            .outcomes
            .get(name)
            .cloned()
            .unwrap_or(FakeOutcome::Complete);
        if outcome == FakeOutcome::Complete {
            apply_effect(&mut st, &kind);
        }
        let polls_remaining = st.polls_before_done;
        st.submitted.push(kind.clone());
        st.jobs.insert(
            id,
            FakeJob {
                kind,
                outcome,
                polls_remaining,
            },
        );
        Ok(id)
    }

    fn system_id(&self) -> Option<SystemId> {
        self.lock().system.as_ref().map(|s| s.id)
    }
}

fn apply_effect(st: &mut FakeState, kind: &ActionKind) {
    match kind {
        ActionKind::ApplyErrata { errata_ids } => {
            st.errata.retain(|e| !errata_ids.contains(&e.id));
        }
        ActionKind::InstallPackages { package_ids } => {
            st.packages
                .retain(|p| !package_ids.contains(&p.to_package_id));
        }
        ActionKind::Migrate {
            dry_run: false,
            base_channel,
            child_channels,
            ..
        } => {
            st.base_channel = Some(base_channel.clone());
            st.child_channels = child_channels.clone();
        }
        ActionKind::ChangeChannels {
            base_channel,
            child_channels,
        } => {
            st.base_channel = Some(base_channel.clone());
            st.child_channels = child_channels.clone();
        }
        _ => {}
    }
}

fn unknown_system(system: SystemId) -> MaintError {
    MaintError::Api {
        method: "system".to_string(),
        message: format!("No such system - sid = {system}"),
    }
}

impl FleetApi for FakeApi {
    fn login(&self) -> Result<()> {
        self.record("login");
        self.lock().logged_in = true;
        Ok(())
    }

    fn logout(&self) -> Result<()> {
        self.record("logout");
        let mut st = self.lock();
        st.logged_in = false;
        st.logouts += 1;
        Ok(())
    }

    fn get_system_ids(&self, hostname: &str) -> Result<Vec<SystemRef>> {
        self.record("get_system_ids");
        let st = self.lock();
        let Some(system) = st
            .system
            .as_ref()
            .filter(|s| s.name.eq_ignore_ascii_case(hostname))
        else {
            return Ok(Vec::new());
        };
        let mut found = vec![system.clone()];
        if st.duplicate {
            found.push(SystemRef {
                id: SystemId(system.id.0 + 1),
                name: system.name.clone(),
            });
        }
        Ok(found)
    }

    fn get_details(&self, system: SystemId) -> Result<SystemDetails> {
        self.record("get_details");
        let st = self.lock();
        match &st.system {
            Some(s) if s.id == system => Ok(SystemDetails {
                id: s.id,
                profile_name: s.name.clone(),
                base_entitlement: st.entitlement.clone(),
            }),
            _ => Err(unknown_system(system)),
        }
    }

    fn list_inactive_systems(&self, _days: u32) -> Result<Vec<SystemRef>> {
        self.record("list_inactive_systems");
        let st = self.lock();
        Ok(match (&st.system, st.inactive) {
            (Some(s), true) => vec![s.clone()],
            _ => Vec::new(),
        })
    }

    fn get_subscribed_base_channel(&self, _system: SystemId) -> Result<Option<String>> {
        self.record("get_subscribed_base_channel");
        Ok(self.lock().base_channel.clone())
    }

    fn list_subscribed_child_channels(&self, _system: SystemId) -> Result<Vec<String>> {
        self.record("list_subscribed_child_channels");
        Ok(self.lock().child_channels.clone())
    }

    fn list_software_channels(&self) -> Result<Vec<ChannelInfo>> {
        self.record("list_software_channels");
        Ok(self.lock().catalogue.clone())
    }

    fn list_channel_children(&self, base_channel: &str) -> Result<Vec<String>> {
        self.record("list_channel_children");
        Ok(self
            .lock()
            .catalogue
            .iter()
            .filter(|c| c.parent_label.as_deref() == Some(base_channel))
            .map(|c| c.label.clone())
            .collect())
    }

    fn list_project_environments(&self, project: &str) -> Result<Vec<String>> {
        self.record("list_project_environments");
        Ok(self
            .lock()
            .project_environments
            .get(project)
            .cloned()
            .unwrap_or_default())
    }

    fn get_relevant_errata(&self, _system: SystemId) -> Result<Vec<Erratum>> {
        self.record("get_relevant_errata");
        Ok(self.lock().errata.clone())
    }

    fn list_upgradable_packages(&self, _system: SystemId) -> Result<Vec<UpgradablePackage>> {
        self.record("list_upgradable_packages");
        Ok(self.lock().packages.clone())
    }

    fn list_installed_packages(&self, _system: SystemId) -> Result<Vec<InstalledPackage>> {
        self.record("list_installed_packages");
        Ok(self.lock().installed.clone())
    }

    fn list_migration_targets(&self, _system: SystemId) -> Result<Vec<MigrationTarget>> {
        self.record("list_migration_targets");
        Ok(self.lock().migration_targets.clone())
    }

    fn list_group_systems(&self, group: &str) -> Result<Vec<SystemRef>> {
        self.record("list_group_systems");
        self.lock()
            .groups
            .get(group)
            .cloned()
            .ok_or_else(|| MaintError::Api {
                method: "systemgroup/listSystemsMinimal".to_string(),
                message: format!("Unable to locate or access server group: {group}"),
            })
    }

    fn config_channel_exists(&self, label: &str) -> Result<bool> {
        self.record("config_channel_exists");
        Ok(self.lock().config_channels.contains(label))
    }

    fn add_config_channels(&self, _system: SystemId, labels: &[String]) -> Result<()> {
        self.record("add_config_channels");
        self.lock().attached_config.push(labels.to_vec());
        Ok(())
    }

    fn remove_config_channels(&self, _system: SystemId, _labels: &[String]) -> Result<()> {
        self.record("remove_config_channels");
        Ok(())
    }

    fn submit_errata(&self, system: SystemId, errata: &[i64], _at: DateTime<Utc>) -> Result<JobId> {
        if Some(system) != self.system_id() {
            return Err(unknown_system(system));
        }
        self.submit(ActionKind::ApplyErrata {
            errata_ids: errata.to_vec(),
        })
    }

    fn submit_package_install(
        &self,
        _system: SystemId,
        packages: &[i64],
        _at: DateTime<Utc>,
    ) -> Result<JobId> {
        self.submit(ActionKind::InstallPackages {
            package_ids: packages.to_vec(),
        })
    }

    fn submit_script_run(
        &self,
        _system: SystemId,
        user: &str,
        group: &str,
        timeout_seconds: u64,
        body: &str,
        _at: DateTime<Utc>,
    ) -> Result<JobId> {
        self.submit(ActionKind::RunScript {
            user: user.to_string(),
            group: group.to_string(),
            timeout_seconds,
            body: body.to_string(),
        })
    }

    fn submit_highstate(&self, _system: SystemId, _at: DateTime<Utc>, test: bool) -> Result<JobId> {
        self.submit(ActionKind::ApplyHighstate { test })
    }

    fn submit_reboot(&self, _system: SystemId, _at: DateTime<Utc>) -> Result<JobId> {
        self.submit(ActionKind::Reboot)
    }

    fn submit_hardware_refresh(&self, _system: SystemId, _at: DateTime<Utc>) -> Result<JobId> {
        self.submit(ActionKind::RefreshHardware)
    }

    fn submit_package_refresh(&self, _system: SystemId, _at: DateTime<Utc>) -> Result<JobId> {
        self.submit(ActionKind::RefreshPackages)
    }

    fn submit_migration(
        &self,
        _system: SystemId,
        target_ident: &str,
        base_channel: &str,
        child_channels: &[String],
        dry_run: bool,
        _at: DateTime<Utc>,
    ) -> Result<JobId> {
        self.submit(ActionKind::Migrate {
            dry_run,
            target_ident: target_ident.to_string(),
            base_channel: base_channel.to_string(),
            child_channels: child_channels.to_vec(),
        })
    }

    fn submit_change_channels(
        &self,
        _system: SystemId,
        base_channel: &str,
        child_channels: &[String],
        _at: DateTime<Utc>,
    ) -> Result<JobId> {
        self.submit(ActionKind::ChangeChannels {
            base_channel: base_channel.to_string(),
            child_channels: child_channels.to_vec(),
        })
    }

    fn query_in_progress(&self, job: JobId) -> Result<Vec<JobSystemStatus>> {
        let mut st = self.lock();
        st.calls.push("query_in_progress".to_string());
        if st.failing_queries > 0 {
            st.failing_queries -= 1;
            return Err(MaintError::Api {
                method: "schedule/listInProgressSystems".to_string(),
                message: "connection reset by peer".to_string(),
            });
        }
        let server_id = st.system.as_ref().map(|s| s.id).unwrap_or(SystemId(0));
        let Some(entry) = st.jobs.get_mut(&job) else {
            return Ok(Vec::new());
        };
        let pending = match entry.outcome {
            FakeOutcome::Hang => true,
            _ if entry.polls_remaining > 0 => {
                entry.polls_remaining -= 1;
                true
            }
            _ => false,
        };
        Ok(if pending {
            vec![JobSystemStatus {
                server_id,
                message: format!("{} queued", entry.kind.as_str()),
            }]
        } else {
            Vec::new()
        })
    }

    fn query_completed(&self, job: JobId) -> Result<Vec<JobSystemStatus>> {
        let mut st = self.lock();
        st.calls.push("query_completed".to_string());
        let server_id = st.system.as_ref().map(|s| s.id).unwrap_or(SystemId(0));
        Ok(match st.jobs.get(&job) {
            Some(j) if j.outcome == FakeOutcome::Complete => vec![JobSystemStatus {
                server_id,
                message: format!("{} completed", j.kind.as_str()),
            }],
            _ => Vec::new(),
        })
    }

    fn query_failed(&self, job: JobId) -> Result<Vec<JobSystemStatus>> {
        let mut st = self.lock();
        st.calls.push("query_failed".to_string());
        let server_id = st.system.as_ref().map(|s| s.id).unwrap_or(SystemId(0));
        Ok(match st.jobs.get(&job) {
            Some(FakeJob {
                outcome: FakeOutcome::Fail(message),
                ..
            }) => vec![JobSystemStatus {
                server_id,
                message: message.clone(),
            }],
            _ => Vec::new(),
        })
    }
}
