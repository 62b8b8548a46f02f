//! Seam to the remote fleet-management API.
//!
//! [`FleetApi`] is the complete set of remote calls the orchestrator makes.
//! [`HttpApi`] talks to a real server over its JSON-over-HTTP interface;
//! `FakeApi` (tests and the `fake` feature) is an in-memory stand-in that
//! records every call.

#[cfg(any(test, feature = "fake"))]
pub mod fake;
pub mod http;

#[cfg(any(test, feature = "fake"))]
pub use fake::FakeApi;
pub use http::HttpApi;

use crate::error::Result;
use crate::types::{
    ChannelInfo, Erratum, InstalledPackage, JobId, JobSystemStatus, MigrationTarget, SystemDetails,
    SystemId, SystemRef, UpgradablePackage,
};
use chrono::{DateTime, Utc};

pub trait FleetApi: Send + Sync {
    // -- session ------------------------------------------------------------

    fn login(&self) -> Result<()>;
    fn logout(&self) -> Result<()>;

    // -- lookups ------------------------------------------------------------

    fn get_system_ids(&self, hostname: &str) -> Result<Vec<SystemRef>>;
    fn get_details(&self, system: SystemId) -> Result<SystemDetails>;
    fn list_inactive_systems(&self, days: u32) -> Result<Vec<SystemRef>>;
    /// `None` when the system has no base channel.
    fn get_subscribed_base_channel(&self, system: SystemId) -> Result<Option<String>>;
    fn list_subscribed_child_channels(&self, system: SystemId) -> Result<Vec<String>>;
    fn list_software_channels(&self) -> Result<Vec<ChannelInfo>>;
    fn list_channel_children(&self, base_channel: &str) -> Result<Vec<String>>;
    fn list_project_environments(&self, project: &str) -> Result<Vec<String>>;
    fn get_relevant_errata(&self, system: SystemId) -> Result<Vec<Erratum>>;
    fn list_upgradable_packages(&self, system: SystemId) -> Result<Vec<UpgradablePackage>>;
    fn list_installed_packages(&self, system: SystemId) -> Result<Vec<InstalledPackage>>;
    fn list_migration_targets(&self, system: SystemId) -> Result<Vec<MigrationTarget>>;
    fn list_group_systems(&self, group: &str) -> Result<Vec<SystemRef>>;

    // -- configuration channels ---------------------------------------------

    fn config_channel_exists(&self, label: &str) -> Result<bool>;
    fn add_config_channels(&self, system: SystemId, labels: &[String]) -> Result<()>;
    fn remove_config_channels(&self, system: SystemId, labels: &[String]) -> Result<()>;

    // -- scheduling ---------------------------------------------------------

    fn submit_errata(&self, system: SystemId, errata: &[i64], at: DateTime<Utc>) -> Result<JobId>;
    fn submit_package_install(
        &self,
        system: SystemId,
        packages: &[i64],
        at: DateTime<Utc>,
    ) -> Result<JobId>;
    #[allow(clippy::too_many_arguments)]
    fn submit_script_run(
        &self,
        system: SystemId,
        user: &str,
        group: &str,
        timeout_seconds: u64,
        body: &str,
        at: DateTime<Utc>,
    ) -> Result<JobId>;
    fn submit_highstate(&self, system: SystemId, at: DateTime<Utc>, test: bool) -> Result<JobId>;
    fn submit_reboot(&self, system: SystemId, at: DateTime<Utc>) -> Result<JobId>;
    fn submit_hardware_refresh(&self, system: SystemId, at: DateTime<Utc>) -> Result<JobId>;
    fn submit_package_refresh(&self, system: SystemId, at: DateTime<Utc>) -> Result<JobId>;
    #[allow(clippy::too_many_arguments)]
    fn submit_migration(
        &self,
        system: SystemId,
        target_ident: &str,
        base_channel: &str,
        child_channels: &[String],
        dry_run: bool,
        at: DateTime<Utc>,
    ) -> Result<JobId>;
    fn submit_change_channels(
        &self,
        system: SystemId,
        base_channel: &str,
        child_channels: &[String],
        at: DateTime<Utc>,
    ) -> Result<JobId>;

    // -- job status ---------------------------------------------------------

    fn query_in_progress(&self, job: JobId) -> Result<Vec<JobSystemStatus>>;
    fn query_completed(&self, job: JobId) -> Result<Vec<JobSystemStatus>>;
    fn query_failed(&self, job: JobId) -> Result<Vec<JobSystemStatus>>;
}
