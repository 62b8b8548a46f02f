//! Blocking client for the management server's JSON-over-HTTP API.
//!
//! Every call maps to `<url>/rhn/manager/api/<namespace>/<method>`. Reads are
//! `GET` with query parameters, writes are `POST` with a JSON body. The
//! server answers with an envelope `{"success": bool, "result": .., "message": ..}`.
//! The session is a cookie set by `auth/login` and kept by the client.

use super::FleetApi;
use crate::config::ServerConfig;
use crate::error::{MaintError, Result};
use crate::types::{
    ChannelInfo, Erratum, InstalledPackage, JobId, JobSystemStatus, MigrationTarget, SystemDetails,
    SystemId, SystemRef, UpgradablePackage,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const API_PREFIX: &str = "/rhn/manager/api";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    result: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LabelOnly {
    label: String,
}

pub struct HttpApi {
    base: String,
    user: String,
    password: String,
    client: reqwest::blocking::Client,
}

impl HttpApi {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;
        Ok(Self {
            base: format!("{}{}", config.url.trim_end_matches('/'), API_PREFIX),
            user: config.user.clone(),
            password: config.password.clone(),
            client,
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.base, method)
    }

    fn get<T: DeserializeOwned>(&self, method: &str, query: &[(&str, String)]) -> Result<T> {
        debug!(method, "api GET");
        let response = self
            .client
            .get(self.url(method))
            .query(query)
            .send()
            .map_err(|e| api_error(method, e.to_string()))?;
        read_envelope(method, response)?.ok_or_else(|| api_error(method, "response has no result"))
    }

    fn post<T: DeserializeOwned>(&self, method: &str, body: serde_json::Value) -> Result<T> {
        self.post_optional(method, body)?
            .ok_or_else(|| api_error(method, "response has no result"))
    }

    /// POST for calls whose result carries no information.
    fn post_unit(&self, method: &str, body: serde_json::Value) -> Result<()> {
        self.post_optional::<serde_json::Value>(method, body)?;
        Ok(())
    }

    fn post_optional<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<Option<T>> {
        debug!(method, "api POST");
        let response = self
            .client
            .post(self.url(method))
            .json(&body)
            .send()
            .map_err(|e| api_error(method, e.to_string()))?;
        read_envelope(method, response)
    }

    fn schedule(&self, method: &str, body: serde_json::Value) -> Result<JobId> {
        let id: i64 = self.post(method, body)?;
        Ok(JobId(id))
    }
}

fn api_error(method: &str, message: impl Into<String>) -> MaintError {
    MaintError::Api {
        method: method.to_string(),
        message: message.into(),
    }
}

fn read_envelope<T: DeserializeOwned>(
    method: &str,
    response: reqwest::blocking::Response,
) -> Result<Option<T>> {
    let status = response.status();
    let text = response
        .text()
        .map_err(|e| api_error(method, e.to_string()))?;
    let envelope: Envelope<T> = match serde_json::from_str(&text) {
        Ok(env) => env,
        Err(e) if status.is_success() => {
            return Err(api_error(method, format!("unexpected response: {e}")))
        }
        Err(_) => return Err(api_error(method, format!("HTTP {status}"))),
    };
    if !envelope.success {
        let message = envelope
            .message
            .unwrap_or_else(|| format!("HTTP {status}"));
        return Err(api_error(method, message));
    }
    Ok(envelope.result)
}

fn iso(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn sid(system: SystemId) -> (&'static str, String) {
    ("sid", system.0.to_string())
}

impl FleetApi for HttpApi {
    fn login(&self) -> Result<()> {
        self.post_unit(
            "auth/login",
            json!({ "login": self.user, "password": self.password }),
        )
    }

    fn logout(&self) -> Result<()> {
        self.post_unit("auth/logout", json!({}))
    }

    fn get_system_ids(&self, hostname: &str) -> Result<Vec<SystemRef>> {
        self.get("system/getId", &[("name", hostname.to_string())])
    }

    fn get_details(&self, system: SystemId) -> Result<SystemDetails> {
        self.get("system/getDetails", &[sid(system)])
    }

    fn list_inactive_systems(&self, days: u32) -> Result<Vec<SystemRef>> {
        self.get("system/listInactiveSystems", &[("days", days.to_string())])
    }

    fn get_subscribed_base_channel(&self, system: SystemId) -> Result<Option<String>> {
        // An unsubscribed system yields an empty struct instead of a channel.
        let value: serde_json::Value = self.get("system/getSubscribedBaseChannel", &[sid(system)])?;
        Ok(value
            .get("label")
            .and_then(|l| l.as_str())
            .filter(|l| !l.is_empty())
            .map(str::to_string))
    }

    fn list_subscribed_child_channels(&self, system: SystemId) -> Result<Vec<String>> {
        let channels: Vec<LabelOnly> =
            self.get("system/listSubscribedChildChannels", &[sid(system)])?;
        Ok(channels.into_iter().map(|c| c.label).collect())
    }

    fn list_software_channels(&self) -> Result<Vec<ChannelInfo>> {
        self.get("channel/listSoftwareChannels", &[])
    }

    fn list_channel_children(&self, base_channel: &str) -> Result<Vec<String>> {
        let channels: Vec<LabelOnly> = self.get(
            "channel/software/listChildren",
            &[("channelLabel", base_channel.to_string())],
        )?;
        Ok(channels.into_iter().map(|c| c.label).collect())
    }

    fn list_project_environments(&self, project: &str) -> Result<Vec<String>> {
        let envs: Vec<LabelOnly> = self.get(
            "contentmanagement/listProjectEnvironments",
            &[("projectLabel", project.to_string())],
        )?;
        Ok(envs.into_iter().map(|e| e.label).collect())
    }

    fn get_relevant_errata(&self, system: SystemId) -> Result<Vec<Erratum>> {
        self.get("system/getRelevantErrata", &[sid(system)])
    }

    fn list_upgradable_packages(&self, system: SystemId) -> Result<Vec<UpgradablePackage>> {
        self.get("system/listLatestUpgradablePackages", &[sid(system)])
    }

    fn list_installed_packages(&self, system: SystemId) -> Result<Vec<InstalledPackage>> {
        self.get("system/listInstalledPackages", &[sid(system)])
    }

    fn list_migration_targets(&self, system: SystemId) -> Result<Vec<MigrationTarget>> {
        self.get("system/listMigrationTargets", &[sid(system)])
    }

    fn list_group_systems(&self, group: &str) -> Result<Vec<SystemRef>> {
        self.get(
            "systemgroup/listSystemsMinimal",
            &[("systemGroupName", group.to_string())],
        )
    }

    fn config_channel_exists(&self, label: &str) -> Result<bool> {
        let exists: i64 = self.get(
            "configchannel/channelExists",
            &[("label", label.to_string())],
        )?;
        Ok(exists == 1)
    }

    fn add_config_channels(&self, system: SystemId, labels: &[String]) -> Result<()> {
        self.post_unit(
            "system/config/addChannels",
            json!({ "sids": [system.0], "configChannelLabels": labels, "addToTop": false }),
        )
    }

    fn remove_config_channels(&self, system: SystemId, labels: &[String]) -> Result<()> {
        self.post_unit(
            "system/config/removeChannels",
            json!({ "sids": [system.0], "configChannelLabels": labels }),
        )
    }

    fn submit_errata(&self, system: SystemId, errata: &[i64], at: DateTime<Utc>) -> Result<JobId> {
        let method = "system/scheduleApplyErrata";
        let ids: Vec<i64> = self.post(
            method,
            json!({ "sid": system.0, "errataIds": errata, "earliestOccurrence": iso(at) }),
        )?;
        ids.first()
            .copied()
            .map(JobId)
            .ok_or_else(|| api_error(method, "no action id returned"))
    }

    fn submit_package_install(
        &self,
        system: SystemId,
        packages: &[i64],
        at: DateTime<Utc>,
    ) -> Result<JobId> {
        self.schedule(
            "system/schedulePackageInstall",
            json!({ "sid": system.0, "packageIds": packages, "earliestOccurrence": iso(at) }),
        )
    }

    fn submit_script_run(
        &self,
        system: SystemId,
        user: &str,
        group: &str,
        timeout_seconds: u64,
        body: &str,
        at: DateTime<Utc>,
    ) -> Result<JobId> {
        self.schedule(
            "system/scheduleScriptRun",
            json!({
                "sid": system.0,
                "username": user,
                "groupname": group,
                "timeout": timeout_seconds,
                "script": body,
                "earliestOccurrence": iso(at),
            }),
        )
    }

    fn submit_highstate(&self, system: SystemId, at: DateTime<Utc>, test: bool) -> Result<JobId> {
        self.schedule(
            "system/scheduleApplyHighstate",
            json!({ "sid": system.0, "earliestOccurrence": iso(at), "test": test }),
        )
    }

    fn submit_reboot(&self, system: SystemId, at: DateTime<Utc>) -> Result<JobId> {
        self.schedule(
            "system/scheduleReboot",
            json!({ "sid": system.0, "earliestOccurrence": iso(at) }),
        )
    }

    fn submit_hardware_refresh(&self, system: SystemId, at: DateTime<Utc>) -> Result<JobId> {
        self.schedule(
            "system/scheduleHardwareRefresh",
            json!({ "sid": system.0, "earliestOccurrence": iso(at) }),
        )
    }

    fn submit_package_refresh(&self, system: SystemId, at: DateTime<Utc>) -> Result<JobId> {
        self.schedule(
            "system/schedulePackageRefresh",
            json!({ "sid": system.0, "earliestOccurrence": iso(at) }),
        )
    }

    fn submit_migration(
        &self,
        system: SystemId,
        target_ident: &str,
        base_channel: &str,
        child_channels: &[String],
        dry_run: bool,
        at: DateTime<Utc>,
    ) -> Result<JobId> {
        self.schedule(
            "system/scheduleSPMigration",
            json!({
                "sid": system.0,
                "targetIdent": target_ident,
                "baseChannelLabel": base_channel,
                "optionalChildChannels": child_channels,
                "dryRun": dry_run,
                "earliestOccurrence": iso(at),
            }),
        )
    }

    fn submit_change_channels(
        &self,
        system: SystemId,
        base_channel: &str,
        child_channels: &[String],
        at: DateTime<Utc>,
    ) -> Result<JobId> {
        self.schedule(
            "system/scheduleChangeChannels",
            json!({
                "sid": system.0,
                "baseChannelLabel": base_channel,
                "childLabels": child_channels,
                "earliestOccurrence": iso(at),
            }),
        )
    }

    fn query_in_progress(&self, job: JobId) -> Result<Vec<JobSystemStatus>> {
        self.get(
            "schedule/listInProgressSystems",
            &[("actionId", job.0.to_string())],
        )
    }

    fn query_completed(&self, job: JobId) -> Result<Vec<JobSystemStatus>> {
        self.get(
            "schedule/listCompletedSystems",
            &[("actionId", job.0.to_string())],
        )
    }

    fn query_failed(&self, job: JobId) -> Result<Vec<JobSystemStatus>> {
        self.get(
            "schedule/listFailedSystems",
            &[("actionId", job.0.to_string())],
        )
    }
}
