//! Maintenance Decision Engine.
//!
//! Chooses between a patch-level update and a support-pack migration for
//! one target, and computes the destination channel set for a migration.
//!
//! Evaluation order, first match wins:
//! 1. project mapping (`sp_migration_project`): a content-lifecycle project
//!    whose `project-environment` prefix appears in the current base channel
//!    is swapped for its successor project;
//! 2. flat mapping (`sp_migration`): keyed by the full base-channel label,
//!    a `slesNN-spN` version key, or the bare support-pack token;
//! 3. otherwise not eligible.
//!
//! A candidate must exist in the channel catalogue and keep at least one
//! valid child channel, or the target is patched instead.

use crate::api::FleetApi;
use crate::config::MaintenanceConfig;
use crate::error::Result;
use crate::types::{ChannelMapping, TargetSystem};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationPlan {
    pub destination: ChannelMapping,
    /// Support-pack token of the current base channel, e.g. `sp4`.
    pub old_token: String,
    /// Support-pack token of the destination, e.g. `sp5`.
    pub new_token: String,
    /// Translated child channels that do not exist under the destination.
    pub dropped_children: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Eligible(MigrationPlan),
    NotEligible { reason: String },
}

impl Decision {
    fn not_eligible(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        info!("{reason}");
        Decision::NotEligible { reason }
    }

    pub fn is_eligible(&self) -> bool {
        matches!(self, Decision::Eligible(_))
    }
}

fn sp_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"sp(\d+)").expect("static regex"))
}

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{2})-sp\d+").expect("static regex"))
}

/// Support-pack token contained in a channel label, `sp0` when absent.
pub fn sp_token(label: &str) -> String {
    sp_regex()
        .find(label)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "sp0".to_string())
}

/// A destination resolved from one of the mapping tables, before the
/// catalogue and child-channel checks.
struct Candidate {
    base: String,
    /// Additional label substitution applied to child channels.
    project_swap: Option<(String, String)>,
    /// Keys consulted in `exception_sp`.
    exception_keys: Vec<String>,
}

pub fn decide(
    api: &dyn FleetApi,
    config: &MaintenanceConfig,
    target: &TargetSystem,
) -> Result<Decision> {
    let current_base = target.base_channel.as_str();
    if current_base.is_empty() {
        return Ok(Decision::not_eligible(format!(
            "{} has no base channel; support pack migration not possible",
            target.hostname
        )));
    }
    let old_token = sp_token(current_base);
    let catalogue = api.list_software_channels()?;
    let base_channels: Vec<&str> = catalogue
        .iter()
        .filter(|c| c.is_base())
        .map(|c| c.label.as_str())
        .collect();

    let candidate = match project_candidate(api, config, current_base, &base_channels)? {
        Some(c) => Some(c),
        None => flat_candidate(config, current_base, &old_token),
    };
    let Some(candidate) = candidate else {
        return Ok(Decision::not_eligible(format!(
            "no support pack migration configured for {current_base}"
        )));
    };

    let new_token = sp_token(&candidate.base);
    let mut keys: Vec<&str> = candidate.exception_keys.iter().map(String::as_str).collect();
    keys.push(&new_token);
    keys.push(&candidate.base);
    if config.is_migration_exception(&target.hostname, &keys) {
        return Ok(Decision::not_eligible(format!(
            "{} is listed as exception for migration to {}",
            target.hostname, candidate.base
        )));
    }

    if candidate.base == current_base {
        return Ok(Decision::not_eligible(format!(
            "{current_base} is already the newest configured base channel"
        )));
    }
    if !base_channels.contains(&candidate.base.as_str()) {
        return Ok(Decision::not_eligible(format!(
            "given support pack migration path is not available: channel {} does not exist",
            candidate.base
        )));
    }

    let current = ChannelMapping {
        base: current_base.to_string(),
        children: target.child_channels.clone(),
    };
    let mut destination = current.translate(&candidate.base, &old_token, &new_token);
    if let Some((from, to)) = &candidate.project_swap {
        for child in &mut destination.children {
            *child = child.replace(from.as_str(), to);
        }
    }
    let existing = api.list_channel_children(&candidate.base)?;
    let dropped_children = destination.retain_existing(&existing);
    for child in &dropped_children {
        info!(channel = %child, "channel does not exist under {}, skipped", candidate.base);
    }
    if destination.children.is_empty() {
        return Ok(Decision::not_eligible(format!(
            "no valid child channels under {}; migration skipped",
            candidate.base
        )));
    }

    debug!(from = %current_base, to = %destination.base, "support pack migration eligible");
    Ok(Decision::Eligible(MigrationPlan {
        destination,
        old_token,
        new_token,
        dropped_children,
    }))
}

fn project_candidate(
    api: &dyn FleetApi,
    config: &MaintenanceConfig,
    current_base: &str,
    base_channels: &[&str],
) -> Result<Option<Candidate>> {
    for (project, next_project) in &config.sp_migration_project {
        for env in api.list_project_environments(project)? {
            let prefix = format!("{project}-{env}");
            if !current_base.contains(&prefix) {
                continue;
            }
            let next_prefix = format!("{next_project}-{env}");
            let expected = current_base.replace(project.as_str(), next_project);
            let base = if base_channels.contains(&expected.as_str()) {
                expected
            } else {
                match base_channels.iter().find(|b| b.starts_with(&next_prefix)) {
                    Some(b) => b.to_string(),
                    None => expected,
                }
            };
            return Ok(Some(Candidate {
                base,
                project_swap: Some((project.clone(), next_project.clone())),
                exception_keys: vec![next_project.clone()],
            }));
        }
    }
    Ok(None)
}

fn flat_candidate(
    config: &MaintenanceConfig,
    current_base: &str,
    old_token: &str,
) -> Option<Candidate> {
    let mapping = &config.sp_migration;
    if let Some(dest) = mapping.get(current_base) {
        return Some(Candidate {
            base: dest.clone(),
            project_swap: None,
            exception_keys: Vec::new(),
        });
    }

    let version_key = version_regex()
        .captures(current_base)
        .map(|c| format!("sles{}-{old_token}", &c[1]));
    let by_token = version_key
        .as_ref()
        .and_then(|k| mapping.get(k))
        .or_else(|| mapping.get(old_token))?;

    let new_token = sp_regex()
        .find(by_token)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| by_token.clone());
    Some(Candidate {
        base: current_base.replace(old_token, &new_token),
        project_swap: None,
        exception_keys: vec![by_token.clone()],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::FakeApi;
    use crate::types::{Entitlement, SystemId};

    fn target(host: &str, base: &str, children: &[&str]) -> TargetSystem {
        TargetSystem {
            id: SystemId(1000010000),
            hostname: host.to_string(),
            base_channel: base.to_string(),
            child_channels: children.iter().map(|c| c.to_string()).collect(),
            entitlement: Entitlement::AgentManaged,
            inactive: false,
        }
    }

    fn flat(from: &str, to: &str) -> MaintenanceConfig {
        let mut cfg = MaintenanceConfig::default();
        cfg.sp_migration.insert(from.to_string(), to.to_string());
        cfg
    }

    fn sp5_catalogue() -> FakeApi {
        FakeApi::new()
            .with_catalogue_entry("prodX-sp4-x86_64", &["prodX-sp4-updates-x86_64"])
            .with_catalogue_entry(
                "prodX-sp5-x86_64",
                &["prodX-sp5-updates-x86_64", "prodX-sp5-module-x86_64"],
            )
    }

    #[test]
    fn token_mapping_yields_sp5() {
        let api = sp5_catalogue();
        let t = target("web01", "prodX-sp4-x86_64", &["prodX-sp4-updates-x86_64"]);
        let Decision::Eligible(plan) = decide(&api, &flat("sp4", "sp5"), &t).unwrap() else {
            panic!("expected eligible");
        };
        assert!(plan.destination.base.ends_with("sp5-x86_64"));
        assert_eq!(plan.destination.base, "prodX-sp5-x86_64");
        assert_eq!(plan.destination.children, vec!["prodX-sp5-updates-x86_64"]);
        assert_eq!(plan.old_token, "sp4");
        assert_eq!(plan.new_token, "sp5");
    }

    #[test]
    fn exception_list_blocks_host() {
        let api = sp5_catalogue();
        let mut cfg = flat("sp4", "sp5");
        cfg.exception_sp
            .insert("sp5".to_string(), vec!["hostA".to_string()]);

        let blocked = target("hostA", "prodX-sp4-x86_64", &["prodX-sp4-updates-x86_64"]);
        assert!(!decide(&api, &cfg, &blocked).unwrap().is_eligible());

        let other = target("hostB", "prodX-sp4-x86_64", &["prodX-sp4-updates-x86_64"]);
        assert!(decide(&api, &cfg, &other).unwrap().is_eligible());
    }

    #[test]
    fn empty_child_set_is_not_eligible() {
        let api = sp5_catalogue();
        let t = target("web01", "prodX-sp4-x86_64", &["prodX-sp4-ltss-x86_64"]);
        let decision = decide(&api, &flat("sp4", "sp5"), &t).unwrap();
        assert!(matches!(decision, Decision::NotEligible { .. }));
    }

    #[test]
    fn missing_destination_is_not_eligible() {
        let api = FakeApi::new()
            .with_catalogue_entry("prodX-sp4-x86_64", &["prodX-sp4-updates-x86_64"]);
        let t = target("web01", "prodX-sp4-x86_64", &["prodX-sp4-updates-x86_64"]);
        let decision = decide(&api, &flat("sp4", "sp5"), &t).unwrap();
        assert!(!decision.is_eligible());
    }

    #[test]
    fn no_mapping_is_not_eligible() {
        let api = sp5_catalogue();
        let t = target("web01", "prodX-sp4-x86_64", &["prodX-sp4-updates-x86_64"]);
        assert!(!decide(&api, &MaintenanceConfig::default(), &t)
            .unwrap()
            .is_eligible());
    }

    #[test]
    fn version_key_and_full_label_keys() {
        let api = FakeApi::new().with_catalogue_entry(
            "sles15-sp5-pool-x86_64",
            &["sles15-sp5-updates-x86_64"],
        );
        let t = target(
            "db01",
            "sles15-sp4-pool-x86_64",
            &["sles15-sp4-updates-x86_64"],
        );

        let by_version = decide(&api, &flat("sles15-sp4", "sles15-sp5"), &t).unwrap();
        assert!(by_version.is_eligible());

        let by_label = decide(
            &api,
            &flat("sles15-sp4-pool-x86_64", "sles15-sp5-pool-x86_64"),
            &t,
        )
        .unwrap();
        assert!(by_label.is_eligible());
    }

    #[test]
    fn dropped_children_are_reported() {
        let api = sp5_catalogue();
        let t = target(
            "web01",
            "prodX-sp4-x86_64",
            &["prodX-sp4-updates-x86_64", "prodX-sp4-extra-x86_64"],
        );
        let Decision::Eligible(plan) = decide(&api, &flat("sp4", "sp5"), &t).unwrap() else {
            panic!("expected eligible");
        };
        assert_eq!(plan.dropped_children, vec!["prodX-sp5-extra-x86_64"]);
    }

    #[test]
    fn project_mapping_swaps_project_and_token() {
        let api = FakeApi::new()
            .with_project_environments("sles15sp4", &["prod"])
            .with_catalogue_entry(
                "sles15sp5-prod-sles15-sp5-pool-x86_64",
                &["sles15sp5-prod-sles15-sp5-updates-x86_64"],
            );
        let mut cfg = MaintenanceConfig::default();
        cfg.sp_migration_project
            .insert("sles15sp4".to_string(), "sles15sp5".to_string());
        let t = target(
            "app01",
            "sles15sp4-prod-sles15-sp4-pool-x86_64",
            &["sles15sp4-prod-sles15-sp4-updates-x86_64"],
        );

        let Decision::Eligible(plan) = decide(&api, &cfg, &t).unwrap() else {
            panic!("expected eligible");
        };
        assert_eq!(plan.destination.base, "sles15sp5-prod-sles15-sp5-pool-x86_64");
        assert_eq!(
            plan.destination.children,
            vec!["sles15sp5-prod-sles15-sp5-updates-x86_64"]
        );

        cfg.exception_sp
            .insert("sles15sp5".to_string(), vec!["app01".to_string()]);
        assert!(!decide(&api, &cfg, &t).unwrap().is_eligible());
    }
}
