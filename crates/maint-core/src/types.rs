use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SystemId(pub i64);

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier the remote assigns to a scheduled action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Entitlement
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entitlement {
    /// Managed through the configuration-management agent (salt).
    AgentManaged,
    Classic,
}

impl Entitlement {
    pub fn from_base_entitlement(value: &str) -> Self {
        if value.contains("salt") {
            Entitlement::AgentManaged
        } else {
            Entitlement::Classic
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Entitlement::AgentManaged => "agent_managed",
            Entitlement::Classic => "classic",
        }
    }
}

impl fmt::Display for Entitlement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TargetSystem
// ---------------------------------------------------------------------------

/// Snapshot of the system being maintained, taken once at run start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSystem {
    pub id: SystemId,
    pub hostname: String,
    pub base_channel: String,
    pub child_channels: Vec<String>,
    pub entitlement: Entitlement,
    pub inactive: bool,
}

impl TargetSystem {
    pub fn is_agent_managed(&self) -> bool {
        self.entitlement == Entitlement::AgentManaged
    }
}

// ---------------------------------------------------------------------------
// Remote records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemRef {
    pub id: SystemId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemDetails {
    pub id: SystemId,
    #[serde(default)]
    pub profile_name: String,
    #[serde(default)]
    pub base_entitlement: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub label: String,
    #[serde(default)]
    pub parent_label: Option<String>,
}

impl ChannelInfo {
    pub fn is_base(&self) -> bool {
        self.parent_label.as_deref().map_or(true, str::is_empty)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Erratum {
    pub id: i64,
    pub advisory_name: String,
    #[serde(default)]
    pub advisory_synopsis: String,
}

impl Erratum {
    /// Case-insensitive keyword match against the advisory synopsis.
    pub fn matches_any(&self, keywords: &[String]) -> bool {
        let synopsis = self.advisory_synopsis.to_lowercase();
        keywords
            .iter()
            .any(|k| synopsis.contains(&k.to_lowercase()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradablePackage {
    pub name: String,
    pub to_package_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub name: String,
}

/// A migration destination offered by the remote for one system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationTarget {
    pub ident: String,
    pub friendly: String,
}

/// Per-system row of a schedule status listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSystemStatus {
    pub server_id: SystemId,
    #[serde(default)]
    pub message: String,
}

// ---------------------------------------------------------------------------
// ChannelMapping
// ---------------------------------------------------------------------------

/// A base channel plus its ordered child channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMapping {
    pub base: String,
    pub children: Vec<String>,
}

impl ChannelMapping {
    /// Derive a mapping for `new_base` by replacing `old_token` with
    /// `new_token` in every child label.
    pub fn translate(&self, new_base: &str, old_token: &str, new_token: &str) -> ChannelMapping {
        ChannelMapping {
            base: new_base.to_string(),
            children: self
                .children
                .iter()
                .map(|c| c.replace(old_token, new_token))
                .collect(),
        }
    }

    /// Keep only children that are real children of the base channel.
    /// Returns the labels that were dropped.
    pub fn retain_existing(&mut self, existing_children: &[String]) -> Vec<String> {
        let mut dropped = Vec::new();
        self.children.retain(|c| {
            let keep = existing_children.iter().any(|e| e == c);
            if !keep {
                dropped.push(c.clone());
            }
            keep
        });
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entitlement_from_remote_string() {
        assert_eq!(
            Entitlement::from_base_entitlement("salt_entitled"),
            Entitlement::AgentManaged
        );
        assert_eq!(
            Entitlement::from_base_entitlement("enterprise_entitled"),
            Entitlement::Classic
        );
    }

    #[test]
    fn erratum_keyword_match_is_case_insensitive() {
        let e = Erratum {
            id: 1,
            advisory_name: "SUSE-2024-1".to_string(),
            advisory_synopsis: "Recommended update for Salt".to_string(),
        };
        assert!(e.matches_any(&["salt".to_string()]));
        assert!(!e.matches_any(&["zypp".to_string()]));
    }

    #[test]
    fn channel_mapping_translate_and_validate() {
        let current = ChannelMapping {
            base: "prod-sles15-sp4-pool-x86_64".to_string(),
            children: vec![
                "prod-sles15-sp4-updates-x86_64".to_string(),
                "prod-sle-module-basesystem15-sp4-pool-x86_64".to_string(),
            ],
        };
        let mut next = current.translate("prod-sles15-sp5-pool-x86_64", "sp4", "sp5");
        assert_eq!(next.children[0], "prod-sles15-sp5-updates-x86_64");

        let dropped = next.retain_existing(&["prod-sles15-sp5-updates-x86_64".to_string()]);
        assert_eq!(next.children, vec!["prod-sles15-sp5-updates-x86_64"]);
        assert_eq!(dropped, vec!["prod-sle-module-basesystem15-sp5-pool-x86_64"]);
    }

    #[test]
    fn channel_info_base_detection() {
        let base = ChannelInfo {
            label: "a".to_string(),
            parent_label: Some(String::new()),
        };
        let child = ChannelInfo {
            label: "b".to_string(),
            parent_label: Some("a".to_string()),
        };
        assert!(base.is_base());
        assert!(!child.is_base());
    }
}
