use crate::error::{MaintError, Result};
use crate::severity::{category, ErrorPolicy, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the management server, e.g. `https://suma.example.com`.
    pub url: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Per-job polling timeout.
    #[serde(default = "default_job_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_job_timeout() -> u64 {
    3600
}

fn default_request_timeout() -> u64 {
    60
}

impl ServerConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

// ---------------------------------------------------------------------------
// MaintenanceConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_wait_between_events")]
    pub wait_between_events_check: u64,
    #[serde(default = "default_retry_attempts")]
    pub poll_retry_attempts: u32,
    #[serde(default = "default_retry_backoff")]
    pub poll_retry_backoff_seconds: u64,
    /// Pause before migration steps so refreshed package data settles.
    #[serde(default = "default_settle")]
    pub settle_seconds: u64,
    #[serde(default = "default_wait_between_systems")]
    pub wait_between_systems: u64,
    #[serde(default)]
    pub exclude_for_patch: Vec<String>,
    /// Flat support-pack mapping. Keys are either a full base-channel label
    /// (value is the destination label) or a version token such as `sp4`
    /// (value is the replacement token).
    #[serde(default)]
    pub sp_migration: BTreeMap<String, String>,
    /// Content-lifecycle project → project holding the next version.
    #[serde(default)]
    pub sp_migration_project: BTreeMap<String, String>,
    /// Destination (token, project or label) → hosts that must not migrate.
    #[serde(default)]
    pub exception_sp: BTreeMap<String, Vec<String>>,
    #[serde(default = "default_agent_keywords")]
    pub agent_advisory_keywords: Vec<String>,
    #[serde(default = "default_core_keywords")]
    pub core_advisory_keywords: Vec<String>,
    #[serde(default)]
    pub deprecated_extension_tokens: Vec<String>,
}

fn default_wait_between_events() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    10
}

fn default_settle() -> u64 {
    20
}

fn default_wait_between_systems() -> u64 {
    60
}

fn default_agent_keywords() -> Vec<String> {
    vec!["salt".to_string()]
}

fn default_core_keywords() -> Vec<String> {
    vec!["zlib".to_string(), "zypp".to_string()]
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            wait_between_events_check: default_wait_between_events(),
            poll_retry_attempts: default_retry_attempts(),
            poll_retry_backoff_seconds: default_retry_backoff(),
            settle_seconds: default_settle(),
            wait_between_systems: default_wait_between_systems(),
            exclude_for_patch: Vec::new(),
            sp_migration: BTreeMap::new(),
            sp_migration_project: BTreeMap::new(),
            exception_sp: BTreeMap::new(),
            agent_advisory_keywords: default_agent_keywords(),
            core_advisory_keywords: default_core_keywords(),
            deprecated_extension_tokens: Vec::new(),
        }
    }
}

impl MaintenanceConfig {
    pub fn is_excluded_for_patch(&self, hostname: &str) -> bool {
        self.exclude_for_patch
            .iter()
            .any(|h| h.eq_ignore_ascii_case(hostname))
    }

    /// True if `hostname` is listed under any of the given destination keys.
    pub fn is_migration_exception(&self, hostname: &str, destinations: &[&str]) -> bool {
        destinations.iter().any(|dest| {
            self.exception_sp
                .get(*dest)
                .is_some_and(|hosts| hosts.iter().any(|h| h.eq_ignore_ascii_case(hostname)))
        })
    }
}

// ---------------------------------------------------------------------------
// DirsConfig / NotifyConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirsConfig {
    #[serde(default)]
    pub update_script_dir: Option<PathBuf>,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub receivers: Vec<String>,
    /// Explicit sendmail binary; looked up on `PATH` when unset.
    #[serde(default)]
    pub sendmail_path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub error_handling: ErrorPolicy,
    #[serde(default)]
    pub dirs: DirsConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl Config {
    pub fn new(url: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            server: ServerConfig {
                url: url.into(),
                user: user.into(),
                password: String::new(),
                timeout_seconds: default_job_timeout(),
                request_timeout_seconds: default_request_timeout(),
            },
            maintenance: MaintenanceConfig::default(),
            error_handling: ErrorPolicy::default(),
            dirs: DirsConfig::default(),
            notify: NotifyConfig::default(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(MaintError::ConfigNotFound(path.display().to_string()));
        }
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(data)?;
        if cfg.server.url.trim().is_empty() {
            return Err(MaintError::Config("server.url must not be empty".to_string()));
        }
        Ok(cfg)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        // 1. Error policy: severities must parse, categories should be known
        for (cat, raw) in self.error_handling.entries() {
            if raw.parse::<Severity>().is_err() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!(
                        "error_handling.{cat} has unknown severity '{raw}' (will be treated as fatal)"
                    ),
                });
            }
            if !category::ALL.contains(&cat) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("unknown category '{cat}' in error_handling"),
                });
            }
        }

        // 2. Intervals
        if self.maintenance.wait_between_events_check == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "maintenance.wait_between_events_check is 0; polling will hammer the server"
                    .to_string(),
            });
        }
        if self.server.timeout_seconds == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "server.timeout_seconds is 0; every job would time out".to_string(),
            });
        }
        if self.maintenance.poll_retry_attempts == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "maintenance.poll_retry_attempts must be at least 1".to_string(),
            });
        }

        // 3. Mappings that go nowhere
        for (from, to) in self
            .maintenance
            .sp_migration
            .iter()
            .chain(self.maintenance.sp_migration_project.iter())
        {
            if from == to {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("migration mapping '{from}' maps onto itself"),
                });
            }
        }

        // 4. Notification without receivers
        if self.notify.enabled && self.notify.receivers.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "notify.enabled is set but notify.receivers is empty".to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MINIMAL: &str = "server:\n  url: https://suma.example.com\n  user: admin\n";

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(cfg.server.timeout_seconds, 3600);
        assert_eq!(cfg.maintenance.wait_between_events_check, 30);
        assert_eq!(cfg.maintenance.poll_retry_attempts, 3);
        assert_eq!(cfg.maintenance.poll_retry_backoff_seconds, 10);
        assert_eq!(cfg.maintenance.agent_advisory_keywords, vec!["salt"]);
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn full_config_parses() {
        let yaml = r#"
server:
  url: https://suma.example.com
  user: admin
  password: secret
  timeout_seconds: 1200
maintenance:
  wait_between_events_check: 15
  exclude_for_patch: [db01]
  sp_migration:
    sp4: sp5
  sp_migration_project:
    sles15sp4: sles15sp5
  exception_sp:
    sp5: [hostA]
error_handling:
  update: fatal
  reboot: warning
dirs:
  update_script_dir: /opt/maint/update-scripts
notify:
  enabled: true
  sender: maint@example.com
  receivers: [ops@example.com]
"#;
        let cfg = Config::from_yaml(yaml).unwrap();
        assert_eq!(cfg.server.job_timeout(), Duration::from_secs(1200));
        assert!(cfg.maintenance.is_excluded_for_patch("DB01"));
        assert!(cfg.maintenance.is_migration_exception("hosta", &["sp5"]));
        assert!(!cfg.maintenance.is_migration_exception("hostB", &["sp5"]));
        assert_eq!(cfg.error_handling.severity("reboot"), Severity::Warning);
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn example_config_is_valid() {
        let cfg = Config::from_yaml(include_str!("../../../configsm.example.yaml")).unwrap();
        assert!(cfg.validate().is_empty(), "{:?}", cfg.validate());
        assert_eq!(cfg.error_handling.severity("reboot"), Severity::Error);
        assert_eq!(cfg.error_handling.severity("update"), Severity::Fatal);
        for cat in category::ALL {
            assert!(
                cfg.error_handling.entries().any(|(c, _)| c == *cat),
                "example config lacks error_handling.{cat}"
            );
        }
    }

    #[test]
    fn empty_url_is_rejected() {
        let yaml = "server:\n  url: ''\n  user: admin\n";
        assert!(matches!(Config::from_yaml(yaml), Err(MaintError::Config(_))));
    }

    #[test]
    fn load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(&dir.path().join("configsm.yaml")).unwrap_err();
        assert!(matches!(err, MaintError::ConfigNotFound(_)));
    }

    #[test]
    fn load_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("configsm.yaml");
        std::fs::write(&path, MINIMAL).unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.server.user, "admin");
    }

    #[test]
    fn validate_flags_bad_severity_and_self_mapping() {
        let yaml = r#"
server:
  url: https://suma.example.com
  user: admin
maintenance:
  sp_migration:
    sp4: sp4
error_handling:
  reboot: loud
  nonsense: error
"#;
        let cfg = Config::from_yaml(yaml).unwrap();
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("reboot")));
        assert!(warnings.iter().any(|w| w.message.contains("nonsense")));
        assert!(warnings.iter().any(|w| w.message.contains("maps onto itself")));
    }
}
