//! Update-script profiles run before and after maintenance.
//!
//! `<update_script_dir>/general.yaml` applies to every host and
//! `<update_script_dir>/<hostname>.yaml` to one host:
//!
//! ```yaml
//! begin:
//!   commands: ["systemctl stop app"]
//!   state: ["app-maintenance"]
//!   timeout: 300
//! end:
//!   commands: ["systemctl start app"]
//! ```
//!
//! Commands of both profiles are joined into one bash script, general
//! first. `state` names configuration channels applied by highstate.

use crate::api::FleetApi;
use crate::error::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

pub const DEFAULT_SCRIPT_TIMEOUT: u64 = 60;
const GENERAL_PROFILE: &str = "general";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Begin,
    End,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Begin => "begin",
            Phase::End => "end",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PhaseSection {
    #[serde(default)]
    commands: Vec<String>,
    #[serde(default)]
    state: Vec<String>,
    #[serde(default)]
    timeout: Option<u64>,
}

/// Everything one phase contributes, merged over both profiles.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScriptPlan {
    /// Full script including the interpreter line; `None` without commands.
    pub body: Option<String>,
    /// Configuration channels that exist on the server.
    pub channels: Vec<String>,
    pub timeout_seconds: u64,
    /// Recoverable problems found while assembling (missing profile,
    /// unknown state channel, unreadable file).
    pub problems: Vec<String>,
}

pub fn assemble(
    api: &dyn FleetApi,
    script_dir: &Path,
    hostname: &str,
    phase: Phase,
) -> Result<ScriptPlan> {
    let mut plan = ScriptPlan {
        timeout_seconds: DEFAULT_SCRIPT_TIMEOUT,
        ..ScriptPlan::default()
    };
    let mut script = String::new();
    let mut general_timeout = None;
    let mut host_timeout = None;

    for (profile, timeout) in [
        (GENERAL_PROFILE, &mut general_timeout),
        (hostname, &mut host_timeout),
    ] {
        let Some(section) = read_section(script_dir, profile, phase, &mut plan.problems) else {
            continue;
        };
        for command in &section.commands {
            script.push_str(command.trim_end());
            script.push('\n');
        }
        for state in section.state {
            if api.config_channel_exists(&state)? {
                plan.channels.push(state);
            } else {
                plan.problems
                    .push(format!("the state configchannel {state} doesn't exist"));
            }
        }
        *timeout = section.timeout;
    }

    if !script.is_empty() {
        plan.body = Some(format!("#!/bin/bash\n{script}"));
    }
    plan.timeout_seconds = host_timeout
        .or(general_timeout)
        .unwrap_or(DEFAULT_SCRIPT_TIMEOUT);
    Ok(plan)
}

fn read_section(
    dir: &Path,
    profile: &str,
    phase: Phase,
    problems: &mut Vec<String>,
) -> Option<PhaseSection> {
    let path = dir.join(format!("{profile}.yaml"));
    if !path.exists() {
        problems.push(format!("there is no update script '{profile}' available"));
        return None;
    }
    let parsed = std::fs::read_to_string(&path)
        .map_err(|e| e.to_string())
        .and_then(|data| {
            serde_yaml::from_str::<BTreeMap<String, PhaseSection>>(&data).map_err(|e| e.to_string())
        });
    match parsed {
        Ok(mut phases) => phases.remove(phase.as_str()),
        Err(e) => {
            problems.push(format!("unable to read {}: {e}", path.display()));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::FakeApi;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, yaml: &str) {
        std::fs::write(dir.path().join(name), yaml).unwrap();
    }

    #[test]
    fn merges_general_then_host() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "general.yaml",
            "begin:\n  commands: ['echo general']\n  timeout: 120\n",
        );
        write(
            &dir,
            "web01.yaml",
            "begin:\n  commands: ['echo host  ']\n  state: [app-stop, missing]\n",
        );
        let api = FakeApi::new().with_config_channels(&["app-stop"]);

        let plan = assemble(&api, dir.path(), "web01", Phase::Begin).unwrap();
        assert_eq!(
            plan.body.as_deref(),
            Some("#!/bin/bash\necho general\necho host\n")
        );
        assert_eq!(plan.channels, vec!["app-stop"]);
        assert_eq!(plan.timeout_seconds, 120);
        assert_eq!(plan.problems.len(), 1);
        assert!(plan.problems[0].contains("missing"));
    }

    #[test]
    fn host_timeout_wins() {
        let dir = TempDir::new().unwrap();
        write(&dir, "general.yaml", "end:\n  timeout: 120\n");
        write(&dir, "web01.yaml", "end:\n  commands: [reboot-app]\n  timeout: 30\n");
        let plan = assemble(&FakeApi::new(), dir.path(), "web01", Phase::End).unwrap();
        assert_eq!(plan.timeout_seconds, 30);
    }

    #[test]
    fn missing_profiles_are_reported() {
        let dir = TempDir::new().unwrap();
        let plan = assemble(&FakeApi::new(), dir.path(), "web01", Phase::Begin).unwrap();
        assert!(plan.body.is_none());
        assert!(plan.channels.is_empty());
        assert_eq!(plan.timeout_seconds, DEFAULT_SCRIPT_TIMEOUT);
        assert_eq!(plan.problems.len(), 2);
    }

    #[test]
    fn other_phase_is_ignored() {
        let dir = TempDir::new().unwrap();
        write(&dir, "general.yaml", "end:\n  commands: ['echo bye']\n");
        write(&dir, "web01.yaml", "{}\n");
        let plan = assemble(&FakeApi::new(), dir.path(), "web01", Phase::Begin).unwrap();
        assert!(plan.body.is_none());
        assert!(plan.problems.is_empty());
    }
}
