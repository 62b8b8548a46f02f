use crate::cmd::update::FlagArgs;
use crate::output::{print_json, print_table};
use anyhow::Context;
use maint_core::api::HttpApi;
use maint_core::clock::{Clock, SystemClock};
use maint_core::config::Config;
use maint_core::session::SessionGuard;
use serde::Serialize;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Serialize)]
struct Launched {
    host: String,
    pid: u32,
}

/// Start one independent `update` run per member of `group`.
///
/// Runs are detached and not awaited; each logs to its own host log.
pub fn run(config_path: &Path, group: &str, flags: &FlagArgs, json: bool) -> anyhow::Result<()> {
    let config = Config::load(config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;
    let api = HttpApi::new(&config.server).context("failed to create API client")?;

    let systems = {
        let session = SessionGuard::login(&api).context("login failed")?;
        session
            .list_group_systems(group)
            .with_context(|| format!("failed to list systems of group '{group}'"))?
    };
    if systems.is_empty() {
        println!("Group '{group}' has no systems.");
        return Ok(());
    }

    let exe = std::env::current_exe().context("cannot locate own executable")?;
    let pause = Duration::from_secs(config.maintenance.wait_between_systems);
    let mut launched = Vec::with_capacity(systems.len());

    for (i, system) in systems.iter().enumerate() {
        if i > 0 && !pause.is_zero() {
            SystemClock.sleep(pause);
        }
        let child = Command::new(&exe)
            .arg("--config")
            .arg(config_path)
            .args(["update", "--server", system.name.as_str()])
            .args(flags.to_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to launch update for {}", system.name))?;
        info!(host = %system.name, pid = child.id(), "update launched");
        launched.push(Launched {
            host: system.name.clone(),
            pid: child.id(),
        });
    }

    if json {
        print_json(&launched)?;
    } else {
        let rows = launched
            .iter()
            .map(|l| vec![l.host.clone(), l.pid.to_string()])
            .collect();
        print_table(&["HOST", "PID"], rows);
    }
    Ok(())
}
