use crate::output::{print_json, print_report};
use anyhow::Context;
use clap::Args;
use maint_core::api::HttpApi;
use maint_core::clock::SystemClock;
use maint_core::config::Config;
use maint_core::notify::notify_on_errors;
use maint_core::orchestrator::{run_update, RunReport, WorkflowFlags};
use maint_core::severity::{category, RecordedError, Severity};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{error, info};

/// Workflow switches shared by `update` and `group`.
#[derive(Args, Debug, Clone, Default)]
pub struct FlagArgs {
    /// Do not reboot after patching or support pack migration
    #[arg(long, short = 'n')]
    pub no_reboot: bool,

    /// Reboot even if no update asked for it
    #[arg(long, short = 'f')]
    pub force_reboot: bool,

    /// Apply the configuration state before and after patching
    #[arg(long, short = 'c')]
    pub apply_config: bool,

    /// Run the general and host-specific begin/end update scripts
    #[arg(long, short = 'u')]
    pub run_update_script: bool,

    /// Skip the support pack migration dry run
    #[arg(long)]
    pub no_dry_run: bool,
}

impl FlagArgs {
    pub fn workflow_flags(&self) -> WorkflowFlags {
        WorkflowFlags {
            no_reboot: self.no_reboot,
            force_reboot: self.force_reboot,
            apply_config: self.apply_config,
            run_update_script: self.run_update_script,
            no_dry_run: self.no_dry_run,
        }
    }

    /// The same switches as command-line arguments, for child runs.
    pub fn to_args(&self) -> Vec<&'static str> {
        [
            (self.no_reboot, "--no-reboot"),
            (self.force_reboot, "--force-reboot"),
            (self.apply_config, "--apply-config"),
            (self.run_update_script, "--run-update-script"),
            (self.no_dry_run, "--no-dry-run"),
        ]
        .into_iter()
        .filter(|(set, _)| *set)
        .map(|(_, arg)| arg)
        .collect()
    }
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Name of the system to maintain
    #[arg(long, short = 's')]
    pub server: String,

    #[command(flatten)]
    pub flags: FlagArgs,

    /// Script to start on this host when the run has finished, with an
    /// optional parameter ("notify.sh done")
    #[arg(long, short = 'p')]
    pub post_script: Option<String>,
}

pub fn run(config_path: &Path, args: UpdateArgs, json: bool) -> anyhow::Result<()> {
    let config = Config::load(config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;
    let api = HttpApi::new(&config.server).context("failed to create API client")?;

    let mut report = run_update(
        &api,
        &SystemClock,
        &config,
        &args.server,
        args.flags.workflow_flags(),
    );
    if let Some(command) = &args.post_script {
        if report.aborted {
            info!("run aborted; post script not started");
        } else {
            start_post_script(command, &mut report);
        }
    }
    notify_on_errors(&config.notify, &report.host, &report.errors);

    if json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }

    if report.exit_code() != 0 {
        anyhow::bail!(
            "maintenance of {} finished with {} error(s)",
            report.host,
            report.errors.len()
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Post script
// ---------------------------------------------------------------------------

/// A local program started, not awaited, after a completed run.
#[derive(Debug, PartialEq, Eq)]
struct PostScript {
    program: PathBuf,
    param: Option<String>,
}

impl PostScript {
    /// The first word names an existing file; the rest is handed over as a
    /// single parameter. A bare file name is run from the working directory.
    fn parse(command: &str) -> anyhow::Result<Self> {
        let command = command.trim();
        let (first, rest) = match command.split_once(char::is_whitespace) {
            Some((first, rest)) => (first, rest.trim()),
            None => (command, ""),
        };
        if first.is_empty() {
            anyhow::bail!("post script is empty");
        }
        if !Path::new(first).is_file() {
            anyhow::bail!("post script {first} does not exist");
        }
        let program = if first.contains('/') {
            PathBuf::from(first)
        } else {
            Path::new(".").join(first)
        };
        Ok(Self {
            program,
            param: (!rest.is_empty()).then(|| rest.to_string()),
        })
    }

    fn spawn(&self) -> anyhow::Result<u32> {
        let child = Command::new(&self.program)
            .args(&self.param)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start post script {}", self.program.display()))?;
        Ok(child.id())
    }
}

/// Start `command`; a failure is recorded as a `script` error.
fn start_post_script(command: &str, report: &mut RunReport) {
    info!("executing post script {command}");
    match PostScript::parse(command).and_then(|script| script.spawn()) {
        Ok(pid) => info!(pid, "post script started"),
        Err(e) => {
            error!("{e:#}");
            report.errors.push(RecordedError {
                category: category::SCRIPT.to_string(),
                severity: Severity::Error,
                message: format!("{e:#}"),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_round_trip_to_args() {
        let flags = FlagArgs {
            no_reboot: true,
            run_update_script: true,
            ..FlagArgs::default()
        };
        assert_eq!(flags.to_args(), vec!["--no-reboot", "--run-update-script"]);
        let wf = flags.workflow_flags();
        assert!(wf.no_reboot && wf.run_update_script);
        assert!(!wf.force_reboot && !wf.apply_config && !wf.no_dry_run);
    }

    #[test]
    fn no_flags_no_args() {
        assert!(FlagArgs::default().to_args().is_empty());
    }

    #[test]
    fn post_script_keeps_rest_as_one_parameter() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("notify.sh");
        std::fs::write(&path, "#!/bin/sh\n").unwrap();

        let script = PostScript::parse(&format!("{}  done  web01 ", path.display())).unwrap();
        assert_eq!(script.program, path);
        assert_eq!(script.param.as_deref(), Some("done  web01"));
    }

    #[test]
    fn bare_post_script_name_runs_from_working_directory() {
        // Cargo.toml is a file in the crate directory tests run from
        let script = PostScript::parse("Cargo.toml").unwrap();
        assert_eq!(script.program, PathBuf::from("./Cargo.toml"));
        assert_eq!(script.param, None);
    }

    #[test]
    fn missing_post_script_is_an_error() {
        let err = PostScript::parse("/nonexistent/notify.sh done").unwrap_err();
        assert!(err.to_string().contains("does not exist"));
        assert!(PostScript::parse("   ").is_err());
    }

    #[test]
    fn failed_post_script_is_recorded() {
        let mut report = RunReport {
            host: "web01".to_string(),
            path: None,
            jobs: Vec::new(),
            errors: Vec::new(),
            reboot_scheduled: false,
            aborted: false,
        };
        start_post_script("/nonexistent/notify.sh", &mut report);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].category, category::SCRIPT);
        assert_eq!(report.exit_code(), 1);
    }
}
