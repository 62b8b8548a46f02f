use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use maint_core::config::{Config, WarnLevel};
use maint_core::severity::category;
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Validate the config for common mistakes
    Validate,

    /// Show the resolved config file and effective error policy
    Show,
}

pub fn run(config_path: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    let config = Config::load(config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;
    match subcmd {
        ConfigSubcommand::Validate => validate(&config, json),
        ConfigSubcommand::Show => show(config_path, &config, json),
    }
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(config: &Config, json: bool) -> anyhow::Result<()> {
    let warnings = config.validate();

    if json {
        let value = serde_json::json!({
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(config_path: &Path, config: &Config, json: bool) -> anyhow::Result<()> {
    let policy: Vec<(&str, String)> = category::ALL
        .iter()
        .map(|c| (*c, config.error_handling.severity(c).to_string()))
        .collect();

    if json {
        let severities: serde_json::Map<String, serde_json::Value> = policy
            .iter()
            .map(|(c, s)| (c.to_string(), serde_json::Value::from(s.as_str())))
            .collect();
        let value = serde_json::json!({
            "path": config_path,
            "server": config.server.url,
            "timeout_seconds": config.server.timeout_seconds,
            "wait_between_events_check": config.maintenance.wait_between_events_check,
            "error_handling": severities,
        });
        return print_json(&value);
    }

    println!("Config:  {}", config_path.display());
    println!("Server:  {}", config.server.url);
    println!(
        "Polling: every {}s, job timeout {}s",
        config.maintenance.wait_between_events_check, config.server.timeout_seconds
    );
    println!();
    let rows = policy
        .into_iter()
        .map(|(c, s)| vec![c.to_string(), s])
        .collect();
    print_table(&["CATEGORY", "SEVERITY"], rows);
    Ok(())
}
