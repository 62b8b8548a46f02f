use maint_core::orchestrator::{RunReport, WorkflowPath};
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let header_row: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:width$}", h, width = widths[i]))
        .collect();
    println!("{}", header_row.join("  ").trim_end());

    let sep: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    println!("{}", sep.join("  "));

    for row in &rows {
        let cells: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let w = widths.get(i).copied().unwrap_or(0);
                format!("{:width$}", cell, width = w)
            })
            .collect();
        println!("{}", cells.join("  ").trim_end());
    }
}

// ---------------------------------------------------------------------------
// Run report
// ---------------------------------------------------------------------------

pub fn print_report(report: &RunReport) {
    let path = match report.path {
        Some(WorkflowPath::Patch) => "patch",
        Some(WorkflowPath::Migrate) => "support pack migration",
        None => "not started",
    };
    println!("Host:   {}", report.host);
    println!("Path:   {path}");
    println!("Reboot: {}", if report.reboot_scheduled { "scheduled" } else { "no" });
    println!();

    if report.jobs.is_empty() {
        println!("No jobs were scheduled.");
    } else {
        let rows = report
            .jobs
            .iter()
            .map(|j| {
                vec![
                    j.id.to_string(),
                    j.label.clone(),
                    j.status.to_string(),
                    j.message.clone(),
                ]
            })
            .collect();
        print_table(&["JOB", "STEP", "STATUS", "MESSAGE"], rows);
    }

    if !report.errors.is_empty() {
        println!();
        println!("Errors:");
        for e in &report.errors {
            println!("  [{}] {}: {}", e.severity, e.category, e.message);
        }
    }
}
