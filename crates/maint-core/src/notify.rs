//! Mail notification of recorded errors at the end of a run.

use crate::config::NotifyConfig;
use crate::error::{MaintError, Result};
use crate::severity::RecordedError;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{info, warn};

pub trait Notifier {
    fn notify(&self, subject: &str, body: &str) -> Result<()>;
}

/// Pipes a plain-text mail to `sendmail -t`.
#[derive(Debug, Clone)]
pub struct SendmailNotifier {
    sendmail: PathBuf,
    sender: String,
    receivers: Vec<String>,
}

impl SendmailNotifier {
    /// `Ok(None)` when notification is disabled or has nobody to tell.
    pub fn from_config(config: &NotifyConfig) -> Result<Option<Self>> {
        if !config.enabled || config.receivers.is_empty() {
            return Ok(None);
        }
        let sendmail = match &config.sendmail_path {
            Some(path) => path.clone(),
            None => which::which("sendmail")
                .map_err(|_| MaintError::Notify("sendmail not found on PATH".to_string()))?,
        };
        Ok(Some(Self {
            sendmail,
            sender: config.sender.clone(),
            receivers: config.receivers.clone(),
        }))
    }

    pub fn render(&self, subject: &str, body: &str) -> String {
        let mut mail = String::new();
        if !self.sender.is_empty() {
            mail.push_str(&format!("From: {}\n", self.sender));
        }
        mail.push_str(&format!("To: {}\n", self.receivers.join(", ")));
        mail.push_str(&format!("Subject: {subject}\n\n"));
        mail.push_str(body);
        if !body.ends_with('\n') {
            mail.push('\n');
        }
        mail
    }
}

impl Notifier for SendmailNotifier {
    fn notify(&self, subject: &str, body: &str) -> Result<()> {
        let mut child = Command::new(&self.sendmail)
            .arg("-t")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MaintError::Notify(format!("{}: {e}", self.sendmail.display())))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(self.render(subject, body).as_bytes())
                .map_err(|e| MaintError::Notify(e.to_string()))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| MaintError::Notify(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MaintError::Notify(stderr.trim().to_string()));
        }
        Ok(())
    }
}

/// Subject and body listing every recorded error of a run.
pub fn error_report(host: &str, errors: &[RecordedError]) -> (String, String) {
    let subject = format!("system-update: {} error(s) on {host}", errors.len());
    let mut body = format!("The maintenance run for {host} recorded the following errors:\n\n");
    for e in errors {
        body.push_str(&format!("[{}] {}: {}\n", e.severity, e.category, e.message));
    }
    (subject, body)
}

/// Mail the run's errors when notification is configured. Never fails.
pub fn notify_on_errors(config: &NotifyConfig, host: &str, errors: &[RecordedError]) {
    if errors.is_empty() {
        return;
    }
    let notifier = match SendmailNotifier::from_config(config) {
        Ok(Some(notifier)) => notifier,
        Ok(None) => return,
        Err(e) => {
            warn!("{e}");
            return;
        }
    };
    let (subject, body) = error_report(host, errors);
    match notifier.notify(&subject, &body) {
        Ok(()) => info!(receivers = config.receivers.len(), "error report mailed"),
        Err(e) => warn!("{e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::severity::Severity;

    #[test]
    fn disabled_config_yields_none() {
        let cfg = NotifyConfig::default();
        assert!(SendmailNotifier::from_config(&cfg).unwrap().is_none());
    }

    #[test]
    fn explicit_path_skips_lookup() {
        let cfg = NotifyConfig {
            enabled: true,
            sender: "maint@example.com".to_string(),
            receivers: vec!["ops@example.com".to_string(), "dba@example.com".to_string()],
            sendmail_path: Some(PathBuf::from("/nonexistent/sendmail")),
        };
        let notifier = SendmailNotifier::from_config(&cfg).unwrap().unwrap();
        let mail = notifier.render("subject", "body");
        assert!(mail.starts_with("From: maint@example.com\n"));
        assert!(mail.contains("To: ops@example.com, dba@example.com\n"));
        assert!(mail.ends_with("\n\nbody\n"));
        assert!(matches!(
            notifier.notify("s", "b"),
            Err(MaintError::Notify(_))
        ));
    }

    #[test]
    fn report_lists_errors() {
        let errors = vec![RecordedError {
            category: "reboot".to_string(),
            severity: Severity::Error,
            message: "Package update failed".to_string(),
        }];
        let (subject, body) = error_report("web01", &errors);
        assert!(subject.contains("1 error(s) on web01"));
        assert!(body.contains("[error] reboot: Package update failed"));
    }
}
