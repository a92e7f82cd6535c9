//! Consolidated failure notifications: one email and/or webhook post per
//! stage listing every failed run.
//!
//! Delivery problems are logged and swallowed; a broken notification
//! channel must never fail the pipeline or trigger retries.

use std::collections::BTreeSet;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;

use tracing::{error, info};

use crate::config::ReportingConfig;
use crate::error::{ArchiverError, Result};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Fire the configured failure notifications for a stage. Never fails the
/// caller.
pub fn send_failure_report(failed_runs: &BTreeSet<u32>, config: &ReportingConfig, stage: &str) {
    if failed_runs.is_empty() {
        return;
    }
    if let Err(e) = send_webhook(failed_runs, config, stage) {
        error!("Failed to deliver webhook failure report: {e}");
    }
    if let Err(e) = send_email(failed_runs, config, stage) {
        error!("Failed to deliver email failure report: {e}");
    }
}

fn report_body(failed_runs: &BTreeSet<u32>, stage: &str) -> String {
    let runs: Vec<String> = failed_runs.iter().map(|r| r.to_string()).collect();
    format!(
        "The following runs failed during the {stage} stage:\n\n{}",
        runs.join("\n")
    )
}

fn send_webhook(failed_runs: &BTreeSet<u32>, config: &ReportingConfig, stage: &str) -> Result<()> {
    let Some(url) = config.webhook_url.as_deref() else {
        return Ok(());
    };
    let payload = serde_json::json!({ "text": report_body(failed_runs, stage) });
    let agent = ureq::AgentBuilder::new().timeout(WEBHOOK_TIMEOUT).build();
    agent
        .post(url)
        .send_json(payload)
        .map_err(|e| ArchiverError::Reporting(format!("webhook post failed: {e}")))?;
    info!("Webhook failure report sent for {stage} stage ({} runs)", failed_runs.len());
    Ok(())
}

/// Hand the message to the local `sendmail` for delivery; mail routing is
/// the MTA's problem, not ours.
fn send_email(failed_runs: &BTreeSet<u32>, config: &ReportingConfig, stage: &str) -> Result<()> {
    if !config.send_email_on_error {
        return Ok(());
    }
    let (Some(recipient), Some(sender)) =
        (config.recipient_email.as_deref(), config.sender_email.as_deref())
    else {
        // Config validation guarantees these; a missing address here means
        // the config was mutated after load.
        return Err(ArchiverError::Reporting(
            "email reporting enabled without addresses".into(),
        ));
    };

    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    let stage_title = {
        let mut chars = stage.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            None => String::new(),
        }
    };
    let message = format!(
        "From: {sender}\nTo: {recipient}\nSubject: Run Record Archiver {stage_title} Errors on {host} at {now}\n\n{}\n",
        report_body(failed_runs, stage)
    );

    let mut child = Command::new("sendmail")
        .arg("-t")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| ArchiverError::Reporting(format!("spawning sendmail: {e}")))?;
    child
        .stdin
        .take()
        .ok_or_else(|| ArchiverError::Reporting("sendmail stdin unavailable".into()))?
        .write_all(message.as_bytes())
        .map_err(|e| ArchiverError::Reporting(format!("writing to sendmail: {e}")))?;
    let status = child
        .wait()
        .map_err(|e| ArchiverError::Reporting(format!("waiting for sendmail: {e}")))?;
    if !status.success() {
        return Err(ArchiverError::Reporting(format!(
            "sendmail exited with {status}"
        )));
    }
    info!("Failure report email sent to {recipient}");
    Ok(())
}
