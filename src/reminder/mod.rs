//! Reminder lifecycle: `start`, `clear` and the delayed `check`.
//!
//! `start` persists a fresh token-identified record and hands the token to a
//! [`CheckSpawner`], which in production launches a detached copy of this
//! executable running `check <token>`. That child sleeps for the resolved
//! delay and then sends the email unless the record was cleared, already
//! sent, or replaced by a newer `start`.

use chrono::{DateTime, SubsecRound, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::{resolve_timeout_seconds, HookPaths, ReminderConfig, TIMEOUT_OVERRIDE_ENV};
use crate::delivery::send_email;
use crate::errors::{ReminderError, ReminderResult};
use crate::store::StateStore;
use crate::transport::MailTransport;
use crate::types::{CheckOutcome, NotificationPayload, ReminderRecord, SkipReason};

/// Current time at the millisecond precision stored in the state file.
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Launches the background check for a token.
pub trait CheckSpawner: Send + Sync + fmt::Debug {
    /// Starts the check without waiting for it.
    fn spawn_check(&self, token: &str) -> ReminderResult<()>;
}

/// Spawns `<current exe> --config .. --state .. check <token>` detached from
/// the hook's process.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    config_path: PathBuf,
    state_path: PathBuf,
    verbose: bool,
}

impl ProcessSpawner {
    /// Creates a spawner that forwards the resolved paths to the child.
    pub fn new(paths: &HookPaths, verbose: bool) -> Self {
        Self {
            config_path: paths.config.clone(),
            state_path: paths.state.clone(),
            verbose,
        }
    }

    fn command(&self, program: &Path, token: &str) -> Command {
        let mut command = Command::new(program);
        command
            .arg("--config")
            .arg(&self.config_path)
            .arg("--state")
            .arg(&self.state_path);
        if self.verbose {
            command.arg("--verbose");
        }
        command
            .arg("check")
            .arg(token)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const DETACHED_PROCESS: u32 = 0x0000_0008;
            command.creation_flags(DETACHED_PROCESS);
        }

        command
    }
}

impl CheckSpawner for ProcessSpawner {
    fn spawn_check(&self, token: &str) -> ReminderResult<()> {
        let program = std::env::current_exe().map_err(|e| {
            ReminderError::spawn("cannot locate the current executable").with_cause(e)
        })?;

        let child = self.command(&program, token).spawn().map_err(|e| {
            ReminderError::spawn(format!("cannot spawn {}", program.display())).with_cause(e)
        })?;

        tracing::debug!(pid = child.id(), token, "Spawned background check");
        Ok(())
    }
}

/// Orchestrates the reminder lifecycle against a [`StateStore`].
#[derive(Debug, Clone)]
pub struct ReminderController {
    store: Arc<dyn StateStore>,
    config_path: PathBuf,
    spawner: Arc<dyn CheckSpawner>,
    transport: Option<Arc<dyn MailTransport>>,
    timeout_override: Option<String>,
}

impl ReminderController {
    /// Creates a controller. The delay override is read from the environment.
    pub fn new(
        store: Arc<dyn StateStore>,
        config_path: impl Into<PathBuf>,
        spawner: Arc<dyn CheckSpawner>,
    ) -> Self {
        Self {
            store,
            config_path: config_path.into(),
            spawner,
            transport: None,
            timeout_override: std::env::var(TIMEOUT_OVERRIDE_ENV).ok(),
        }
    }

    /// Sends through `transport` instead of an SMTP transport built from the
    /// configuration.
    pub fn with_transport(mut self, transport: Arc<dyn MailTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replaces the delay override.
    pub fn with_timeout_override(mut self, value: Option<String>) -> Self {
        self.timeout_override = value;
        self
    }

    /// Records a new reminder and launches its delayed check.
    pub fn start(&self, payload: &NotificationPayload) -> ReminderResult<ReminderRecord> {
        let record = ReminderRecord::new(
            Uuid::new_v4().to_string(),
            timestamp_now(),
            payload.extract(),
        );

        self.store.write(&record)?;
        self.spawner.spawn_check(&record.token)?;

        tracing::info!(
            token = %record.token,
            session = record.session_id.as_deref().unwrap_or("-"),
            "Reminder started"
        );
        Ok(record)
    }

    /// Marks the current reminder as cleared. Returns whether one existed.
    pub fn clear(&self) -> ReminderResult<bool> {
        let cleared = self.store.clear(timestamp_now())?;
        if cleared {
            tracing::info!("Reminder cleared");
        } else {
            tracing::debug!("No reminder to clear");
        }
        Ok(cleared)
    }

    /// Sends the reminder for `token` now, unless it is stale, cleared or sent.
    ///
    /// An errored record is not terminal here: checking the same token again
    /// after a failure retries the send.
    pub async fn check_and_send_now(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> ReminderResult<CheckOutcome> {
        let mut record = match self.store.read() {
            Some(record) if record.token == token => record,
            _ => return Ok(CheckOutcome::Skipped(SkipReason::StateMissingOrTokenMismatch)),
        };

        if record.cleared_at.is_some() {
            return Ok(CheckOutcome::Skipped(SkipReason::StateCleared));
        }
        if record.sent_at.is_some() {
            return Ok(CheckOutcome::Skipped(SkipReason::AlreadySent));
        }

        let config = ReminderConfig::load(&self.config_path)?;
        send_email(&config, &record, now, self.transport.as_deref()).await?;

        record.sent_at = Some(now);
        self.store.write(&record)?;
        Ok(CheckOutcome::Sent)
    }

    /// Resolves how long the background check waits.
    ///
    /// A configuration that cannot be loaded here does not fail scheduling;
    /// the same error is reported by the check itself.
    pub fn delay(&self) -> Duration {
        let configured = match ReminderConfig::load(&self.config_path) {
            Ok(config) => config.timeout_seconds,
            Err(e) => {
                tracing::debug!(error = %e, "Using default delay");
                None
            }
        };

        let seconds = resolve_timeout_seconds(configured, self.timeout_override.as_deref());
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    }

    /// Waits out the delay, then runs the check.
    ///
    /// Failures are written into the record and never returned.
    pub async fn schedule_check(&self, token: &str) {
        let delay = self.delay();
        tracing::debug!(token, delay = %humantime::format_duration(delay), "Check scheduled");
        tokio::time::sleep(delay).await;

        match self.check_and_send_now(token, timestamp_now()).await {
            Ok(CheckOutcome::Sent) => tracing::info!(token, "Reminder delivered"),
            Ok(CheckOutcome::Skipped(reason)) => {
                tracing::debug!(token, reason = %reason, "Reminder skipped")
            }
            Err(e) => {
                tracing::error!(token, error = %e, "Reminder check failed");
                self.record_failure(token, &e);
            }
        }
    }

    fn record_failure(&self, token: &str, error: &ReminderError) {
        let mut record = self
            .store
            .read()
            .unwrap_or_else(|| ReminderRecord::bare(token));
        record.error_at = Some(timestamp_now());
        record.error_message = Some(error.to_string());

        if let Err(e) = self.store.write(&record) {
            tracing::warn!(token, error = %e, "Cannot record reminder failure");
        }
    }
}
