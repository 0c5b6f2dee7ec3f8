//! Command-line interface for the hook binary.
//!
//! Any parse failure other than `--help`/`--version` prints the short usage
//! line on stdout and exits with status 1, which is what the hook host expects
//! from a misconfigured hook command.

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use std::ffi::OsString;
use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::HookPaths;
use crate::observability::init_tracing;
use crate::reminder::{ProcessSpawner, ReminderController};
use crate::store::JsonFileStore;
use crate::types::NotificationPayload;

/// Short usage line.
pub const USAGE: &str = "Usage: email-reminder [--config <path>] [--state <path>] [-v] <start|clear|check <token>>";

/// Email reminder hook.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "email-reminder", version)]
#[command(about = "Emails you when an assistant prompt has been waiting too long")]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// Configuration file (default: email.config.local.json next to the executable)
    #[arg(long, global = true, env = "EMAIL_REMINDER_CONFIG")]
    pub config: Option<PathBuf>,

    /// State file (default: email-reminder.state.json next to the executable)
    #[arg(long, global = true, env = "EMAIL_REMINDER_STATE")]
    pub state: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Hook commands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Record a notification read from stdin and schedule the reminder
    Start,
    /// Cancel the pending reminder
    Clear,
    /// Wait out the delay, then send the reminder for a token
    Check {
        /// Token of the reminder to check
        token: Option<String>,
        /// Anything after the token is ignored
        #[arg(hide = true)]
        extra: Vec<String>,
    },
}

/// Parses `args` and runs the selected command. Returns the exit status.
pub async fn run<I, T>(args: I) -> u8
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return 0;
        }
        Err(_) => {
            println!("{}", USAGE);
            return 1;
        }
    };

    init_tracing(cli.verbose);
    execute(cli).await
}

/// Runs an already parsed command line.
pub async fn execute(cli: Cli) -> u8 {
    let Some(command) = cli.command else {
        println!("{}", USAGE);
        return 1;
    };

    let paths = HookPaths::resolve(cli.config, cli.state);
    tracing::debug!(config = %paths.config.display(), state = %paths.state.display(), "Resolved paths");

    let controller = ReminderController::new(
        Arc::new(JsonFileStore::new(&paths.state)),
        &paths.config,
        Arc::new(ProcessSpawner::new(&paths, cli.verbose)),
    );

    match command {
        Command::Start => match controller.start(&read_payload()) {
            Ok(_) => 0,
            Err(e) => {
                tracing::error!(error = %e, "start failed");
                1
            }
        },
        Command::Clear => match controller.clear() {
            Ok(_) => 0,
            Err(e) => {
                tracing::error!(error = %e, "clear failed");
                1
            }
        },
        Command::Check { token: None, .. } => {
            println!("{}", USAGE);
            1
        }
        Command::Check {
            token: Some(token), ..
        } => {
            controller.schedule_check(&token).await;
            0
        }
    }
}

/// Reads the notification payload from stdin. A terminal is never read.
fn read_payload() -> NotificationPayload {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return NotificationPayload::default();
    }

    let mut input = String::new();
    if let Err(e) = stdin.lock().read_to_string(&mut input) {
        tracing::debug!(error = %e, "Cannot read stdin");
        return NotificationPayload::default();
    }
    NotificationPayload::parse(&input)
}
