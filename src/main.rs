//! `email-reminder` binary entry point.

use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    ExitCode::from(integrations_email_reminder::cli::run(std::env::args_os()).await)
}
