//! revssh is meant to be the forced command of an SSH account on a host that
//! two peers can both reach. Either peer logs in, and whatever they asked to
//! run arrives in `SSH_ORIGINAL_COMMAND`, which `run` treats as hostile:
//!
//! 1. split it like a shell would,
//! 2. refuse anything whose first word is not a known command,
//! 3. parse the rest of the words for that command,
//! 4. load the host config, and
//! 5. hand off to the command's handler.
//!
//! See `dispatch.rs` for the handlers and `exit.rs` for what the peer gets
//! back.

pub mod command;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod exit;
pub mod keeper;
pub mod replace;
pub mod script;
pub mod signals;

pub use command::{CommandName, ParsedArguments};
pub use config::HostConfig;
pub use dispatch::{Dispatcher, Environment, Reply, SystemEnvironment};
pub use error::BrokerError;
pub use exit::ExitOutcome;

use std::io::Write;

/// The environment variable sshd puts the client's requested command in.
pub const ORIGINAL_COMMAND_VAR: &str = "SSH_ORIGINAL_COMMAND";

/// Printed for any command outside the vocabulary. Fixed text; never says
/// what was asked for or why it was refused.
pub const DENIED_MESSAGE: &str =
  "You're not allowed to execute arbitrary commands on this server.\n(This incident has been logged.)\n";

pub const NO_COMMAND_MESSAGE: &str = "No command specified!\n";

/// Run one invocation from the raw original command to an exit outcome.
///
/// `load_config` is only called once the command has been authorized and
/// parsed. A signal that arrives while any command other than `open` is
/// running turns the outcome into `Interrupted`.
pub async fn run<E, F, O, R>(
  prog: &str,
  original_command: &str,
  load_config: F,
  mut env: E,
  out: &mut O,
  err: &mut R,
) -> anyhow::Result<ExitOutcome>
where
  E: Environment,
  F: FnOnce() -> anyhow::Result<HostConfig>,
  O: Write + Send,
  R: Write + Send,
{
  let outcome = run_command(prog, original_command, load_config, &mut env, out, err).await?;
  // `open` consumes the signal that ends it, so anything still pending
  // arrived during some other command.
  if let Some(signal) = env.pending_interrupt().await {
    tracing::info!(signal, ?outcome, "interrupted");
    return Ok(ExitOutcome::Interrupted);
  }
  Ok(outcome)
}

async fn run_command<E, F, O, R>(
  prog: &str,
  original_command: &str,
  load_config: F,
  env: &mut E,
  out: &mut O,
  err: &mut R,
) -> anyhow::Result<ExitOutcome>
where
  E: Environment,
  F: FnOnce() -> anyhow::Result<HostConfig>,
  O: Write + Send,
  R: Write + Send,
{
  // NOTE: we log the raw command with Debug formatting so control characters
  // from the peer can't forge log lines.
  tracing::debug!(?original_command, "received command");

  let Some(argv) = shlex::split(original_command) else {
    tracing::error!(?original_command, "could not split command");
    return Ok(ExitOutcome::Suppressed);
  };

  let args = match command::parse(prog, &argv) {
    Ok(args) => args,
    Err(BrokerError::NoCommand) => {
      err.write_all(NO_COMMAND_MESSAGE.as_bytes())?;
      return Ok(ExitOutcome::Failure);
    }
    Err(BrokerError::Denied) => {
      tracing::warn!(command = ?argv[0], argc = argv.len(), "denied command");
      err.write_all(DENIED_MESSAGE.as_bytes())?;
      return Ok(ExitOutcome::Failure);
    }
    Err(BrokerError::Usage(error)) => return report_usage_error(error, out, err),
    Err(error) => return Err(error.into()),
  };
  tracing::info!(command = %args.name(), "authorized command");

  let host_config = load_config()?;
  Ok(Dispatcher::new(prog, env).dispatch(&host_config, args, out, err).await)
}

fn report_usage_error<O: Write, R: Write>(error: clap::Error, out: &mut O, err: &mut R) -> anyhow::Result<ExitOutcome> {
  use clap::error::ErrorKind;

  let rendered = error.render().to_string();
  match error.kind() {
    // `open --help` and friends: asked for, so not an error.
    ErrorKind::DisplayHelp | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
      out.write_all(rendered.as_bytes())?;
      Ok(ExitOutcome::Success)
    }
    kind => {
      tracing::info!(?kind, "usage error");
      err.write_all(rendered.as_bytes())?;
      Ok(ExitOutcome::Usage)
    }
  }
}
