use anyhow::Context;
use clap::Parser;
use revssh::{ExitOutcome, HostConfig, SystemEnvironment, ORIGINAL_COMMAND_VAR};
use std::env::VarError;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use tracing::Instrument;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use uuid::Uuid;

/// Forced command for reverse SSH tunnels through this host.
///
/// Install it in `authorized_keys` as `command="/path/to/revssh ..."`. The
/// command a peer asks for is read from SSH_ORIGINAL_COMMAND, never from
/// these arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
  /// Append logs to this file. Without it nothing is logged, since stderr
  /// goes straight back to the peer.
  #[arg(long)]
  log_file: Option<PathBuf>,

  /// Log filter directives, eg "revssh=debug". [default: $REVSSH_LOG or "info"]
  #[arg(long)]
  log_filter: Option<String>,
}

fn init_tracing(args: &Args) -> anyhow::Result<()> {
  let Some(path) = &args.log_file else {
    return Ok(());
  };
  let file = OpenOptions::new()
    .create(true)
    .append(true)
    .open(path)
    .with_context(|| format!("failed to open log file {}", path.display()))?;

  let directives = args
    .log_filter
    .clone()
    .or_else(|| std::env::var("REVSSH_LOG").ok())
    .unwrap_or_else(|| "info".to_owned());

  tracing_subscriber::registry()
    .with(
      tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(file)),
    )
    .with(tracing_subscriber::EnvFilter::try_new(directives).context("invalid log filter")?)
    .try_init()
    .context("failed to install tracing subscriber")?;
  Ok(())
}

/// The name usage messages refer to us by.
fn prog_name() -> String {
  std::env::args_os()
    .next()
    .map(PathBuf::from)
    .and_then(|path| path.file_name().map(|name| name.to_string_lossy().into_owned()))
    .unwrap_or_else(|| "revssh".to_owned())
}

/// Everything between parsing our own flags and exiting.
async fn serve(prog: &str, original_command: &str) -> anyhow::Result<ExitOutcome> {
  // From here on ^C no longer kills us outright; `run` decides what a signal
  // means for the command at hand.
  let env = SystemEnvironment::new().context("failed to listen for signals")?;
  let mut stdout = std::io::stdout();
  let mut stderr = std::io::stderr();
  revssh::run(prog, original_command, HostConfig::load_default, env, &mut stdout, &mut stderr).await
}

fn run(prog: &str, original_command: &str) -> anyhow::Result<ExitOutcome> {
  let runtime = tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .context("failed to build runtime")?;

  let span = tracing::info_span!(
    "invocation",
    invocation_id = %Uuid::new_v4(),
    peer = ?std::env::var("SSH_CLIENT").ok(),
  );
  runtime.block_on(serve(prog, original_command).instrument(span))
}

fn main() -> ExitCode {
  let args = Args::parse();

  // Whatever goes wrong from here on, the peer only ever sees an exit code.
  std::panic::set_hook(Box::new(|info| {
    tracing::error!(%info, "panic");
  }));

  // Nowhere to report this to.
  if init_tracing(&args).is_err() {
    return ExitOutcome::Suppressed.into();
  }

  let original_command = match std::env::var(ORIGINAL_COMMAND_VAR) {
    Ok(command) => command,
    // Plain `ssh host` without a command.
    Err(VarError::NotPresent) => String::new(),
    Err(VarError::NotUnicode(_)) => {
      tracing::error!("{ORIGINAL_COMMAND_VAR} is not valid unicode");
      return ExitOutcome::Suppressed.into();
    }
  };
  let prog = prog_name();

  let outcome = match std::panic::catch_unwind(|| run(&prog, &original_command)) {
    Ok(Ok(outcome)) => outcome,
    Ok(Err(error)) => {
      tracing::error!(?error, "invocation failed");
      ExitOutcome::Suppressed
    }
    Err(_) => ExitOutcome::Suppressed,
  };
  tracing::info!(?outcome, code = outcome.code(), "exiting");
  outcome.into()
}
