//! `open`: hold the SSH session, and with it the peer's reverse forward.
//!
//! There is nothing to tear down here. The SSH daemon owns the forward and
//! drops it when this process exits, however that happens.

use crate::command::OpenArgs;
use crate::dispatch::Reply;
use crate::error::BrokerError;
use std::future::Future;
use std::io::Write;
use std::time::Duration;

/// Unbounded sessions sleep in chunks of this size.
pub const WAIT_INCREMENT: Duration = Duration::from_secs(120);

/// The effective timeout. Anything below one second means "wait forever".
pub fn effective_timeout(args: &OpenArgs) -> Option<Duration> {
  match args.timeout {
    Some(seconds) if seconds >= 1 => Some(Duration::from_secs(seconds.unsigned_abs())),
    _ => None,
  }
}

fn write_banner<W: Write>(args: &OpenArgs, out: &mut W) -> std::io::Result<()> {
  write!(out, "\n*** revssh tunnel has been opened ***\n\n")?;
  match effective_timeout(args) {
    Some(timeout) => writeln!(out, "timeout = {} seconds", timeout.as_secs())?,
    None => writeln!(out, "timeout = <none>")?,
  }
  // 0 is not a valid port anyway.
  if let Some(port) = args.remote_port.filter(|port| *port != 0) {
    writeln!(out, "port    = {port}")?;
  }
  write!(out, "\nPress ^C or close this window to abort at any time.\n")?;
  // The peer has to see this before we go quiet.
  out.flush()
}

/// Print the banner, then block until the timeout expires or `interrupted`
/// resolves. Both endings are a success.
#[tracing::instrument(level = "debug", skip(out, interrupted))]
pub async fn keep_open<W, I>(args: &OpenArgs, out: &mut W, interrupted: I) -> Result<Reply, BrokerError>
where
  W: Write + Send,
  I: Future<Output = ()> + Send,
{
  write_banner(args, out)?;

  let timeout = effective_timeout(args);
  tracing::info!(?timeout, remote_port = args.remote_port, "tunnel opened");

  let wait = async {
    match timeout {
      Some(timeout) => tokio::time::sleep(timeout).await,
      None => loop {
        tokio::time::sleep(WAIT_INCREMENT).await;
      },
    }
  };

  tokio::select! {
    () = wait => tracing::info!("tunnel timeout expired"),
    () = interrupted => tracing::info!("tunnel closed by operator"),
  }
  Ok(Reply::Success)
}
