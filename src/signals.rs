use futures::FutureExt;
use tokio::signal::unix::{signal, Signal, SignalKind};

/// The signals that mean "the operator is done": ^C, a closed terminal
/// window (the SSH session hangs up), or a plain `kill`.
///
/// Once created, these signals no longer terminate the process, so whoever
/// holds an `Interrupts` must actually be polling it to notice them.
pub struct Interrupts {
  interrupt: Signal,
  hangup: Signal,
  terminate: Signal,
}

impl Interrupts {
  /// Must be called from within a tokio runtime.
  pub fn new() -> std::io::Result<Self> {
    Ok(Self {
      interrupt: signal(SignalKind::interrupt())?,
      hangup: signal(SignalKind::hangup())?,
      terminate: signal(SignalKind::terminate())?,
    })
  }

  /// Wait for the next signal and return its name.
  pub async fn recv(&mut self) -> &'static str {
    tokio::select! {
      _ = self.interrupt.recv() => "SIGINT",
      _ = self.hangup.recv() => "SIGHUP",
      _ = self.terminate.recv() => "SIGTERM",
    }
  }

  /// A signal that was delivered but not yet received, if any. Never waits.
  pub async fn pending(&mut self) -> Option<&'static str> {
    // The OS handler only wakes the runtime's signal driver; give it a turn
    // to hand the signal on to us.
    tokio::task::yield_now().await;
    self.recv().now_or_never()
  }
}
