use crate::command::{self, ParsedArguments};
use crate::config::HostConfig;
use crate::error::BrokerError;
use crate::exit::ExitOutcome;
use crate::signals::Interrupts;
use crate::{keeper, replace, script};
use async_trait::async_trait;
use nix::errno::Errno;
use std::convert::Infallible;
use std::io::Write;

/// What a handler hands back when it finishes without an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
  Success,
  Failure,
  /// Printed to stdout, then treated as `Success`.
  Output(String),
}

/// The side effects handlers need from the outside world. Swapped out in
/// tests so nothing actually execs or waits for signals.
#[async_trait]
pub trait Environment: Send {
  /// Replace this process with `argv`. Only returns on failure.
  fn replace_process(&mut self, argv: &[String]) -> Result<Infallible, Errno>;

  /// Resolves once the operator asks to end the session.
  async fn interrupted(&mut self);

  /// A signal that arrived and was not consumed by `interrupted`.
  async fn pending_interrupt(&mut self) -> Option<&'static str>;
}

#[async_trait]
impl<T: Environment + ?Sized> Environment for &mut T {
  fn replace_process(&mut self, argv: &[String]) -> Result<Infallible, Errno> {
    (**self).replace_process(argv)
  }

  async fn interrupted(&mut self) {
    (**self).interrupted().await
  }

  async fn pending_interrupt(&mut self) -> Option<&'static str> {
    (**self).pending_interrupt().await
  }
}

/// The real thing: `execv(2)` and Unix signals.
pub struct SystemEnvironment {
  interrupts: Interrupts,
}

impl SystemEnvironment {
  /// Must be called from within a tokio runtime.
  pub fn new() -> std::io::Result<Self> {
    Ok(Self {
      interrupts: Interrupts::new()?,
    })
  }
}

#[async_trait]
impl Environment for SystemEnvironment {
  fn replace_process(&mut self, argv: &[String]) -> Result<Infallible, Errno> {
    replace::execv(argv)
  }

  async fn interrupted(&mut self) {
    let signal = self.interrupts.recv().await;
    tracing::info!(signal, "interrupted");
  }

  async fn pending_interrupt(&mut self) -> Option<&'static str> {
    self.interrupts.pending().await
  }
}

pub struct Dispatcher<E> {
  prog: String,
  env: E,
}

impl<E: Environment> Dispatcher<E> {
  /// `prog` is the name used in usage output.
  pub fn new(prog: impl Into<String>, env: E) -> Self {
    Self { prog: prog.into(), env }
  }

  /// Run the handler for `args` and turn its result into an exit outcome.
  /// Handler errors are reported on `err` here; nothing is retried.
  pub async fn dispatch<O, R>(&mut self, host: &HostConfig, args: ParsedArguments, out: &mut O, err: &mut R) -> ExitOutcome
  where
    O: Write + Send,
    R: Write + Send,
  {
    let command = args.name();
    let result = self.run_handler(host, args, out).await;
    tracing::debug!(%command, ?result, "handler finished");

    match result {
      Ok(Reply::Success) => ExitOutcome::Success,
      Ok(Reply::Failure) => ExitOutcome::Failure,
      Ok(Reply::Output(text)) => match write_output(out, &text) {
        Ok(()) => ExitOutcome::Success,
        Err(error) => {
          tracing::error!(?error, "writing output failed");
          ExitOutcome::SoftwareError
        }
      },
      Err(BrokerError::ConfigIncomplete { key }) => {
        tracing::warn!(key, "host config is incomplete");
        if let Err(error) = writeln!(err, "Cannot create script - host config is incomplete.") {
          tracing::debug!(?error, "writing to stderr failed");
        }
        ExitOutcome::Failure
      }
      Err(BrokerError::NotImplemented { variant }) => {
        if let Err(error) = writeln!(err, "Script variant {variant} is not implemented.") {
          tracing::debug!(?error, "writing to stderr failed");
        }
        ExitOutcome::Failure
      }
      Err(BrokerError::ProcessReplacement { program, source }) => {
        tracing::error!(%program, ?source, "process replacement failed");
        ExitOutcome::OsError
      }
      Err(error) => {
        tracing::error!(?error, "handler failed");
        ExitOutcome::SoftwareError
      }
    }
  }

  async fn run_handler<O: Write + Send>(
    &mut self,
    host: &HostConfig,
    args: ParsedArguments,
    out: &mut O,
  ) -> Result<Reply, BrokerError> {
    match args {
      ParsedArguments::Help => Ok(Reply::Output(command::usage(&self.prog))),
      ParsedArguments::Open(args) => keeper::keep_open(&args, out, self.env.interrupted()).await,
      ParsedArguments::Connect(args) => self.replace(replace::connect_argv(&args), out),
      ParsedArguments::Ssh(args) => self.replace(replace::ssh_argv(&args), out),
      ParsedArguments::Getscript(args) => script::render(host, &args).map(Reply::Output),
    }
  }

  #[tracing::instrument(level = "debug", skip(self, out))]
  fn replace<O: Write>(&mut self, argv: Vec<String>, out: &mut O) -> Result<Reply, BrokerError> {
    // Anything still buffered would be lost with the old process image.
    out.flush()?;
    tracing::info!(?argv, "replacing process");
    match self.env.replace_process(&argv) {
      Ok(never) => match never {},
      Err(source) => Err(BrokerError::ProcessReplacement {
        program: argv.first().cloned().unwrap_or_default(),
        source,
      }),
    }
  }
}

fn write_output<O: Write>(out: &mut O, text: &str) -> std::io::Result<()> {
  out.write_all(text.as_bytes())?;
  if !text.is_empty() && !text.ends_with('\n') {
    out.write_all(b"\n")?;
  }
  out.flush()
}

#[cfg(test)]
pub(crate) mod testing {
  use super::*;
  use std::time::Duration;

  /// Records what would have been exec'd and fails the exec with `errno`.
  pub(crate) struct FakeEnvironment {
    pub replaced: Vec<Vec<String>>,
    pub errno: Errno,
    /// `None` never interrupts.
    pub interrupt_after: Option<Duration>,
    /// Reported once by `pending_interrupt`.
    pub pending: Option<&'static str>,
  }

  impl Default for FakeEnvironment {
    fn default() -> Self {
      Self {
        replaced: Vec::new(),
        errno: Errno::ENOENT,
        interrupt_after: None,
        pending: None,
      }
    }
  }

  #[async_trait]
  impl Environment for FakeEnvironment {
    fn replace_process(&mut self, argv: &[String]) -> Result<Infallible, Errno> {
      self.replaced.push(argv.to_vec());
      Err(self.errno)
    }

    async fn interrupted(&mut self) {
      match self.interrupt_after {
        Some(after) => tokio::time::sleep(after).await,
        None => std::future::pending().await,
      }
    }

    async fn pending_interrupt(&mut self) -> Option<&'static str> {
      self.pending.take()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::testing::FakeEnvironment;
  use super::*;
  use crate::command::{ConnectArgs, GetscriptArgs, OpenArgs, SshArgs};
  use std::time::Duration;

  async fn dispatch(
    env: FakeEnvironment,
    host: &HostConfig,
    args: ParsedArguments,
  ) -> (ExitOutcome, String, String, FakeEnvironment) {
    let mut dispatcher = Dispatcher::new("revssh", env);
    let (mut out, mut err) = (Vec::new(), Vec::new());
    let outcome = dispatcher.dispatch(host, args, &mut out, &mut err).await;
    (
      outcome,
      String::from_utf8(out).unwrap(),
      String::from_utf8(err).unwrap(),
      dispatcher.env,
    )
  }

  fn complete_config() -> HostConfig {
    HostConfig::from_iter([
      ("sshd_host", "m.example.org"),
      ("sshd_user", "revssh"),
      ("sshd_port", "2022"),
    ])
  }

  #[tokio::test]
  async fn help_prints_usage() {
    let (outcome, out, err, _) = dispatch(FakeEnvironment::default(), &HostConfig::default(), ParsedArguments::Help).await;
    assert_eq!(outcome, ExitOutcome::Success);
    assert!(out.contains("Usage:"));
    assert!(out.contains("getscript"));
    assert!(err.is_empty());
  }

  #[tokio::test]
  async fn connect_execs_exact_argv() {
    let args = ParsedArguments::Connect(ConnectArgs {
      port: 2222,
      user: "alice".to_owned(),
    });
    let (outcome, out, _, env) = dispatch(FakeEnvironment::default(), &HostConfig::default(), args).await;
    assert_eq!(outcome, ExitOutcome::OsError);
    assert!(out.is_empty());
    assert_eq!(
      env.replaced,
      vec![vec![
        "/usr/bin/ssh",
        "-o",
        "UserKnownHostsFile=/dev/null",
        "-o",
        "StrictHostKeyChecking=no",
        "localhost",
        "-p",
        "2222",
        "-l",
        "alice",
      ]]
    );
  }

  #[tokio::test]
  async fn ssh_execs_passthrough_once() {
    let args = ParsedArguments::Ssh(SshArgs {
      args: vec!["-W".to_owned(), "localhost:22".to_owned()],
    });
    let env = FakeEnvironment {
      errno: Errno::EACCES,
      ..FakeEnvironment::default()
    };
    let (outcome, _, err, env) = dispatch(env, &HostConfig::default(), args).await;
    assert_eq!(outcome, ExitOutcome::OsError);
    // Nothing about the failure reaches the peer.
    assert!(err.is_empty());
    assert_eq!(env.replaced.len(), 1);
    assert_eq!(env.replaced[0][5..], ["-W", "localhost:22"]);
  }

  #[tokio::test(start_paused = true)]
  async fn open_ends_with_success_when_interrupted() {
    let env = FakeEnvironment {
      interrupt_after: Some(Duration::from_secs(30)),
      ..FakeEnvironment::default()
    };
    let (outcome, out, _, _) = dispatch(env, &HostConfig::default(), ParsedArguments::Open(OpenArgs::default())).await;
    assert_eq!(outcome, ExitOutcome::Success);
    assert!(out.contains("timeout = <none>"));
  }

  #[tokio::test(start_paused = true)]
  async fn open_ends_with_success_when_timeout_expires() {
    let args = ParsedArguments::Open(OpenArgs {
      timeout: Some(5),
      remote_port: None,
    });
    let (outcome, out, _, _) = dispatch(FakeEnvironment::default(), &HostConfig::default(), args).await;
    assert_eq!(outcome, ExitOutcome::Success);
    assert!(out.contains("timeout = 5 seconds"));
  }

  #[tokio::test]
  async fn getscript_prints_script() {
    let args = ParsedArguments::Getscript(GetscriptArgs {
      remote_port: 9000,
      local_port: 2200,
      ..GetscriptArgs::default()
    });
    let (outcome, out, err, env) = dispatch(FakeEnvironment::default(), &complete_config(), args).await;
    assert_eq!(outcome, ExitOutcome::Success);
    assert!(out.starts_with("#!/bin/sh\n"));
    assert!(out.contains(r#"DEFAULT_REMOTE_PORT="9000""#));
    assert!(err.is_empty());
    assert!(env.replaced.is_empty());
  }

  #[tokio::test]
  async fn getscript_with_incomplete_config_prints_nothing() {
    let config = HostConfig::from_iter([("sshd_host", "m.example.org")]);
    let args = ParsedArguments::Getscript(GetscriptArgs::default());
    let (outcome, out, err, _) = dispatch(FakeEnvironment::default(), &config, args).await;
    assert_eq!(outcome, ExitOutcome::Failure);
    assert!(out.is_empty());
    assert_eq!(err, "Cannot create script - host config is incomplete.\n");
  }

  struct ClosedPipe;

  impl Write for ClosedPipe {
    fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
      Err(std::io::ErrorKind::BrokenPipe.into())
    }

    fn flush(&mut self) -> std::io::Result<()> {
      Ok(())
    }
  }

  #[tokio::test]
  async fn unwritable_stderr_still_fails_the_command() {
    let mut dispatcher = Dispatcher::new("revssh", FakeEnvironment::default());
    let mut out = Vec::new();
    let config = HostConfig::from_iter([("sshd_host", "m.example.org")]);
    let args = ParsedArguments::Getscript(GetscriptArgs::default());
    let outcome = dispatcher.dispatch(&config, args, &mut out, &mut ClosedPipe).await;
    assert_eq!(outcome, ExitOutcome::Failure);
    assert!(out.is_empty());
  }

  #[tokio::test]
  async fn getscript_unimplemented_variant_fails() {
    let args = ParsedArguments::Getscript(GetscriptArgs {
      variant: crate::command::ScriptVariant::Perl,
      ..GetscriptArgs::default()
    });
    let (outcome, out, err, _) = dispatch(FakeEnvironment::default(), &complete_config(), args).await;
    assert_eq!(outcome, ExitOutcome::Failure);
    assert!(out.is_empty());
    assert!(err.contains("not implemented"));
  }
}
