use nix::errno::Errno;

/// Everything that can stop an invocation before or inside a handler.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
  /// The first token is not one of the known commands. The token itself is
  /// intentionally not part of the error.
  #[error("command not allowed")]
  Denied,

  #[error("no command specified")]
  NoCommand,

  #[error(transparent)]
  Usage(#[from] clap::Error),

  #[error("host config is incomplete: missing `{key}`")]
  ConfigIncomplete { key: &'static str },

  #[error("script variant `{variant}` is not implemented")]
  NotImplemented { variant: String },

  #[error("failed to execute {program}")]
  ProcessReplacement {
    program: String,
    #[source]
    source: Errno,
  },

  #[error(transparent)]
  Io(#[from] std::io::Error),
}
