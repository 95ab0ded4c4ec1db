//! The command vocabulary the broker understands.
//!
//! Parsing happens in two steps. `CommandName::authorize` looks at the first
//! token only and knows nothing about options. Only once that succeeds does
//! `parse` hand the rest of the tokens to clap.

use crate::error::BrokerError;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};

/// The complete set of commands a peer may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandName {
  Help,
  Open,
  Connect,
  Ssh,
  Getscript,
}

impl CommandName {
  pub const ALL: [CommandName; 5] = [Self::Help, Self::Open, Self::Connect, Self::Ssh, Self::Getscript];

  pub const fn as_str(self) -> &'static str {
    match self {
      Self::Help => "help",
      Self::Open => "open",
      Self::Connect => "connect",
      Self::Ssh => "ssh",
      Self::Getscript => "getscript",
    }
  }

  /// Exact, case-sensitive match against the compiled-in set. No prefixes,
  /// aliases or lookups by name.
  pub fn authorize(token: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|name| name.as_str() == token)
  }
}

impl std::fmt::Display for CommandName {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Commands a peer can run on the rendezvous host.
#[derive(Parser, Debug)]
#[command(
  name = "revssh",
  disable_help_subcommand = true,
  disable_version_flag = true,
  color = clap::ColorChoice::Never
)]
pub struct Grammar {
  #[command(subcommand)]
  pub command: ParsedArguments,
}

/// One parsed request, with the payload of whichever command was asked for.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ParsedArguments {
  /// print help
  Help,
  /// open a new tunnel
  Open(OpenArgs),
  /// connect to a tunnel
  Connect(ConnectArgs),
  /// run ssh
  #[command(disable_help_flag = true)]
  Ssh(SshArgs),
  /// get the client script
  Getscript(GetscriptArgs),
}

impl ParsedArguments {
  pub fn name(&self) -> CommandName {
    match self {
      Self::Help => CommandName::Help,
      Self::Open(_) => CommandName::Open,
      Self::Connect(_) => CommandName::Connect,
      Self::Ssh(_) => CommandName::Ssh,
      Self::Getscript(_) => CommandName::Getscript,
    }
  }
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenArgs {
  /// connection timeout
  // Negative values mean "no timeout"; the generated client script sends -1.
  #[arg(short = 't', long = "timeout", value_name = "seconds", allow_negative_numbers = true)]
  pub timeout: Option<i64>,

  /// tunnel remote port
  #[arg(short = 'p', long = "rport", value_name = "remote port")]
  pub remote_port: Option<u16>,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ConnectArgs {
  /// port to connect to
  #[arg(value_name = "port")]
  pub port: u16,

  /// user name
  #[arg(value_name = "user")]
  pub user: String,
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct SshArgs {
  /// passed to ssh unchanged
  #[arg(value_name = "arg", trailing_var_arg = true, allow_hyphen_values = true)]
  pub args: Vec<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScriptVariant {
  #[default]
  Sh,
  Perl,
  Python,
}

impl std::fmt::Display for ScriptVariant {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Sh => f.write_str("sh"),
      Self::Perl => f.write_str("perl"),
      Self::Python => f.write_str("python"),
    }
  }
}

/// Always part of the generated script; `-o` adds to these.
pub const DEFAULT_SCRIPT_SSH_OPTIONS: [&str; 3] = [
  "ExitOnForwardFailure=yes",
  "UserKnownHostsFile=/dev/null",
  "StrictHostKeyChecking=no",
];

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct GetscriptArgs {
  /// script variant
  #[arg(short = 'L', long = "variant", value_name = "variant", value_enum, default_value_t)]
  pub variant: ScriptVariant,

  /// tunnel remote port
  #[arg(short = 'r', long = "rport", value_name = "remote port", default_value_t = 57001)]
  pub remote_port: u16,

  /// local port
  #[arg(short = 'p', long = "port", value_name = "local port", default_value_t = 22)]
  pub local_port: u16,

  /// ssh options (e.g. ExitOnForwardFailure), in addition to ExitOnForwardFailure=yes,
  /// UserKnownHostsFile=/dev/null and StrictHostKeyChecking=no
  #[arg(short = 'o', long = "ssh-opt", value_name = "option")]
  pub ssh_options: Vec<String>,

  /// ssh program name or path
  #[arg(long = "ssh-prog", value_name = "prog", default_value = "ssh")]
  pub ssh_program: String,
}

impl Default for GetscriptArgs {
  fn default() -> Self {
    Self {
      variant: ScriptVariant::Sh,
      remote_port: 57001,
      local_port: 22,
      ssh_options: Vec::new(),
      ssh_program: "ssh".to_owned(),
    }
  }
}

impl GetscriptArgs {
  /// The defaults followed by whatever `-o` added.
  pub fn effective_ssh_options(&self) -> Vec<&str> {
    DEFAULT_SCRIPT_SSH_OPTIONS
      .into_iter()
      .chain(self.ssh_options.iter().map(String::as_str))
      .collect()
  }
}

/// Authorize `argv[0]`, then parse the whole vector.
///
/// `prog` is only used for usage messages.
pub fn parse(prog: &str, argv: &[String]) -> Result<ParsedArguments, BrokerError> {
  let first = match argv.first() {
    Some(first) if !first.is_empty() => first,
    _ => return Err(BrokerError::NoCommand),
  };
  let name = CommandName::authorize(first).ok_or(BrokerError::Denied)?;

  // Security critical: `ssh` takes everything after it verbatim, including
  // things that look like flags. Keep clap away from it entirely.
  if name == CommandName::Ssh {
    return Ok(ParsedArguments::Ssh(SshArgs {
      args: argv[1..].to_vec(),
    }));
  }

  let grammar = Grammar::try_parse_from(std::iter::once(prog).chain(argv.iter().map(String::as_str)))?;
  debug_assert_eq!(grammar.command.name(), name);
  Ok(grammar.command)
}

/// Full usage of every command, as printed by `help`.
pub fn usage(prog: &str) -> String {
  Grammar::command().bin_name(prog).render_help().to_string()
}
