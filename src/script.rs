//! `getscript`: the script NEEDHELP runs to open its side of the tunnel.
//!
//! The script logs in to this host with a reverse forward and then runs our
//! own `open` command, so the session it creates is held by `keeper.rs`.

use crate::command::{GetscriptArgs, ScriptVariant};
use crate::config::HostConfig;
use crate::error::BrokerError;

pub const DEFAULT_SSHD_PORT: &str = "22";

/// The remote server values the script embeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSshd<'a> {
  pub host: &'a str,
  pub port: &'a str,
  pub user: &'a str,
}

impl<'a> RemoteSshd<'a> {
  pub fn from_config(config: &'a HostConfig) -> Result<Self, BrokerError> {
    let require = move |key: &'static str| config.get(key).ok_or(BrokerError::ConfigIncomplete { key });
    Ok(Self {
      host: require("sshd_host")?,
      user: require("sshd_user")?,
      port: config.get("sshd_port").filter(|port| !port.is_empty()).unwrap_or(DEFAULT_SSHD_PORT),
    })
  }
}

/// Escape for use between double quotes in a POSIX shell.
fn dquote_escape(value: &str) -> String {
  let mut escaped = String::with_capacity(value.len());
  for c in value.chars() {
    if matches!(c, '\\' | '"' | '$' | '`') {
      escaped.push('\\');
    }
    escaped.push(c);
  }
  escaped
}

/// Render the whole script, or nothing at all.
#[tracing::instrument(level = "debug", skip(config))]
pub fn render(config: &HostConfig, args: &GetscriptArgs) -> Result<String, BrokerError> {
  let sshd = RemoteSshd::from_config(config)?;
  match args.variant {
    ScriptVariant::Sh => Ok(render_sh(&sshd, args)),
    variant @ (ScriptVariant::Perl | ScriptVariant::Python) => Err(BrokerError::NotImplemented {
      variant: variant.to_string(),
    }),
  }
}

fn render_sh(sshd: &RemoteSshd<'_>, args: &GetscriptArgs) -> String {
  let ssh_options = args
    .effective_ssh_options()
    .into_iter()
    .map(|option| format!("-o {option}"))
    .collect::<Vec<_>>()
    .join(" ");

  format!(
    r##"#!/bin/sh
#  This script should be run on the client side.
#  (machine that wants to get a port tunnelled)
#
#  Usage: open-revssh-tunnel [<remote port>[ <local port>[ <timeout>]]]
#
# This script has been automatically generated.
#
set -f

# local config
DEFAULT_LOCAL_PORT="{local_port}"
DEFAULT_REMOTE_PORT="{remote_port}"
X_SSH="{ssh_program}"
SSH_OPTS="{ssh_options}"

# remote server config
REVSSH_REMOTE_SSHD_HOST="{sshd_host}"
REVSSH_REMOTE_SSHD_PORT="{sshd_port}"
REVSSH_REMOTE_SSHD_USER="{sshd_user}"

# cmdline args
remote_port="${{1:-${{DEFAULT_REMOTE_PORT}}}}"
local_port="${{2:-${{DEFAULT_LOCAL_PORT}}}}"
timeout="${{3:--1}}"


# posix sh does not set UID/HOME
id_uid="$(id -u)"; : ${{id_uid:?}}
home="$(getent passwd "${{id_uid}}" | cut -d \: -f 6)"
: ${{home:?}}

keyfile="${{home}}/.ssh/revssh_key"
if ! [ -f "${{keyfile}}" ]; then
   printf '%s\n' 'No keyfile found!'
fi

set -- \
   "${{X_SSH}}" ${{SSH_OPTS}} \
   -R "${{remote_port}}:localhost:${{local_port}}" \
   -i "${{keyfile}}" \
   "${{REVSSH_REMOTE_SSHD_HOST}}"

[ -z "${{REVSSH_REMOTE_SSHD_USER}}" ] || set -- "${{@}}" -l "${{REVSSH_REMOTE_SSHD_USER}}"
[ -z "${{REVSSH_REMOTE_SSHD_PORT}}" ] || set -- "${{@}}" -p "${{REVSSH_REMOTE_SSHD_PORT}}"

set -- "${{@}}" \
   open --timeout "${{timeout}}" --rport "${{remote_port}}"

exec "${{@}}"
"##,
    local_port = args.local_port,
    remote_port = args.remote_port,
    ssh_program = dquote_escape(&args.ssh_program),
    ssh_options = dquote_escape(&ssh_options),
    sshd_host = dquote_escape(sshd.host),
    sshd_port = dquote_escape(sshd.port),
    sshd_user = dquote_escape(sshd.user),
  )
}
