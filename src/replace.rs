//! Turning this process into an SSH client.

use crate::command::{ConnectArgs, SshArgs};
use nix::errno::Errno;
use std::convert::Infallible;
use std::ffi::CString;

/// The SSH client the broker becomes. Never looked up in `$PATH`.
pub const SSH_PROG: &str = "/usr/bin/ssh";

/// Prefix of every SSH invocation. The broker has no business keeping a
/// known_hosts file for tunnel endpoints, which are all `localhost`.
pub const SSH_BASE_ARGV: [&str; 5] = [
  SSH_PROG,
  "-o",
  "UserKnownHostsFile=/dev/null",
  "-o",
  "StrictHostKeyChecking=no",
];

fn base_argv() -> Vec<String> {
  SSH_BASE_ARGV.iter().map(|s| s.to_string()).collect()
}

/// `ssh`: the caller's arguments, unchanged, after the fixed prefix.
pub fn ssh_argv(args: &SshArgs) -> Vec<String> {
  let mut argv = base_argv();
  argv.extend(args.args.iter().cloned());
  argv
}

/// `connect`: log in to the forwarded port on this host.
pub fn connect_argv(args: &ConnectArgs) -> Vec<String> {
  let mut argv = base_argv();
  argv.extend([
    "localhost".to_owned(),
    "-p".to_owned(),
    args.port.to_string(),
    "-l".to_owned(),
    args.user.clone(),
  ]);
  argv
}

/// Replace the current process image with `argv[0]`, passing `argv` as is.
///
/// Only ever returns on failure. An argument containing a NUL byte cannot be
/// passed to `execv` and is reported as `EINVAL`.
pub fn execv(argv: &[String]) -> Result<Infallible, Errno> {
  let argv = argv
    .iter()
    .map(|arg| CString::new(arg.as_bytes()).map_err(|_| Errno::EINVAL))
    .collect::<Result<Vec<_>, _>>()?;
  let program = argv.first().ok_or(Errno::EINVAL)?;
  nix::unistd::execv(program, &argv)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn connect_argv_is_exact() {
    let argv = connect_argv(&ConnectArgs {
      port: 2222,
      user: "alice".to_owned(),
    });
    assert_eq!(
      argv,
      vec![
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
      ]
    );
  }

  #[test]
  fn ssh_argv_passes_arguments_through() {
    let args = SshArgs {
      args: vec!["-N".into(), "-L".into(), "8080:localhost:80".into(), "a b".into()],
    };
    let argv = ssh_argv(&args);
    assert_eq!(&argv[..SSH_BASE_ARGV.len()], &SSH_BASE_ARGV);
    assert_eq!(&argv[SSH_BASE_ARGV.len()..], &args.args[..]);
  }

  #[test]
  fn ssh_argv_without_arguments_is_the_base() {
    assert_eq!(ssh_argv(&SshArgs::default()), SSH_BASE_ARGV.to_vec());
  }

  #[test]
  fn execv_rejects_nul_bytes() {
    let argv = vec![SSH_PROG.to_owned(), "bad\0arg".to_owned()];
    assert_eq!(execv(&argv).unwrap_err(), Errno::EINVAL);
  }

  #[test]
  fn execv_rejects_empty_argv() {
    assert_eq!(execv(&[]).unwrap_err(), Errno::EINVAL);
  }

  #[test]
  fn execv_missing_program_fails() {
    let argv = vec!["/nonexistent/revssh-test/ssh".to_owned()];
    assert_eq!(execv(&argv).unwrap_err(), Errno::ENOENT);
  }
}
