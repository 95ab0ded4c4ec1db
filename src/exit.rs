/// How an invocation ends, as seen by the SSH client on the other side.
///
/// The numeric values follow `sysexits.h`, with the "soft" outcomes expressed
/// as `EX_OK` with bits flipped so they stay distinct from real sysexits codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
  Success,
  /// A handler declined, eg incomplete host config or a denied command.
  Failure,
  /// The caller's command line did not match the grammar.
  Usage,
  SoftwareError,
  /// The SSH client could not be executed.
  OsError,
  /// A signal arrived while no session was being kept open.
  Interrupted,
  /// Anything else. Deliberately says nothing about what went wrong.
  Suppressed,
}

const EX_OK: u8 = 0;
const EX_USAGE: u8 = 64;
const EX_SOFTWARE: u8 = 70;
const EX_OSERR: u8 = 71;

impl ExitOutcome {
  pub const fn code(self) -> u8 {
    match self {
      Self::Success => EX_OK,
      Self::Failure => EX_OK ^ 1,
      Self::Usage => EX_USAGE,
      Self::SoftwareError => EX_SOFTWARE,
      Self::OsError => EX_OSERR,
      Self::Interrupted => EX_OK ^ 130,
      Self::Suppressed => EX_OK ^ 222,
    }
  }
}

impl From<ExitOutcome> for std::process::ExitCode {
  fn from(outcome: ExitOutcome) -> Self {
    std::process::ExitCode::from(outcome.code())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn codes_are_distinct() {
    let all = [
      ExitOutcome::Success,
      ExitOutcome::Failure,
      ExitOutcome::Usage,
      ExitOutcome::SoftwareError,
      ExitOutcome::OsError,
      ExitOutcome::Interrupted,
      ExitOutcome::Suppressed,
    ];
    let mut codes: Vec<u8> = all.iter().map(|o| o.code()).collect();
    codes.sort_unstable();
    codes.dedup();
    assert_eq!(codes.len(), all.len());
  }

  #[test]
  fn failure_is_ok_with_low_bit_flipped() {
    assert_eq!(ExitOutcome::Success.code(), 0);
    assert_eq!(ExitOutcome::Failure.code(), 1);
    assert_eq!(ExitOutcome::Usage.code(), 64);
    assert_eq!(ExitOutcome::SoftwareError.code(), 70);
    assert_eq!(ExitOutcome::OsError.code(), 71);
    assert_eq!(ExitOutcome::Interrupted.code(), 130);
    assert_eq!(ExitOutcome::Suppressed.code(), 222);
  }
}
