use anyhow::Context;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Consulted only when the user-specific file does not exist.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/revssh.conf";

/// Relative to the home directory of the user the broker runs as.
pub const USER_CONFIG_PATH: &str = ".config/revssh";

/// Settings describing the rendezvous host itself, as the peers should reach
/// it. Only `getscript` cares about the contents; see `script.rs`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostConfig {
  entries: BTreeMap<String, String>,
}

impl HostConfig {
  pub fn get(&self, key: &str) -> Option<&str> {
    self.entries.get(key).map(String::as_str)
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Parse `key = value` lines. Blank lines, `#` comments, lines without `=`
  /// and lines with an empty key are skipped. Only the first `=` delimits.
  pub fn parse(text: &str) -> Self {
    text
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty() && !line.starts_with('#'))
      .filter_map(|line| line.split_once('='))
      .map(|(key, value)| (key.trim_end(), value.trim_start()))
      .filter(|(key, _)| !key.is_empty())
      .collect()
  }

  /// Read the first candidate that is a regular file. The remaining
  /// candidates are never looked at, even if the chosen file lacks keys.
  ///
  /// No candidate existing is not an error; the result is simply empty.
  pub fn load<I>(candidates: I) -> anyhow::Result<Self>
  where
    I: IntoIterator,
    I::Item: AsRef<Path>,
  {
    let Some(path) = candidates.into_iter().find(|path| path.as_ref().is_file()) else {
      tracing::debug!("no host config found");
      return Ok(Self::default());
    };
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let config = Self::parse(&text);
    tracing::debug!(path = %path.display(), keys = config.entries.len(), "loaded host config");
    Ok(config)
  }

  /// `load` over the standard search order for the current user.
  pub fn load_default() -> anyhow::Result<Self> {
    Self::load(candidates(home_dir().as_deref()))
  }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HostConfig {
  fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
    Self {
      entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
    }
  }
}

/// The config search order: user-specific first (when a home directory is
/// known), then the system-wide file.
pub fn candidates(home: Option<&Path>) -> Vec<PathBuf> {
  home
    .map(|home| home.join(USER_CONFIG_PATH))
    .into_iter()
    .chain(std::iter::once(PathBuf::from(SYSTEM_CONFIG_PATH)))
    .collect()
}

/// `$HOME`, or the passwd entry of the real uid when sshd did not set it.
pub fn home_dir() -> Option<PathBuf> {
  match std::env::var_os("HOME") {
    Some(home) if !home.is_empty() => Some(PathBuf::from(home)),
    _ => nix::unistd::User::from_uid(nix::unistd::getuid())
      .ok()
      .flatten()
      .map(|user| user.dir),
  }
}
