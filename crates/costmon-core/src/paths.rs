//! Well-known filesystem locations.
//!
//! Everything costmon persists lives under one state directory,
//! `~/.llm-cost-monitor/` by default:
//!
//! ```text
//! ~/.llm-cost-monitor/
//!   config.yaml
//!   usage.db
//!   logs/costmon.log.YYYY-MM-DD
//! ```

use std::path::{Path, PathBuf};

use crate::error::{MonitorError, Result};

/// Name of the state directory under `$HOME`.
pub const STATE_DIR_NAME: &str = ".llm-cost-monitor";

/// File name of the usage database inside the state directory.
pub const DATABASE_FILE: &str = "usage.db";

/// File name of the user config inside the state directory.
pub const CONFIG_FILE: &str = "config.yaml";

/// Home directory, honouring `$HOME` first so tests can redirect it.
pub fn home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .ok_or(MonitorError::HomeNotFound)
}

/// `~/.llm-cost-monitor`
pub fn default_state_dir() -> Result<PathBuf> {
    Ok(home_dir()?.join(STATE_DIR_NAME))
}

/// `~/.llm-cost-monitor/config.yaml`
pub fn default_config_file() -> Result<PathBuf> {
    Ok(default_state_dir()?.join(CONFIG_FILE))
}

/// Expand a leading `~` or `~/` to the home directory.
///
/// Paths without a tilde are returned unchanged.
pub fn expand_tilde(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    match path.strip_prefix("~") {
        Ok(rest) => Ok(home_dir()?.join(rest)),
        Err(_) => Ok(path.to_path_buf()),
    }
}

/// Create `dir` (and parents) if it does not exist yet.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| MonitorError::DirectoryCreation {
        path: dir.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_default_state_dir() {
        // SAFETY: serialized with every other test touching HOME
        unsafe { std::env::set_var("HOME", "/tmp/test-home") };
        let dir = default_state_dir().unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/test-home/.llm-cost-monitor"));
        assert_eq!(
            default_config_file().unwrap(),
            PathBuf::from("/tmp/test-home/.llm-cost-monitor/config.yaml")
        );
    }

    #[test]
    #[serial]
    fn test_expand_tilde() {
        // SAFETY: serialized with every other test touching HOME
        unsafe { std::env::set_var("HOME", "/tmp/test-home") };
        assert_eq!(
            expand_tilde("~/.claude/projects").unwrap(),
            PathBuf::from("/tmp/test-home/.claude/projects")
        );
        assert_eq!(expand_tilde("~").unwrap(), PathBuf::from("/tmp/test-home"));
        assert_eq!(expand_tilde("/var/log").unwrap(), PathBuf::from("/var/log"));
        assert_eq!(expand_tilde("~user/x").unwrap(), PathBuf::from("~user/x"));
    }

    #[test]
    fn test_ensure_dir_creates_nested() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
        // Idempotent
        ensure_dir(&nested).unwrap();
    }
}
