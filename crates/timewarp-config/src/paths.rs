//! Where configuration layers live on disk.

use crate::ConfigError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Project-level configuration file.
pub const PROJECT_FILE: &str = "timewarp.toml";

/// Uncommitted per-checkout overrides of [`PROJECT_FILE`].
pub const LOCAL_FILE: &str = "timewarp.local.toml";

/// Locations of the file layers read by [`crate::ConfigLoader`].
pub struct Paths {
    dirs: Option<ProjectDirs>,
}

impl Paths {
    pub fn new() -> Self {
        Self {
            dirs: ProjectDirs::from("org", "Timewarp", "timewarp"),
        }
    }

    /// `config.toml` in the platform's per-user config directory.
    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        let dirs = self
            .dirs
            .as_ref()
            .ok_or_else(|| ConfigError::XdgError("no home directory for user config".to_string()))?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    pub fn project_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join(PROJECT_FILE)
    }

    pub fn local_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join(LOCAL_FILE)
    }

    /// File layers in merge order, lowest precedence first. Only files
    /// that exist are returned.
    pub fn layers(&self, project_dir: impl AsRef<Path>, user: bool) -> Vec<PathBuf> {
        let project_dir = project_dir.as_ref();
        let user_file = if user {
            self.user_config_file().ok()
        } else {
            None
        };
        user_file
            .into_iter()
            .chain([
                Self::project_config_file(project_dir),
                Self::local_config_file(project_dir),
            ])
            .filter(|path| path.exists())
            .collect()
    }

    /// Anchors a relative `path` (e.g. the journal) at `base`.
    pub fn resolve(base: impl AsRef<Path>, path: &Path) -> PathBuf {
        if path.is_relative() {
            base.as_ref().join(path)
        } else {
            path.to_path_buf()
        }
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn user_file_is_named_after_the_app() {
        if let Ok(file) = Paths::new().user_config_file() {
            assert!(file.to_string_lossy().contains("timewarp"));
            assert!(file.ends_with("config.toml"));
        }
    }

    #[test]
    fn layers_skip_missing_files_and_keep_order() {
        let temp_dir = tempdir().expect("tempdir");
        let dir = temp_dir.path();
        let paths = Paths::new();
        assert!(paths.layers(dir, false).is_empty());

        std::fs::write(dir.join(LOCAL_FILE), "[kernel]\nlps = 3\n").expect("write local");
        assert_eq!(paths.layers(dir, false), vec![dir.join(LOCAL_FILE)]);

        std::fs::write(dir.join(PROJECT_FILE), "[kernel]\nlps = 2\n").expect("write project");
        assert_eq!(
            paths.layers(dir, false),
            vec![dir.join(PROJECT_FILE), dir.join(LOCAL_FILE)]
        );
    }

    #[test]
    fn resolve_keeps_absolute_paths() {
        let base = Path::new("/srv/run");
        assert_eq!(
            Paths::resolve(base, Path::new("sync.jsonl")),
            base.join("sync.jsonl")
        );
        assert_eq!(
            Paths::resolve(base, Path::new("/tmp/sync.jsonl")),
            PathBuf::from("/tmp/sync.jsonl")
        );
    }
}
