//! Scratch project-workspace helper for integration tests and benchmarks,
//! gated behind the `project-util` feature.

use std::path::{Path, PathBuf};

use rand::Rng;

use crate::config::CONFIG_FILE_NAME;

/// A temporary, on-disk project with a generated config file, torn down
/// when dropped.
pub struct ScratchProject {
    dir: tempfile::TempDir,
}

impl ScratchProject {
    pub fn new() -> std::io::Result<Self> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "{}")?;
        Ok(Self { dir })
    }

    pub fn with_config(config_json: &str) -> std::io::Result<Self> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), config_json)?;
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn add_source(&self, relative_path: &str, content: &str) -> std::io::Result<PathBuf> {
        let path = self.dir.path().join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// A unique, disposable module name for tests that don't care about
    /// its exact value, only that it doesn't collide across runs.
    pub fn random_module_name() -> String {
        let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
        format!("module_{suffix}")
    }
}
