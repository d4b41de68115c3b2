//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - An isolated global config file (`home/.celfs/config.toml`)
//! - An isolated project config file (`project/.celfs/config.toml`)
//! - Unique namespace names so concurrently running tests never share files
//!
//! # Usage
//!
//! ```ignore
//! use celfs_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     env.write_project_config("[file]\ncache_enabled = true\n").unwrap();
//!     let config = env.load_config().unwrap();
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::Config;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Stand-in for the user's home directory
    pub home: PathBuf,
    /// Project root for the test
    pub project_root: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let home = root.join("home");
        let project_root = root.join("project");
        std::fs::create_dir_all(home.join(".celfs"))?;
        std::fs::create_dir_all(project_root.join(".celfs"))?;

        Ok(Self {
            _temp_dir: temp_dir,
            home,
            project_root,
            test_id,
        })
    }

    pub fn global_config_path(&self) -> PathBuf {
        self.home.join(".celfs").join("config.toml")
    }

    pub fn project_config_path(&self) -> PathBuf {
        self.project_root.join(".celfs").join("config.toml")
    }

    pub fn write_global_config(&self, contents: &str) -> anyhow::Result<PathBuf> {
        let path = self.global_config_path();
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn write_project_config(&self, contents: &str) -> anyhow::Result<PathBuf> {
        let path = self.project_config_path();
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    /// Load config from this environment's global and project files.
    pub fn load_config(&self) -> anyhow::Result<Config> {
        let global = self.global_config_path();
        let project = self.project_config_path();
        Ok(Config::load_from(Some(&global), Some(&project))?)
    }

    /// A namespace name unique to this environment.
    pub fn namespace(&self) -> String {
        format!("celfs-test-{}-{}", std::process::id(), self.test_id)
    }
}
