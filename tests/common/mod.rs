//! Common test utilities

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;
use xec::config::ConfigManager;

/// Create a temporary project directory with an xec.yaml file
pub fn create_test_config(content: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("xec.yaml");
    fs::write(&config_path, content).unwrap();
    (temp_dir, config_path)
}

/// A loaded manager bound to the directory, isolated from the real
/// environment and the user's global config
pub fn load_manager(dir: &TempDir) -> ConfigManager {
    load_manager_with_env(dir, HashMap::new())
}

pub fn load_manager_with_env(dir: &TempDir, env: HashMap<String, String>) -> ConfigManager {
    let mut manager = ConfigManager::new()
        .with_project_dir(dir.path().to_path_buf())
        .without_global()
        .with_env(env);
    manager.load().unwrap();
    manager
}
