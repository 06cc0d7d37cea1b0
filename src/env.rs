//! Environment constants and path utilities for the nero kernel.
//!
//! This module centralizes file names and the reference defaults used by the
//! configuration types, so the values live in one place.

use std::path::{Path, PathBuf};

/// Application directory name (hidden directory like .git)
pub const NERO_DIR_NAME: &str = ".nero";

/// Configuration file name inside the application directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name at the project root
pub const LOCAL_CONFIG_FILE_NAME: &str = "nero.toml";

/// Reference defaults for the kernel subsystems
pub mod defaults {
    /// Provider made active as soon as it registers
    pub const DEFAULT_PROVIDER: &str = "ollama";

    /// Fallback chain walked after the selected provider fails
    pub const FALLBACK_PROVIDERS: &[&str] = &["openai", "gemini", "groq"];

    pub const MAX_CONCURRENT_CALLS: u32 = 10;

    pub const REQUEST_TIMEOUT_SECS: u64 = 120;

    /// Smallest stream queue capacity ever allocated
    pub const MIN_STREAM_BUFFER: usize = 100;

    /// Delay between words of a simulated stream
    pub const SIMULATED_CHUNK_DELAY_MS: u64 = 50;

    pub const MAX_CONTEXT_ENTRIES_PER_TYPE: usize = 10_000;

    /// Background eviction interval (5 minutes)
    pub const CONTEXT_CLEANUP_INTERVAL_MS: u64 = 300_000;

    /// Entries below this relevance are evicted once they are old enough
    pub const LOW_RELEVANCE_THRESHOLD: f64 = 0.1;

    pub const LOW_RELEVANCE_MAX_AGE_SECS: u64 = 3600;

    pub const EVENT_QUEUE_CAPACITY: usize = 1000;
}

/// Build config directory path in user's home directory
pub fn user_config_dir_path(home_dir: &Path) -> PathBuf {
    home_dir.join(NERO_DIR_NAME)
}

/// Build config file path in user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    user_config_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build the `.nero/config.toml` path under a project directory
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(NERO_DIR_NAME).join(CONFIG_FILE_NAME)
}

/// Build the `nero.toml` path at a project root
pub fn root_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(LOCAL_CONFIG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_paths() {
        let home_dir = Path::new("/home/user");
        let current_dir = Path::new("/current/project");

        assert_eq!(
            user_config_file_path(home_dir),
            Path::new("/home/user/.nero/config.toml")
        );

        assert_eq!(
            local_config_file_path(current_dir),
            Path::new("/current/project/.nero/config.toml")
        );

        assert_eq!(
            root_config_file_path(current_dir),
            Path::new("/current/project/nero.toml")
        );
    }
}
