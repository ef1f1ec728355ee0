use std::path::PathBuf;

const APP_DIR: &str = "chrome-tab-reader";

pub const LOG_FILE_NAME: &str = "native_host.log";

#[derive(Debug, Clone)]
pub struct Paths {
    /// Platform config directory: holds config.json and tokens.json.
    pub config: PathBuf,
    /// Per-user state directory: holds the host log.
    pub state: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        // dirs::config_dir follows XDG on Linux, Application Support on macOS
        // and %APPDATA% on Windows.
        let config = dirs::config_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from(".").join(APP_DIR));
        let state = dirs::home_dir()
            .map(|h| h.join(format!(".{}", APP_DIR)))
            .unwrap_or_else(std::env::temp_dir);
        Self { config, state }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self {
            config: base.join("config"),
            state: base.join("state"),
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.json")
    }

    pub fn tokens_file(&self) -> PathBuf {
        self.config.join("tokens.json")
    }

    pub fn log_file(&self) -> PathBuf {
        self.state.join(LOG_FILE_NAME)
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

    #[test]
    fn test_with_base_layout() {
        let paths = Paths::with_base(PathBuf::from("/tmp/tr"));
        assert_eq!(paths.config_file(), PathBuf::from("/tmp/tr/config/config.json"));
        assert_eq!(paths.tokens_file(), PathBuf::from("/tmp/tr/config/tokens.json"));
        assert_eq!(paths.log_file(), PathBuf::from("/tmp/tr/state/native_host.log"));
    }
}
