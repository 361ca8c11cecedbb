use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:3000";
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Runtime settings, read from `CM_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub api_url: String,
    pub data_dir: PathBuf,
    pub refresh_interval: Option<Duration>,
    pub mock_api: bool,
    /// Tab to open on start. When unset the last persisted tab is used.
    pub start_tab: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_owned(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            refresh_interval: None,
            mock_api: false,
            start_tab: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        Self {
            api_url: non_empty("CM_API_URL").unwrap_or(defaults.api_url),
            data_dir: non_empty("CM_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            refresh_interval: non_empty("CM_REFRESH_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            mock_api: non_empty("CM_MOCK_API")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.mock_api),
            start_tab: non_empty("CM_START_TAB").or(defaults.start_tab),
        }
    }
}
