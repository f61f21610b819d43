use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use snafu::{ResultExt, Snafu};
use std::{
    collections::BTreeSet,
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("json error in file: {source}"))]
    Json { source: serde_json::Error },

    #[snafu(display("io error with file: {source}"))]
    Io { source: std::io::Error },

    #[snafu(display("try to save without path"))]
    PathNotSet,

    #[snafu(display("cannot parse proxy from: {source}"))]
    ProxyParse { source: reqwest::Error },

    #[snafu(display("invalid config: {message}"))]
    Invalid { message: String },
}
type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    #[serde(skip)]
    config_path: Option<PathBuf>,

    pub root_storage_dir: String,
    pub database_path: String,
    pub cache_dir: String,
    pub proxy_all: String,
    pub log_level: String,
    pub pixiv: PixivConfig,
    pub watcher: WatcherConfig,
    pub filter: FilterConfig,
    pub gateway: GatewayConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: None,
            root_storage_dir: dirs::home_dir()
                .unwrap_or_default()
                .join(".courier")
                .to_string_lossy()
                .to_string(),
            database_path: "courier.db".to_string(),
            cache_dir: "cache".to_string(),
            proxy_all: "".to_string(),
            log_level: "info".to_string(),
            pixiv: PixivConfig::default(),
            watcher: WatcherConfig::default(),
            filter: FilterConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Restrict {
    #[default]
    Public,
    Private,
}

impl Restrict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Restrict::Public => "public",
            Restrict::Private => "private",
        }
    }
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct PixivConfig {
    pub account_name: String,
    /// Login secret. Replaced by the rotated token kept in the credential cache once a
    /// login has succeeded.
    pub refresh_token: String,
    pub language: String,
    pub proxy_api: String,
    pub proxy_download: String,
    /// Empty means the logged-in account.
    pub watch_user_id: String,
    pub restrict: Restrict,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub token_expired_test_interval: Duration,
    pub login_retry: LoginRetryConfig,
}

impl Default for PixivConfig {
    fn default() -> Self {
        Self {
            account_name: "".to_string(),
            refresh_token: "".to_string(),
            language: "en".to_string(),
            proxy_api: "".to_string(),
            proxy_download: "".to_string(),
            watch_user_id: "".to_string(),
            restrict: Restrict::Public,
            token_expired_test_interval: Duration::from_secs(3000),
            login_retry: LoginRetryConfig::default(),
        }
    }
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoginRetryConfig {
    #[serde_as(as = "DurationSeconds<u64>")]
    pub initial_delay: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub max_delay: Duration,
    /// 0 retries until shutdown.
    pub max_attempts: u32,
}

impl Default for LoginRetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(120),
            max_attempts: 10,
        }
    }
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct WatcherConfig {
    #[serde_as(as = "DurationSeconds<u64>")]
    pub check_interval: Duration,
    pub sending_limit: usize,
    /// Empty means no baseline.
    pub baseline_pid: String,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            sending_limit: 15,
            baseline_pid: "".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ListFilter {
    pub as_whitelist: bool,
    pub values: BTreeSet<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct FilterConfig {
    /// 0: normal only, 1: adds R-18, 2: adds R-18G, 3: everything.
    pub show_policy_limited: u8,
    pub tag: ListFilter,
    pub uid: ListFilter,
    pub pid: ListFilter,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct GatewayConfig {
    pub webhook_url: String,
    pub groups: Vec<i64>,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            info!("creating config file: {}", path.to_string_lossy());
            let defaults = Config {
                config_path: Some(path.to_owned()),
                ..Default::default()
            };

            defaults.save()?;
            Ok(defaults)
        } else {
            let file = File::open(path).context(IoSnafu)?;
            let mut config_loaded: Config = serde_json::from_reader(file).context(JsonSnafu)?;
            config_loaded.config_path = Some(PathBuf::from(path));
            config_loaded.save()?;
            Ok(config_loaded)
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = self
            .config_path
            .as_ref()
            .ok_or_else(|| PathNotSetSnafu.build())?;
        if let Some(p) = path.parent() {
            std::fs::create_dir_all(p).context(IoSnafu)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .context(IoSnafu)?;
        serde_json::to_writer_pretty(file, &self).context(JsonSnafu)
    }

    /// Checks what serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.pixiv.account_name.is_empty() {
            return InvalidSnafu {
                message: "pixiv.account_name is empty",
            }
            .fail();
        }
        if self.filter.show_policy_limited > 3 {
            return InvalidSnafu {
                message: format!(
                    "filter.show_policy_limited must be 0..=3, got {}",
                    self.filter.show_policy_limited
                ),
            }
            .fail();
        }
        if self.watcher.sending_limit == 0 {
            return InvalidSnafu {
                message: "watcher.sending_limit must be positive",
            }
            .fail();
        }
        Ok(())
    }

    pub fn sub_dir(&self, dir: impl AsRef<Path>) -> PathBuf {
        let dir = dir.as_ref();
        if dir.is_relative() {
            let rel = PathBuf::from(&self.root_storage_dir).join(dir);
            match rel.canonicalize() {
                Ok(abs) => abs,
                Err(e) => {
                    warn!(
                        "cannot canonicalize path: {}, error: {}",
                        rel.to_string_lossy(),
                        e
                    );
                    rel
                }
            }
        } else {
            dir.to_owned()
        }
    }

    pub fn database_file(&self) -> PathBuf {
        self.sub_dir(&self.database_path)
    }

    pub fn cache_root(&self) -> PathBuf {
        self.sub_dir(&self.cache_dir)
    }

    pub fn proxy(&self, url: &str) -> Result<Option<reqwest::Proxy>> {
        use reqwest::Proxy;
        if !url.is_empty() {
            Ok(Some(Proxy::all(url).context(ProxyParseSnafu)?))
        } else if !self.proxy_all.is_empty() {
            Ok(Some(Proxy::all(&self.proxy_all).context(ProxyParseSnafu)?))
        } else {
            Ok(None)
        }
    }
}
