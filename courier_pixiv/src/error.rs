use snafu::Snafu;
use std::path::PathBuf;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
#[snafu(context(suffix(false)))]
pub enum Error {
    #[snafu(display("pixiv app-api: {source}"))]
    PixivApi { source: pixivcrab::error::Error },

    #[snafu(display("http: {source}"))]
    Http { source: reqwest::Error },

    #[snafu(display("unexpected status {status}: {text}"))]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        text: String,
    },

    #[snafu(display("unknown data from pixiv: {message}"))]
    UnknownData { message: String },

    #[snafu(display("session rejected again after refreshing: {message}"))]
    SessionRejected { message: String },

    #[snafu(display("login failed {attempts} times, giving up: {message}"))]
    LoginExhausted { attempts: u32, message: String },

    #[snafu(display("no login secret: set pixiv.refresh_token in the config"))]
    MissingSecret,

    #[snafu(display("shutdown requested"))]
    Cancelled,

    #[snafu(display("credential cache {}: {source}", path.to_string_lossy()))]
    CredentialCacheIo {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("credential cache {}: {source}", path.to_string_lossy()))]
    CredentialCacheJson {
        source: serde_json::Error,
        path: PathBuf,
    },

    #[snafu(display("asset {asset} is not public"))]
    NotPublic { asset: String },

    #[snafu(display("blocking task: {source}"))]
    Join { source: tokio::task::JoinError },

    #[snafu(display("gateway: {message}"))]
    Gateway { message: String },

    #[snafu(display("store: {source}"))]
    Store {
        source: courier_core::store::Error,
    },

    #[snafu(display("config: {source}"))]
    Config {
        source: courier_core::config::Error,
    },

    #[snafu(display("utils: {source}"))]
    Utils {
        source: courier_utils::error::Error,
    },
}

impl Error {
    /// Errors that only concern one feed item; the batch goes on without it.
    pub fn is_item_local(&self) -> bool {
        matches!(self, Error::UnknownData { .. } | Error::NotPublic { .. })
    }
}
