//! The two external collaborators the core talks to: the bookmark feed and the login
//! exchange. [`AppClient`] and [`PixivLogin`] are the real pixiv implementations.

use async_trait::async_trait;
use bytes::Bytes;
use courier_core::config::{Config, Restrict};
use log::{debug, warn};
use pixivcrab::{AppApi, AuthMethod};
use reqwest::{Client, ClientBuilder, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use snafu::ResultExt;

use crate::{error, Result};

const API_HOST: &str = "https://app-api.pixiv.net";
const REFERER: &str = "https://app-api.pixiv.net/";
const APP_OS: &str = "ios";
const APP_OS_VERSION: &str = "14.6";
const USER_AGENT: &str = "PixivIOSApp/7.13.3 (iOS 14.6; iPhone13,2)";

/// A response that either carries a value or says the access token was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply<T> {
    Accepted(T),
    Rejected { message: String },
}

/// One page of the bookmark feed, newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedPage {
    /// Raw items; each one is parsed on its own so a malformed item cannot sink the page.
    pub items: Vec<serde_json::Value>,
    /// Opaque cursor for the following page, `None` on the last one.
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait FeedClient: Send + Sync {
    async fn bookmark_page(
        &self,
        access_token: &str,
        user_id: &str,
        restrict: Restrict,
        cursor: Option<&str>,
    ) -> Result<Reply<FeedPage>>;

    /// Lightweight authenticated read used to check a token.
    async fn probe(&self, access_token: &str, user_id: &str) -> Result<Reply<()>>;

    async fn download(&self, url: &str) -> Result<Bytes>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginInfo {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: String,
}

#[async_trait]
pub trait LoginHelper: Send + Sync {
    async fn login(&self, account: &str, secret: &str) -> Result<LoginInfo>;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

/// The message of an error body that means "this access token is no good".
fn auth_rejection(status: StatusCode, body: &str) -> Option<String> {
    if status != StatusCode::BAD_REQUEST && status != StatusCode::UNAUTHORIZED {
        return None;
    }
    let message = serde_json::from_str::<ErrorBody>(body).ok()?.error.message;
    let lower = message.to_ascii_lowercase();
    if status == StatusCode::UNAUTHORIZED || lower.contains("oauth") || lower.contains("invalid_grant")
    {
        Some(message)
    } else {
        None
    }
}

async fn read_reply(resp: Response) -> Result<Reply<String>> {
    let status = resp.status();
    let text = resp.text().await.context(error::Http)?;
    if status.is_success() {
        return Ok(Reply::Accepted(text));
    }
    if let Some(message) = auth_rejection(status, &text) {
        return Ok(Reply::Rejected { message });
    }
    error::UnexpectedStatus { status, text }.fail()
}

#[derive(Deserialize)]
struct BookmarkResponse {
    #[serde(default)]
    illusts: Vec<serde_json::Value>,
    next_url: Option<String>,
}

fn parse_page(body: &str) -> Result<FeedPage> {
    let r: BookmarkResponse = serde_json::from_str(body).map_err(|e| {
        error::UnknownData {
            message: format!("cannot parse bookmark page: {e}"),
        }
        .build()
    })?;
    Ok(FeedPage {
        items: r.illusts,
        next_cursor: r.next_url.filter(|u| !u.is_empty()),
    })
}

/// Bookmark feed and downloads over the pixiv app api.
pub struct AppClient {
    api: Client,
    download: Client,
    language: String,
}

impl AppClient {
    pub fn new(config: &Config) -> Result<Self> {
        let mut api = ClientBuilder::new();
        if let Some(proxy) = config
            .proxy(&config.pixiv.proxy_api)
            .context(error::Config)?
        {
            debug!("pixiv api proxy set: {:?}", proxy);
            api = api.proxy(proxy);
        }
        let mut download = ClientBuilder::new();
        if let Some(proxy) = config
            .proxy(&config.pixiv.proxy_download)
            .context(error::Config)?
        {
            debug!("pixiv download proxy set: {:?}", proxy);
            download = download.proxy(proxy);
        }
        Ok(Self {
            api: api.build().context(error::Http)?,
            download: download.build().context(error::Http)?,
            language: config.pixiv.language.clone(),
        })
    }

    fn authed(&self, request: RequestBuilder, access_token: &str) -> RequestBuilder {
        request
            .header("App-OS", APP_OS)
            .header("App-OS-Version", APP_OS_VERSION)
            .header("User-Agent", USER_AGENT)
            .header("Accept-Language", &self.language)
            .bearer_auth(access_token)
    }
}

#[async_trait]
impl FeedClient for AppClient {
    async fn bookmark_page(
        &self,
        access_token: &str,
        user_id: &str,
        restrict: Restrict,
        cursor: Option<&str>,
    ) -> Result<Reply<FeedPage>> {
        let request = match cursor {
            Some(next_url) => self.api.get(next_url),
            None => self
                .api
                .get(format!("{API_HOST}/v1/user/bookmarks/illust"))
                .query(&[
                    ("user_id", user_id),
                    ("restrict", restrict.as_str()),
                    ("filter", "for_ios"),
                ]),
        };
        let resp = self
            .authed(request, access_token)
            .send()
            .await
            .context(error::Http)?;
        match read_reply(resp).await? {
            Reply::Accepted(body) => Ok(Reply::Accepted(parse_page(&body)?)),
            Reply::Rejected { message } => Ok(Reply::Rejected { message }),
        }
    }

    async fn probe(&self, access_token: &str, user_id: &str) -> Result<Reply<()>> {
        let request = self
            .api
            .get(format!("{API_HOST}/v1/user/detail"))
            .query(&[("user_id", user_id), ("filter", "for_ios")]);
        let resp = self
            .authed(request, access_token)
            .send()
            .await
            .context(error::Http)?;
        Ok(match read_reply(resp).await? {
            Reply::Accepted(_) => Reply::Accepted(()),
            Reply::Rejected { message } => Reply::Rejected { message },
        })
    }

    async fn download(&self, url: &str) -> Result<Bytes> {
        let resp = self
            .download
            .get(url)
            .header("Referer", REFERER)
            .send()
            .await
            .context(error::Http)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return error::UnexpectedStatus { status, text }.fail();
        }
        resp.bytes().await.context(error::Http)
    }
}

/// Refresh-token login through `pixivcrab`.
pub struct PixivLogin {
    proxy: Option<reqwest::Proxy>,
    language: String,
}

impl PixivLogin {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            proxy: config
                .proxy(&config.pixiv.proxy_api)
                .context(error::Config)?,
            language: config.pixiv.language.clone(),
        })
    }
}

#[async_trait]
impl LoginHelper for PixivLogin {
    async fn login(&self, account: &str, secret: &str) -> Result<LoginInfo> {
        let mut api_client = ClientBuilder::new().cookie_store(true);
        if let Some(proxy) = &self.proxy {
            api_client = api_client.proxy(proxy.clone());
        }
        let mut api_config = pixivcrab::AppApiConfig::default();
        if let Err(e) = api_config.set_language(&self.language) {
            warn!("ignoring invalid pixiv.language {:?}: {}", self.language, e);
        }
        let api = AppApi::new_with_config(
            AuthMethod::RefreshToken(secret.to_string()),
            api_client,
            api_config,
        )
        .context(error::PixivApi)?;
        let auth_result = api.auth().await.context(error::PixivApi)?;
        debug!(
            "pixiv authed for {}: {} ({})",
            account, auth_result.user.name, auth_result.user.id
        );
        Ok(LoginInfo {
            access_token: auth_result.access_token,
            refresh_token: auth_result.refresh_token,
            user_id: auth_result.user.id,
        })
    }
}
