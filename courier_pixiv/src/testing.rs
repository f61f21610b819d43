//! In-memory stand-ins for pixiv and the gateway.

use async_trait::async_trait;
use bytes::Bytes;
use courier_core::config::Restrict;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU32, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use crate::{
    api::{FeedClient, FeedPage, LoginHelper, LoginInfo, Reply},
    error,
    gateway::{Acknowledgement, NotificationGateway, OutgoingAsset},
    Result,
};

/// Access tokens the fake api currently accepts, shared by [`MockFeed`] and [`MockLogin`].
#[derive(Debug, Default)]
pub struct Tokens(Mutex<HashSet<String>>);

impl Tokens {
    pub fn accept(&self, token: &str) {
        self.0.lock().unwrap().insert(token.to_string());
    }

    pub fn revoke_all(&self) {
        self.0.lock().unwrap().clear();
    }

    pub fn is_valid(&self, token: &str) -> bool {
        self.0.lock().unwrap().contains(token)
    }
}

pub fn cursor_for(page: usize) -> String {
    format!("cursor-{page}")
}

fn page_of(cursor: Option<&str>) -> usize {
    cursor
        .and_then(|c| c.strip_prefix("cursor-"))
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub token: String,
    pub user_id: String,
    pub cursor: Option<String>,
}

pub struct MockFeed {
    pages: Vec<Vec<Value>>,
    tokens: Arc<Tokens>,
    failing_page: Option<usize>,
    reject_once: Mutex<HashSet<usize>>,
    pub requests: Mutex<Vec<PageRequest>>,
    pub probes: AtomicUsize,
    pub downloads: Mutex<Vec<String>>,
}

impl MockFeed {
    pub fn new(pages: Vec<Vec<Value>>, tokens: Arc<Tokens>) -> Self {
        Self {
            pages,
            tokens,
            failing_page: None,
            reject_once: Mutex::new(HashSet::new()),
            requests: Mutex::new(Vec::new()),
            probes: AtomicUsize::new(0),
            downloads: Mutex::new(Vec::new()),
        }
    }

    /// Page `page` fails with a server error.
    pub fn failing_on(mut self, page: usize) -> Self {
        self.failing_page = Some(page);
        self
    }

    /// The first request for `page` is refused as if the token expired, whatever it is.
    pub fn rejecting_once(self, page: usize) -> Self {
        self.reject_once.lock().unwrap().insert(page);
        self
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedClient for MockFeed {
    async fn bookmark_page(
        &self,
        access_token: &str,
        user_id: &str,
        _restrict: Restrict,
        cursor: Option<&str>,
    ) -> Result<Reply<FeedPage>> {
        self.requests.lock().unwrap().push(PageRequest {
            token: access_token.to_string(),
            user_id: user_id.to_string(),
            cursor: cursor.map(str::to_string),
        });
        let page = page_of(cursor);
        if !self.tokens.is_valid(access_token) || self.reject_once.lock().unwrap().remove(&page) {
            return Ok(Reply::Rejected {
                message: "invalid_grant".to_string(),
            });
        }
        if self.failing_page == Some(page) {
            return error::UnexpectedStatus {
                status: StatusCode::SERVICE_UNAVAILABLE,
                text: "try later".to_string(),
            }
            .fail();
        }
        let items = self.pages.get(page).cloned().unwrap_or_default();
        let next_cursor = (page + 1 < self.pages.len()).then(|| cursor_for(page + 1));
        Ok(Reply::Accepted(FeedPage { items, next_cursor }))
    }

    async fn probe(&self, access_token: &str, _user_id: &str) -> Result<Reply<()>> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.tokens.is_valid(access_token) {
            Ok(Reply::Accepted(()))
        } else {
            Ok(Reply::Rejected {
                message: "invalid_grant".to_string(),
            })
        }
    }

    async fn download(&self, url: &str) -> Result<Bytes> {
        self.downloads.lock().unwrap().push(url.to_string());
        Ok(Bytes::from(format!("image:{url}")))
    }
}

/// Issues `access-N`/`refresh-N` after failing a set number of times.
pub struct MockLogin {
    tokens: Arc<Tokens>,
    failures: AtomicU32,
    revoked: HashSet<String>,
    issued: AtomicU32,
    pub attempts: Mutex<Vec<tokio::time::Instant>>,
    pub secrets: Mutex<Vec<String>>,
}

impl MockLogin {
    pub fn new(tokens: Arc<Tokens>) -> Self {
        Self::failing(tokens, 0)
    }

    pub fn failing(tokens: Arc<Tokens>, failures: u32) -> Self {
        Self {
            tokens,
            failures: AtomicU32::new(failures),
            revoked: HashSet::new(),
            issued: AtomicU32::new(0),
            attempts: Mutex::new(Vec::new()),
            secrets: Mutex::new(Vec::new()),
        }
    }

    /// Logins with `secret` always fail.
    pub fn revoking(mut self, secret: &str) -> Self {
        self.revoked.insert(secret.to_string());
        self
    }

    pub fn attempts(&self) -> Vec<tokio::time::Instant> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn secrets(&self) -> Vec<String> {
        self.secrets.lock().unwrap().clone()
    }
}

#[async_trait]
impl LoginHelper for MockLogin {
    async fn login(&self, _account: &str, secret: &str) -> Result<LoginInfo> {
        self.attempts
            .lock()
            .unwrap()
            .push(tokio::time::Instant::now());
        self.secrets.lock().unwrap().push(secret.to_string());
        if self.revoked.contains(secret) {
            return error::UnexpectedStatus {
                status: StatusCode::BAD_REQUEST,
                text: "invalid_grant".to_string(),
            }
            .fail();
        }
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return error::UnexpectedStatus {
                status: StatusCode::SERVICE_UNAVAILABLE,
                text: "login unavailable".to_string(),
            }
            .fail();
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let access_token = format!("access-{n}");
        self.tokens.accept(&access_token);
        Ok(LoginInfo {
            access_token,
            refresh_token: format!("refresh-{n}"),
            user_id: "42".to_string(),
        })
    }
}

pub struct MockGateway {
    answer: Acknowledgement,
    pub batches: Mutex<Vec<Vec<OutgoingAsset>>>,
}

impl MockGateway {
    pub fn delivering() -> Self {
        Self::answering(Acknowledgement::Delivered)
    }

    pub fn answering(answer: Acknowledgement) -> Self {
        Self {
            answer,
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn batches(&self) -> Vec<Vec<OutgoingAsset>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationGateway for MockGateway {
    async fn deliver(&self, assets: &[OutgoingAsset]) -> Result<Acknowledgement> {
        self.batches.lock().unwrap().push(assets.to_vec());
        Ok(self.answer.clone())
    }
}

/// A feed item with `pages` pages by creator `uid`.
pub fn illust(pid: u64, uid: u64, pages: usize) -> Value {
    illust_with(pid, uid, pages, 0, &[])
}

/// A feed item shaped like the app api's bookmark response.
pub fn illust_with(pid: u64, uid: u64, pages: usize, x_restrict: i64, tags: &[&str]) -> Value {
    let url = |p: usize| format!("https://i.pximg.net/img-original/img/2024/03/01/00/00/00/{pid}_p{p}.png");
    let tags: Vec<Value> = tags
        .iter()
        .map(|t| json!({ "name": t, "translated_name": null }))
        .collect();
    let (single, multi) = if pages == 1 {
        (json!({ "original_image_url": url(0) }), json!([]))
    } else {
        let multi: Vec<Value> = (0..pages)
            .map(|p| json!({ "image_urls": { "original": url(p) } }))
            .collect();
        (json!({}), Value::Array(multi))
    };
    json!({
        "id": pid,
        "title": format!("work {pid}"),
        "type": "illust",
        "image_urls": {},
        "caption": "",
        "restrict": 0,
        "user": {
            "id": uid,
            "name": format!("creator {uid}"),
            "account": format!("creator_{uid}"),
            "profile_image_urls": { "medium": "https://i.pximg.net/user-profile/img/medium.png" },
            "is_followed": false
        },
        "tags": tags,
        "tools": [],
        "create_date": "2024-03-01T00:00:00+09:00",
        "page_count": pages,
        "width": 1000,
        "height": 1400,
        "sanity_level": 2,
        "x_restrict": x_restrict,
        "series": null,
        "meta_single_page": single,
        "meta_pages": multi,
        "total_view": 100,
        "total_bookmarks": 10,
        "is_bookmarked": true,
        "visible": true,
        "is_muted": false
    })
}
