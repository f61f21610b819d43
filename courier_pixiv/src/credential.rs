//! Keeps an access/refresh token pair usable for the life of the process.
//!
//! ```text
//! Unauthenticated -> CacheCandidate -> Validating -> Validated
//!                                                 -> Rejected -> Refreshing -> Validated
//! ```

use chrono::{DateTime, Utc};
use courier_core::config::{Config, LoginRetryConfig};
use courier_utils::{write_atomic, Backoff, Shutdown};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::{
    future::Future,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    api::{FeedClient, LoginHelper, Reply},
    error,
    utils::redact,
    Result,
};

/// The cached login result for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: String,
    pub last_validated: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    Unauthenticated,
    CacheCandidate,
    Validating,
    Validated,
    Rejected,
    Refreshing,
}

pub struct CredentialManager<L> {
    login: L,
    account: String,
    secret: String,
    cache_path: PathBuf,
    expiry_test_interval: chrono::Duration,
    retry: LoginRetryConfig,
    shutdown: Shutdown,
    state: CredentialState,
    snapshot: Option<Snapshot>,
}

/// `login_info_<account>.json` under `cache_dir`.
pub fn cache_path_for(cache_dir: impl AsRef<Path>, account: &str) -> PathBuf {
    cache_dir.as_ref().join(format!("login_info_{account}.json"))
}

impl<L: LoginHelper> CredentialManager<L> {
    pub fn new(
        login: L,
        account: impl Into<String>,
        secret: impl Into<String>,
        cache_dir: impl AsRef<Path>,
        expiry_test_interval: Duration,
        retry: LoginRetryConfig,
        shutdown: Shutdown,
    ) -> Self {
        let account = account.into();
        Self {
            login,
            cache_path: cache_path_for(cache_dir, &account),
            account,
            secret: secret.into(),
            expiry_test_interval: chrono::Duration::from_std(expiry_test_interval)
                .unwrap_or_else(|_| chrono::Duration::weeks(52)),
            retry,
            shutdown,
            state: CredentialState::Unauthenticated,
            snapshot: None,
        }
    }

    pub fn from_config(login: L, config: &Config, shutdown: Shutdown) -> Self {
        Self::new(
            login,
            config.pixiv.account_name.clone(),
            config.pixiv.refresh_token.clone(),
            config.cache_root(),
            config.pixiv.token_expired_test_interval,
            config.pixiv.login_retry.clone(),
            shutdown,
        )
    }

    pub fn state(&self) -> CredentialState {
        self.state
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    /// Whether a login can be attempted at all: a configured secret or a cached snapshot.
    pub fn has_secret(&self) -> bool {
        !self.secret.is_empty() || self.cache_path.is_file()
    }

    fn load_cache(&self) -> Result<Option<Snapshot>> {
        let data = match std::fs::read(&self.cache_path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).context(error::CredentialCacheIo {
                    path: self.cache_path.clone(),
                })
            }
        };
        match serde_json::from_slice(&data) {
            Ok(snapshot) => {
                debug!("found cached login info: {}", self.cache_path.to_string_lossy());
                Ok(Some(snapshot))
            }
            Err(e) => {
                warn!(
                    "ignoring unreadable login cache {}: {}",
                    self.cache_path.to_string_lossy(),
                    e
                );
                Ok(None)
            }
        }
    }

    fn save_cache(&self, snapshot: &Snapshot) -> Result<()> {
        let data = serde_json::to_vec_pretty(snapshot).context(error::CredentialCacheJson {
            path: self.cache_path.clone(),
        })?;
        write_atomic(&self.cache_path, &data).context(error::Utils)
    }

    fn validated(&mut self, snapshot: Snapshot) -> Snapshot {
        self.state = CredentialState::Validated;
        self.snapshot.insert(snapshot).clone()
    }

    /// Use the cached snapshot if the api still accepts it, log in otherwise.
    pub async fn acquire<F>(&mut self, feed: &F) -> Result<Snapshot>
    where
        F: FeedClient + ?Sized,
    {
        self.state = CredentialState::Unauthenticated;
        if let Some(cached) = self.load_cache()? {
            self.state = CredentialState::CacheCandidate;
            info!("trying cached login info of '{}'", self.account);
            self.state = CredentialState::Validating;
            match feed.probe(&cached.access_token, &cached.user_id).await? {
                Reply::Accepted(()) => {
                    info!("cached login info accepted");
                    return Ok(self.validated(Snapshot {
                        last_validated: Utc::now(),
                        ..cached
                    }));
                }
                Reply::Rejected { message } => {
                    warn!("cached login info rejected: {}", message);
                    self.state = CredentialState::Rejected;
                    // its refresh token is still the newest secret we have
                    self.snapshot = Some(cached);
                }
            }
        }
        self.refresh().await
    }

    /// Log in again, retrying with exponential backoff.
    pub async fn refresh(&mut self) -> Result<Snapshot> {
        self.state = CredentialState::Refreshing;
        let mut secret = match &self.snapshot {
            Some(s) if !s.refresh_token.is_empty() => s.refresh_token.clone(),
            _ => self.secret.clone(),
        };
        if secret.is_empty() {
            return error::MissingSecret.fail();
        }

        let mut backoff = Backoff::new(self.retry.initial_delay, self.retry.max_delay);
        let mut attempts = 0;
        loop {
            if self.shutdown.is_requested() {
                return error::Cancelled.fail();
            }
            attempts += 1;
            info!("attempting login as '{}'", self.account);
            match self.login.login(&self.account, &secret).await {
                Ok(r) => {
                    debug!(
                        "got access_token={} refresh_token={}",
                        redact(&r.access_token),
                        redact(&r.refresh_token)
                    );
                    let snapshot = Snapshot {
                        access_token: r.access_token,
                        refresh_token: r.refresh_token,
                        user_id: r.user_id,
                        last_validated: Utc::now(),
                    };
                    self.save_cache(&snapshot)?;
                    info!("logged in as '{}' ({})", self.account, snapshot.user_id);
                    return Ok(self.validated(snapshot));
                }
                Err(e) => {
                    // 0 keeps trying until shutdown
                    if self.retry.max_attempts != 0 && attempts >= self.retry.max_attempts {
                        self.state = CredentialState::Rejected;
                        return error::LoginExhausted {
                            attempts,
                            message: e.to_string(),
                        }
                        .fail();
                    }
                    if !self.secret.is_empty() && secret != self.secret {
                        warn!(
                            "login with the cached refresh token failed, trying the configured one: {}",
                            e
                        );
                        secret = self.secret.clone();
                        continue;
                    }
                    let delay = backoff.next_delay();
                    warn!("failed to log in, trying again in {:?}: {}", delay, e);
                    if !self.shutdown.sleep(delay).await {
                        return error::Cancelled.fail();
                    }
                }
            }
        }
    }

    /// Probe the token if it was last validated more than the test interval before `now`.
    ///
    /// Called right before work that needs the token, so an idle process does not probe.
    pub async fn ensure_fresh<F>(&mut self, feed: &F, now: DateTime<Utc>) -> Result<Snapshot>
    where
        F: FeedClient + ?Sized,
    {
        let current = match &self.snapshot {
            Some(s) if self.state == CredentialState::Validated => Some(s.clone()),
            _ => None,
        };
        let current = match current {
            Some(s) => s,
            None => return self.acquire(feed).await,
        };
        if now - current.last_validated <= self.expiry_test_interval {
            return Ok(current);
        }

        debug!("token will be tested since the test interval has passed");
        self.state = CredentialState::Validating;
        match feed.probe(&current.access_token, &current.user_id).await? {
            Reply::Accepted(()) => Ok(self.validated(Snapshot {
                last_validated: now,
                ..current
            })),
            Reply::Rejected { message } => {
                warn!("login info was rejected: {}", message);
                self.state = CredentialState::Rejected;
                self.refresh().await
            }
        }
    }

    /// True if `reply` was an auth rejection, in which case the session has been refreshed
    /// and the request should be made again.
    pub async fn should_retry<T>(&mut self, reply: &Reply<T>) -> Result<bool> {
        match reply {
            Reply::Accepted(_) => Ok(false),
            Reply::Rejected { message } => {
                info!("login info was rejected ({}), refreshing", message);
                self.state = CredentialState::Rejected;
                self.refresh().await?;
                info!("refreshed, the request will be redone");
                Ok(true)
            }
        }
    }

    /// Run `request` with the current access token, and once more after a refresh if the
    /// token was rejected.
    pub async fn call<T, Fut>(&mut self, mut request: impl FnMut(String) -> Fut) -> Result<T>
    where
        Fut: Future<Output = Result<Reply<T>>>,
    {
        let token = match &self.snapshot {
            Some(s) => s.access_token.clone(),
            None => self.refresh().await?.access_token,
        };
        let reply = request(token).await?;
        if !self.should_retry(&reply).await? {
            return match reply {
                Reply::Accepted(v) => Ok(v),
                Reply::Rejected { message } => error::SessionRejected { message }.fail(),
            };
        }

        let token = self
            .snapshot
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_default();
        match request(token).await? {
            Reply::Accepted(v) => Ok(v),
            Reply::Rejected { message } => {
                self.state = CredentialState::Rejected;
                error::SessionRejected { message }.fail()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        testing::{MockFeed, MockLogin, Tokens},
        Error,
    };
    use std::sync::Arc;

    fn retry(max_attempts: u32) -> LoginRetryConfig {
        LoginRetryConfig {
            max_attempts,
            ..Default::default()
        }
    }

    fn manager(
        dir: &Path,
        login: MockLogin,
        secret: &str,
        retry: LoginRetryConfig,
        shutdown: Shutdown,
    ) -> CredentialManager<MockLogin> {
        CredentialManager::new(
            login,
            "tester",
            secret,
            dir,
            Duration::from_secs(3000),
            retry,
            shutdown,
        )
    }

    fn long_ago() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn write_cache(dir: &Path, access_token: &str, refresh_token: &str) {
        let snapshot = Snapshot {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            user_id: "42".to_string(),
            last_validated: long_ago(),
        };
        std::fs::write(
            cache_path_for(dir, "tester"),
            serde_json::to_vec(&snapshot).unwrap(),
        )
        .unwrap();
    }

    fn read_cache(dir: &Path) -> Snapshot {
        serde_json::from_slice(&std::fs::read(cache_path_for(dir, "tester")).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn first_login_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let tokens = Arc::new(Tokens::default());
        let feed = MockFeed::new(vec![], tokens.clone());
        let mut m = manager(
            dir.path(),
            MockLogin::new(tokens),
            "seed",
            retry(3),
            Shutdown::never(),
        );
        assert_eq!(m.state(), CredentialState::Unauthenticated);

        let snapshot = m.acquire(&feed).await.unwrap();
        assert_eq!(snapshot.access_token, "access-1");
        assert_eq!(m.state(), CredentialState::Validated);
        assert_eq!(m.login.secrets(), ["seed"]);
        assert_eq!(feed.probes(), 0);
        assert_eq!(read_cache(dir.path()), snapshot);
    }

    #[tokio::test]
    async fn accepted_cache_skips_login() {
        let dir = tempfile::tempdir().unwrap();
        let tokens = Arc::new(Tokens::default());
        tokens.accept("cached");
        write_cache(dir.path(), "cached", "cached-refresh");
        let feed = MockFeed::new(vec![], tokens.clone());
        let mut m = manager(
            dir.path(),
            MockLogin::new(tokens),
            "seed",
            retry(3),
            Shutdown::never(),
        );

        let snapshot = m.acquire(&feed).await.unwrap();
        assert_eq!(snapshot.access_token, "cached");
        assert!(snapshot.last_validated > long_ago());
        assert_eq!(feed.probes(), 1);
        assert!(m.login.attempts().is_empty());
    }

    #[tokio::test]
    async fn rejected_cache_refreshes_with_its_refresh_token() {
        let dir = tempfile::tempdir().unwrap();
        let tokens = Arc::new(Tokens::default());
        write_cache(dir.path(), "stale", "cached-refresh");
        let feed = MockFeed::new(vec![], tokens.clone());
        let mut m = manager(
            dir.path(),
            MockLogin::new(tokens),
            "seed",
            retry(3),
            Shutdown::never(),
        );

        let snapshot = m.acquire(&feed).await.unwrap();
        assert_eq!(m.login.secrets(), ["cached-refresh"]);
        assert_eq!(snapshot.access_token, "access-1");
        assert_eq!(read_cache(dir.path()).refresh_token, "refresh-1");
    }

    #[tokio::test]
    async fn revoked_cached_token_falls_back_to_configured_one() {
        let dir = tempfile::tempdir().unwrap();
        let tokens = Arc::new(Tokens::default());
        write_cache(dir.path(), "stale", "revoked");
        let feed = MockFeed::new(vec![], tokens.clone());
        let mut m = manager(
            dir.path(),
            MockLogin::new(tokens).revoking("revoked"),
            "new-seed",
            retry(3),
            Shutdown::never(),
        );

        let snapshot = m.acquire(&feed).await.unwrap();
        assert_eq!(m.login.secrets(), ["revoked", "new-seed"]);
        assert_eq!(snapshot.access_token, "access-1");
        assert_eq!(read_cache(dir.path()).refresh_token, "refresh-1");
    }

    #[tokio::test]
    async fn unreadable_cache_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let tokens = Arc::new(Tokens::default());
        std::fs::write(cache_path_for(dir.path(), "tester"), "{not json").unwrap();
        let feed = MockFeed::new(vec![], tokens.clone());
        let mut m = manager(
            dir.path(),
            MockLogin::new(tokens),
            "seed",
            retry(3),
            Shutdown::never(),
        );

        m.acquire(&feed).await.unwrap();
        assert_eq!(m.login.secrets(), ["seed"]);
        assert_eq!(feed.probes(), 0);
    }

    #[tokio::test]
    async fn no_secret_at_all() {
        let dir = tempfile::tempdir().unwrap();
        let tokens = Arc::new(Tokens::default());
        let feed = MockFeed::new(vec![], tokens.clone());
        let mut m = manager(
            dir.path(),
            MockLogin::new(tokens),
            "",
            retry(3),
            Shutdown::never(),
        );
        assert!(!m.has_secret());
        let err = m.acquire(&feed).await.unwrap_err();
        assert!(matches!(err, Error::MissingSecret));
        assert!(m.login.attempts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn login_backs_off_exponentially() {
        let dir = tempfile::tempdir().unwrap();
        let tokens = Arc::new(Tokens::default());
        let mut m = manager(
            dir.path(),
            MockLogin::failing(tokens, 3),
            "seed",
            retry(10),
            Shutdown::never(),
        );

        let snapshot = m.refresh().await.unwrap();
        assert_eq!(snapshot.access_token, "access-1");

        let attempts = m.login.attempts();
        assert_eq!(attempts.len(), 4);
        let gaps: Vec<u64> = attempts
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis() as u64)
            .collect();
        for (gap, expected) in gaps.iter().zip([1000, 2000, 4000]) {
            assert!(
                (expected..expected + 50).contains(gap),
                "gap {gap}ms, expected {expected}ms"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn login_gives_up_after_max_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let tokens = Arc::new(Tokens::default());
        let mut m = manager(
            dir.path(),
            MockLogin::failing(tokens, 100),
            "seed",
            retry(3),
            Shutdown::never(),
        );

        let err = m.refresh().await.unwrap_err();
        assert!(matches!(err, Error::LoginExhausted { attempts: 3, .. }));
        assert_eq!(m.login.attempts().len(), 3);
        assert!(!cache_path_for(dir.path(), "tester").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let tokens = Arc::new(Tokens::default());
        let (trigger, shutdown) = Shutdown::channel();
        let mut m = manager(
            dir.path(),
            MockLogin::failing(tokens, 100),
            "seed",
            retry(0),
            shutdown,
        );

        let (result, _) = tokio::join!(m.refresh(), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.trigger();
        });
        assert!(matches!(result.unwrap_err(), Error::Cancelled));
        // attempts at 0s, 1s and 3s; the 4s wait is cut short
        assert_eq!(m.login.attempts().len(), 3);
    }

    #[tokio::test]
    async fn token_is_probed_only_after_interval() {
        let dir = tempfile::tempdir().unwrap();
        let tokens = Arc::new(Tokens::default());
        let feed = MockFeed::new(vec![], tokens.clone());
        let mut m = manager(
            dir.path(),
            MockLogin::new(tokens.clone()),
            "seed",
            retry(3),
            Shutdown::never(),
        );
        let t0 = m.acquire(&feed).await.unwrap().last_validated;

        m.ensure_fresh(&feed, t0 + chrono::Duration::seconds(10))
            .await
            .unwrap();
        assert_eq!(feed.probes(), 0);

        let t1 = t0 + chrono::Duration::seconds(3001);
        let snapshot = m.ensure_fresh(&feed, t1).await.unwrap();
        assert_eq!(feed.probes(), 1);
        assert_eq!(snapshot.access_token, "access-1");
        assert_eq!(snapshot.last_validated, t1);

        tokens.revoke_all();
        let snapshot = m
            .ensure_fresh(&feed, t1 + chrono::Duration::seconds(3001))
            .await
            .unwrap();
        assert_eq!(feed.probes(), 2);
        assert_eq!(snapshot.access_token, "access-2");
        assert_eq!(m.login.secrets(), ["seed", "refresh-1"]);
    }

    #[tokio::test]
    async fn rejected_call_is_redone_once() {
        let dir = tempfile::tempdir().unwrap();
        let tokens = Arc::new(Tokens::default());
        let feed = MockFeed::new(vec![], tokens.clone());
        let mut m = manager(
            dir.path(),
            MockLogin::new(tokens.clone()),
            "seed",
            retry(3),
            Shutdown::never(),
        );
        m.acquire(&feed).await.unwrap();
        tokens.revoke_all();

        let echo = |token: String| {
            let tokens = tokens.clone();
            async move {
                Ok::<_, Error>(if tokens.is_valid(&token) {
                    Reply::Accepted(token)
                } else {
                    Reply::Rejected {
                        message: "invalid_grant".to_string(),
                    }
                })
            }
        };
        assert_eq!(m.call(echo).await.unwrap(), "access-2");
        assert_eq!(m.state(), CredentialState::Validated);

        let never = |_: String| async {
            Ok::<_, Error>(Reply::<()>::Rejected {
                message: "invalid_grant".to_string(),
            })
        };
        let err = m.call(never).await.unwrap_err();
        assert!(matches!(err, Error::SessionRejected { .. }));
        assert_eq!(m.login.attempts().len(), 3);
    }

    #[tokio::test]
    async fn accepted_reply_needs_no_retry() {
        let dir = tempfile::tempdir().unwrap();
        let tokens = Arc::new(Tokens::default());
        let mut m = manager(
            dir.path(),
            MockLogin::new(tokens),
            "seed",
            retry(3),
            Shutdown::never(),
        );
        assert!(!m.should_retry(&Reply::Accepted(())).await.unwrap());
        assert!(m.login.attempts().is_empty());
    }
}
