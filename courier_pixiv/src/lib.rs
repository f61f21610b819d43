use chrono::Utc;
use courier_core::{
    config::{Config, Restrict},
    model::{ActionType, SubAsset, SubAssetRef},
    store::Store,
};
use courier_utils::{try_skip, Shutdown};
use log::{debug, info, warn};
use snafu::ResultExt;
use std::collections::HashSet;

pub mod api;
pub mod credential;
pub mod download;
mod error;
pub mod filter;
pub mod gateway;
pub mod models;
#[cfg(test)]
mod testing;
mod utils;

pub use api::{AppClient, FeedClient, LoginHelper, PixivLogin};
pub use credential::{CredentialManager, CredentialState, Snapshot};
pub use download::{AssetCache, CacheOutcome};
pub use error::Error;
pub use filter::ItemFilter;
pub use gateway::{Acknowledgement, NotificationGateway, OutgoingAsset, WebhookGateway};

pub(crate) type Result<T> = std::result::Result<T, Error>;

/// What one pipeline invocation looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Empty means the logged-in account.
    pub watch_uid: String,
    pub restrict: Restrict,
    /// Items from this pid on were seen before the watcher was set up.
    pub baseline_pid: Option<String>,
    pub target_count: usize,
}

impl FetchRequest {
    pub fn from_config(config: &Config, limit: Option<usize>) -> Self {
        let baseline = &config.watcher.baseline_pid;
        Self {
            watch_uid: config.pixiv.watch_user_id.clone(),
            restrict: config.pixiv.restrict,
            baseline_pid: (!baseline.is_empty()).then(|| baseline.clone()),
            target_count: limit.unwrap_or(config.watcher.sending_limit),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    pub assets: Vec<SubAssetRef>,
    /// Ledger entry, `None` when nothing was acknowledged.
    pub action_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: Vec<SubAsset>,
    pub delivery: Delivery,
}

pub struct CourierKit<F = AppClient, L = PixivLogin> {
    pub feed: F,
    pub credentials: CredentialManager<L>,
    pub store: Store,
    pub filter: ItemFilter,
    pub cache: AssetCache,
    pub shutdown: Shutdown,
}

impl CourierKit {
    /// Open the store and log in.
    pub async fn new(config: &Config, shutdown: Shutdown) -> Result<Self> {
        config.validate().context(error::Config)?;
        let credentials =
            CredentialManager::from_config(PixivLogin::new(config)?, config, shutdown.clone());
        if !credentials.has_secret() {
            return error::MissingSecret.fail();
        }
        let store = Store::open(config.database_file())
            .await
            .context(error::Store)?;
        let mut kit = Self {
            feed: AppClient::new(config)?,
            credentials,
            store,
            filter: ItemFilter::new(config.filter.clone()),
            cache: AssetCache::new(config.cache_root()),
            shutdown,
        };
        kit.credentials.acquire(&kit.feed).await?;
        Ok(kit)
    }
}

impl<F: FeedClient, L: LoginHelper> CourierKit<F, L> {
    pub fn current_user_id(&self) -> Option<&str> {
        self.credentials.snapshot().map(|s| s.user_id.as_str())
    }

    /// Walk the bookmark feed newest first and return up to `target_count` sub-assets
    /// that pass the filter and were never delivered.
    ///
    /// Every parsed item before the baseline is stored, filtered or not. All of it is
    /// committed at once when the walk ends; any error leaves the store untouched.
    pub async fn fetch_new(&mut self, request: &FetchRequest) -> Result<Vec<SubAsset>> {
        let mut fetched: Vec<SubAsset> = Vec::new();
        if request.target_count == 0 {
            return Ok(fetched);
        }
        let session = self
            .credentials
            .ensure_fresh(&self.feed, Utc::now())
            .await?;
        let watch_uid = if request.watch_uid.is_empty() {
            session.user_id
        } else {
            request.watch_uid.clone()
        };

        let mut batch = self.store.begin().await.context(error::Store)?;
        let mut seen: HashSet<SubAssetRef> = HashSet::new();
        let mut cursor: Option<String> = None;
        let mut page_no = 0;

        'pages: loop {
            if self.shutdown.is_requested() {
                warn!("shutdown requested, dropping this fetch");
                return error::Cancelled.fail();
            }
            page_no += 1;
            info!(
                "fetching {} bookmarks of {}, page {}",
                request.restrict.as_str(),
                watch_uid,
                page_no
            );
            let page = {
                let feed = &self.feed;
                let uid = watch_uid.as_str();
                let restrict = request.restrict;
                let current = cursor.as_deref();
                self.credentials
                    .call(move |token| async move {
                        feed.bookmark_page(&token, uid, restrict, current).await
                    })
                    .await?
            };

            for raw in page.items {
                // the baseline may itself be unsupported or malformed
                if let Some(baseline) = request.baseline_pid.as_deref() {
                    if models::raw_pid(&raw).as_deref() == Some(baseline) {
                        info!("reached baseline {}", baseline);
                        break 'pages;
                    }
                }
                let item = match try_skip!(models::parse_item(raw)) {
                    Some(item) => item,
                    None => continue,
                };
                batch.upsert_item(&item).await.context(error::Store)?;
                if !self.filter.admits(&item) {
                    debug!("{} filtered out", item.pid);
                    continue;
                }
                for asset in item.assets {
                    let key = asset.key();
                    if !seen.insert(key.clone()) {
                        continue;
                    }
                    let history = batch
                        .delivery_history_for(&key)
                        .await
                        .context(error::Store)?;
                    if !history.is_empty() {
                        debug!("{} already delivered in {:?}", key, history);
                        continue;
                    }
                    fetched.push(asset);
                    if fetched.len() >= request.target_count {
                        break 'pages;
                    }
                }
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => {
                    debug!("end of bookmarks");
                    break;
                }
            }
        }

        batch.commit().await.context(error::Store)?;
        info!("{} new sub-assets", fetched.len());
        Ok(fetched)
    }

    /// Download `asset` into the cache. An existing copy is kept unless `force` is set.
    pub async fn cache_asset(&mut self, asset: &SubAsset, force: bool) -> Result<CacheOutcome> {
        let key = asset.key();
        if !asset.public {
            return error::NotPublic {
                asset: key.to_string(),
            }
            .fail();
        }
        let path = self.cache.path_for(asset)?;
        if self.cache.has_cached(asset).await {
            if !force {
                debug!("{}: keeping {}", key, path.to_string_lossy());
                return Ok(CacheOutcome::Kept(path));
            }
            debug!("{}: overwriting {}", key, path.to_string_lossy());
        }
        self.credentials
            .ensure_fresh(&self.feed, Utc::now())
            .await?;
        info!("{}: downloading {}", key, asset.download_url);
        let data = self.feed.download(&asset.download_url).await?;
        self.cache.store(path.clone(), data).await?;
        Ok(CacheOutcome::Written(path))
    }

    /// Cache `assets`, hand them to `gateway`, and record the batch once it is acknowledged.
    pub async fn deliver<G>(&mut self, assets: &[SubAsset], gateway: &G) -> Result<Delivery>
    where
        G: NotificationGateway + ?Sized,
    {
        let mut outgoing = Vec::with_capacity(assets.len());
        for asset in assets {
            let local_path = match self.cache_asset(asset, false).await {
                Ok(outcome) => Some(outcome.into_path()),
                Err(Error::NotPublic { .. }) => {
                    info!("{}: creator hidden, sending the link only", asset.key());
                    None
                }
                Err(e) if e.is_item_local() => {
                    warn!("{}: {}", asset.key(), e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            outgoing.push(OutgoingAsset {
                pid: asset.pid.clone(),
                index: asset.index,
                source_url: models::source_url(&asset.pid),
                download_url: asset.download_url.clone(),
                local_path,
            });
        }
        if outgoing.is_empty() {
            return Ok(Delivery::default());
        }

        match gateway.deliver(&outgoing).await? {
            Acknowledgement::Delivered => {
                let refs: Vec<SubAssetRef> = outgoing.iter().map(OutgoingAsset::key).collect();
                let mut batch = self.store.begin().await.context(error::Store)?;
                let action_id = batch
                    .record_delivery(ActionType::BookmarkBatchDelivered, &refs)
                    .await
                    .context(error::Store)?;
                batch.commit().await.context(error::Store)?;
                info!("delivered {} sub-assets as action {}", refs.len(), action_id);
                Ok(Delivery {
                    assets: refs,
                    action_id: Some(action_id),
                })
            }
            Acknowledgement::Refused { reason } => {
                warn!("gateway refused {} sub-assets: {}", outgoing.len(), reason);
                Ok(Delivery::default())
            }
        }
    }

    /// One fetch and delivery round.
    pub async fn run_cycle<G>(&mut self, request: &FetchRequest, gateway: &G) -> Result<CycleReport>
    where
        G: NotificationGateway + ?Sized,
    {
        let fetched = self.fetch_new(request).await?;
        if fetched.is_empty() {
            info!("nothing new");
            return Ok(CycleReport::default());
        }
        let delivery = self.deliver(&fetched, gateway).await?;
        Ok(CycleReport { fetched, delivery })
    }
}
