//! Durable record of ingested items, their sub-assets and tags, and the delivery ledger.
//!
//! Writes only go through a [`Batch`], which wraps one SQLite transaction. Nothing a batch
//! stages is visible to other readers until [`Batch::commit`]; dropping the batch rolls
//! everything back.

use log::debug;
use snafu::ResultExt;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Sqlite, SqlitePool, Transaction,
};
use std::{collections::BTreeSet, path::Path, time::Duration};

use crate::model::{ActionType, ContentItem, DeliveryRecord, SubAssetRef};

mod error;
mod queries;

pub use error::Error;

pub(crate) type Result<T> = std::result::Result<T, Error>;

/// An opened, migrated store.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the database file and bring its schema up to date.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context(error::StoreDir)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .context(error::Database)?;
        crate::migrate(&pool).await.context(error::Migrate)?;
        debug!("store opened: {}", path.to_string_lossy());
        Ok(Self { pool })
    }

    /// Start staging writes.
    pub async fn begin(&self) -> Result<Batch> {
        let tx = self.pool.begin().await.context(error::Database)?;
        Ok(Batch { tx })
    }

    pub async fn lookup_item(&self, pid: &str) -> Result<Option<ContentItem>> {
        let mut conn = self.pool.acquire().await.context(error::Database)?;
        queries::lookup_item(pid, &mut *conn).await
    }

    /// Committed history only. An empty set means the sub-asset was never delivered.
    pub async fn delivery_history_for(&self, asset: &SubAssetRef) -> Result<BTreeSet<i64>> {
        let mut conn = self.pool.acquire().await.context(error::Database)?;
        queries::delivery_history_for(asset, &mut *conn).await
    }

    pub async fn lookup_delivery(&self, action_id: i64) -> Result<Option<DeliveryRecord>> {
        let mut conn = self.pool.acquire().await.context(error::Database)?;
        queries::lookup_delivery(action_id, &mut *conn).await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Staged writes sharing one transaction. Reads through a batch see its own staged rows.
pub struct Batch {
    tx: Transaction<'static, Sqlite>,
}

impl Batch {
    /// Replace everything stored for `item.pid` with `item`, its sub-assets and its tags.
    pub async fn upsert_item(&mut self, item: &ContentItem) -> Result<()> {
        queries::upsert_item(item, &mut *self.tx).await
    }

    /// Append one ledger entry covering `assets` and return its action id.
    pub async fn record_delivery(
        &mut self,
        action_type: ActionType,
        assets: &[SubAssetRef],
    ) -> Result<i64> {
        queries::record_delivery(action_type, assets, &mut *self.tx).await
    }

    pub async fn delivery_history_for(&mut self, asset: &SubAssetRef) -> Result<BTreeSet<i64>> {
        queries::delivery_history_for(asset, &mut *self.tx).await
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await.context(error::Database)
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.context(error::Database)
    }
}
