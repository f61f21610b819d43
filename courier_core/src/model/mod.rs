use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt};

/// Creator id the platform reports for deleted or hidden works.
pub const HIDDEN_CREATOR_ID: &str = "0";

/// Content sensitivity tier, stored as its discriminant.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Policy {
    Normal = 0,
    /// R-18
    RestrictedA = 1,
    /// R-18G
    RestrictedB = 2,
}

impl Policy {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Policy::Normal),
            1 => Some(Policy::RestrictedA),
            2 => Some(Policy::RestrictedB),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        self as i64
    }
}

/// Address of one sub-asset: the item's pid and the zero-based page index.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubAssetRef {
    pub pid: String,
    pub index: u32,
}

impl fmt::Display for SubAssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.pid, self.index)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct SubAsset {
    pub pid: String,
    pub index: u32,
    pub download_url: String,
    /// Copied from the parent: its creator id is not [`HIDDEN_CREATOR_ID`].
    pub public: bool,
}

impl SubAsset {
    pub fn key(&self) -> SubAssetRef {
        SubAssetRef {
            pid: self.pid.clone(),
            index: self.index,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ContentItem {
    pub pid: String,
    pub uid: String,
    pub source_url: String,
    pub policy: Policy,
    pub tags: BTreeSet<String>,
    /// Ordered by index, starting at 0.
    pub assets: Vec<SubAsset>,
}

impl ContentItem {
    /// Builds an item with one sub-asset per url, indexed in the given order.
    pub fn new(
        pid: impl Into<String>,
        uid: impl Into<String>,
        source_url: impl Into<String>,
        policy: Policy,
        tags: impl IntoIterator<Item = String>,
        download_urls: impl IntoIterator<Item = String>,
    ) -> Self {
        let pid = pid.into();
        let uid = uid.into();
        let public = uid != HIDDEN_CREATOR_ID;
        let assets = download_urls
            .into_iter()
            .enumerate()
            .map(|(i, download_url)| SubAsset {
                pid: pid.clone(),
                index: i as u32,
                download_url,
                public,
            })
            .collect();
        Self {
            source_url: source_url.into(),
            tags: tags.into_iter().collect(),
            pid,
            uid,
            policy,
            assets,
        }
    }

    pub fn is_public(&self) -> bool {
        self.uid != HIDDEN_CREATOR_ID
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum ActionType {
    BookmarkBatchDelivered = 0,
}

impl ActionType {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ActionType::BookmarkBatchDelivered),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        self as i64
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub action_id: i64,
    pub action_type: ActionType,
    pub delivered_at: DateTime<Utc>,
    pub assets: Vec<SubAssetRef>,
}
