//! Hands a batch of sub-assets to whatever relays them to chat groups.

use async_trait::async_trait;
use courier_core::{config::GatewayConfig, model::SubAssetRef};
use log::debug;
use reqwest::Client;
use serde::Serialize;
use snafu::ResultExt;
use std::path::PathBuf;

use crate::{error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingAsset {
    pub pid: String,
    pub index: u32,
    pub source_url: String,
    pub download_url: String,
    /// `None` for assets of hidden creators, which are sent as a link only.
    pub local_path: Option<PathBuf>,
}

impl OutgoingAsset {
    pub fn key(&self) -> SubAssetRef {
        SubAssetRef {
            pid: self.pid.clone(),
            index: self.index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgement {
    Delivered,
    Refused { reason: String },
}

#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn deliver(&self, assets: &[OutgoingAsset]) -> Result<Acknowledgement>;
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    groups: &'a [i64],
    assets: &'a [OutgoingAsset],
}

/// POSTs each batch as JSON; any 2xx answer counts as delivered.
pub struct WebhookGateway {
    client: Client,
    url: String,
    groups: Vec<i64>,
}

impl WebhookGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        if config.webhook_url.is_empty() {
            return error::Gateway {
                message: "gateway.webhook_url is not set",
            }
            .fail();
        }
        Ok(Self {
            client: Client::builder().build().context(error::Http)?,
            url: config.webhook_url.clone(),
            groups: config.groups.clone(),
        })
    }
}

#[async_trait]
impl NotificationGateway for WebhookGateway {
    async fn deliver(&self, assets: &[OutgoingAsset]) -> Result<Acknowledgement> {
        debug!("posting {} assets to {}", assets.len(), self.url);
        let resp = self
            .client
            .post(&self.url)
            .json(&WebhookPayload {
                groups: &self.groups,
                assets,
            })
            .send()
            .await
            .context(error::Http)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(Acknowledgement::Delivered);
        }
        let text = resp.text().await.unwrap_or_default();
        Ok(Acknowledgement::Refused {
            reason: format!("{status}: {text}"),
        })
    }
}
