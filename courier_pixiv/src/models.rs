//! Feed items as pixiv sends them, and their conversion into [`ContentItem`]s.

use courier_core::model::{ContentItem, Policy};
use pixivcrab::models::illust::Illust;
use serde_json::Value;

use crate::{error, utils::filename_from_url, Result};

/// How an item lays out its downloadable pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetLayout {
    Single(String),
    Multi(Vec<String>),
}

impl AssetLayout {
    pub fn into_urls(self) -> Vec<String> {
        match self {
            AssetLayout::Single(url) => vec![url],
            AssetLayout::Multi(urls) => urls,
        }
    }
}

fn unknown<T>(message: String) -> Result<T> {
    error::UnknownData { message }.fail()
}

fn layout(illust: Illust) -> Result<AssetLayout> {
    let pid = illust.id;
    if illust.page_count <= 1 {
        return match illust.meta_single_page.original_image_url {
            Some(url) => Ok(AssetLayout::Single(url)),
            None => unknown(format!("no original url for {pid}")),
        };
    }
    let mut urls = Vec::with_capacity(illust.meta_pages.len());
    for (i, page) in illust.meta_pages.into_iter().enumerate() {
        match page.image_urls.original {
            Some(url) => urls.push(url),
            None => return unknown(format!("no original url for page {i} of {pid}")),
        }
    }
    if urls.is_empty() {
        return unknown(format!("no pages for {pid}"));
    }
    Ok(AssetLayout::Multi(urls))
}

/// The pid of a raw item, read without parsing the rest of it.
pub fn raw_pid(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// The artwork page for `pid`.
pub fn source_url(pid: &str) -> String {
    format!("https://www.pixiv.net/artworks/{pid}")
}

/// Parse one raw feed item.
///
/// `Ok(None)` is an item kind this watcher does not deliver (novels, ugoira). An `Err`
/// is a malformed item.
pub fn parse_item(value: Value) -> Result<Option<ContentItem>> {
    match value.get("type").and_then(Value::as_str) {
        Some("illust") | Some("manga") => {}
        Some(_) => return Ok(None),
        None => return unknown(format!("item without type: {}", value)),
    }
    let illust: Illust = match serde_json::from_value(value) {
        Ok(illust) => illust,
        Err(e) => return unknown(format!("malformed illust: {e}")),
    };
    if illust.id == 0 {
        return unknown("illust without id".to_string());
    }
    let pid = illust.id.to_string();
    if !illust.visible {
        return unknown(format!("illust {pid} is invisible"));
    }
    let policy = match Policy::from_code(illust.x_restrict.into()) {
        Some(p) => p,
        None => return unknown(format!("unknown x_restrict {} for {pid}", illust.x_restrict)),
    };
    let uid = illust.user.id.to_string();
    let tags: Vec<String> = illust
        .tags
        .iter()
        .map(|t| t.name.clone())
        .filter(|t| !t.is_empty())
        .collect();

    let urls = layout(illust)?.into_urls();
    // The cache path is derived from the basename; refuse urls that have none.
    for url in &urls {
        filename_from_url(url)?;
    }

    Ok(Some(ContentItem::new(
        pid.clone(),
        uid,
        source_url(&pid),
        policy,
        tags,
        urls,
    )))
}
