use chrono::{DateTime, Utc};
use snafu::ResultExt;
use sqlx::{query, query_as, query_scalar, SqliteConnection};
use std::collections::BTreeSet;

use super::{error, Result};
use crate::model::{ActionType, ContentItem, DeliveryRecord, Policy, SubAsset, SubAssetRef};

pub(super) async fn delete_item(pid: &str, conn: &mut SqliteConnection) -> Result<()> {
    query("delete from record where pid = ?")
        .bind(pid)
        .execute(&mut *conn)
        .await
        .context(error::Database)?;
    query("delete from record_tag where pid = ?")
        .bind(pid)
        .execute(&mut *conn)
        .await
        .context(error::Database)?;
    Ok(())
}

/// Full replace: every row of `item.pid` is dropped before the new ones go in.
pub(super) async fn upsert_item(item: &ContentItem, conn: &mut SqliteConnection) -> Result<()> {
    delete_item(&item.pid, conn).await?;

    for asset in &item.assets {
        query(
            "
            insert into record (pid, idx, uid, policy, source_url, download_url)
            values (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&item.pid)
        .bind(i64::from(asset.index))
        .bind(&item.uid)
        .bind(item.policy.code())
        .bind(&item.source_url)
        .bind(&asset.download_url)
        .execute(&mut *conn)
        .await
        .context(error::Database)?;
    }

    for tag in &item.tags {
        query("insert or ignore into record_tag (pid, tag) values (?, ?)")
            .bind(&item.pid)
            .bind(tag)
            .execute(&mut *conn)
            .await
            .context(error::Database)?;
    }
    Ok(())
}

pub(super) async fn lookup_item(pid: &str, conn: &mut SqliteConnection) -> Result<Option<ContentItem>> {
    let rows: Vec<(i64, String, i64, String, String)> = query_as(
        "
        select idx, uid, policy, source_url, download_url
        from record
        where pid = ?
        order by idx
        ",
    )
    .bind(pid)
    .fetch_all(&mut *conn)
    .await
    .context(error::Database)?;

    let (uid, policy, source_url) = match rows.first() {
        Some((_, uid, policy, source_url, _)) => (uid.clone(), *policy, source_url.clone()),
        None => return Ok(None),
    };
    let policy = Policy::from_code(policy).ok_or_else(|| {
        error::CorruptRow {
            message: format!("unknown policy {policy} for {pid}"),
        }
        .build()
    })?;
    let public = uid != crate::model::HIDDEN_CREATOR_ID;

    let mut assets = Vec::with_capacity(rows.len());
    for (idx, _, _, _, download_url) in rows {
        let index = u32::try_from(idx).map_err(|_| {
            error::CorruptRow {
                message: format!("negative index {idx} for {pid}"),
            }
            .build()
        })?;
        assets.push(SubAsset {
            pid: pid.to_string(),
            index,
            download_url,
            public,
        });
    }

    let tags: Vec<String> = query_scalar("select tag from record_tag where pid = ?")
        .bind(pid)
        .fetch_all(&mut *conn)
        .await
        .context(error::Database)?;

    Ok(Some(ContentItem {
        pid: pid.to_string(),
        uid,
        source_url,
        policy,
        tags: tags.into_iter().collect(),
        assets,
    }))
}

pub(super) async fn record_delivery(
    action_type: ActionType,
    assets: &[SubAssetRef],
    conn: &mut SqliteConnection,
) -> Result<i64> {
    let action_id = query("insert into history (action_type, delivered_at) values (?, ?)")
        .bind(action_type.code())
        .bind(Utc::now())
        .execute(&mut *conn)
        .await
        .context(error::Database)?
        .last_insert_rowid();

    for (position, asset) in assets.iter().enumerate() {
        query(
            "
            insert or ignore into history_detail (action_id, pid, idx, position)
            values (?, ?, ?, ?)
            ",
        )
        .bind(action_id)
        .bind(&asset.pid)
        .bind(i64::from(asset.index))
        .bind(position as i64)
        .execute(&mut *conn)
        .await
        .context(error::Database)?;
    }
    Ok(action_id)
}

pub(super) async fn delivery_history_for(
    asset: &SubAssetRef,
    conn: &mut SqliteConnection,
) -> Result<BTreeSet<i64>> {
    let ids: Vec<i64> = query_scalar(
        "
        select action_id from history_detail
        where pid = ? and idx = ?
        ",
    )
    .bind(&asset.pid)
    .bind(i64::from(asset.index))
    .fetch_all(&mut *conn)
    .await
    .context(error::Database)?;
    Ok(ids.into_iter().collect())
}

pub(super) async fn lookup_delivery(
    action_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<DeliveryRecord>> {
    let row: Option<(i64, DateTime<Utc>)> =
        query_as("select action_type, delivered_at from history where action_id = ?")
            .bind(action_id)
            .fetch_optional(&mut *conn)
            .await
            .context(error::Database)?;
    let (action_type, delivered_at) = match row {
        Some(row) => row,
        None => return Ok(None),
    };
    let action_type = ActionType::from_code(action_type).ok_or_else(|| {
        error::CorruptRow {
            message: format!("unknown action type {action_type} for action {action_id}"),
        }
        .build()
    })?;

    let details: Vec<(String, i64)> = query_as(
        "
        select pid, idx from history_detail
        where action_id = ?
        order by position
        ",
    )
    .bind(action_id)
    .fetch_all(&mut *conn)
    .await
    .context(error::Database)?;

    let mut assets = Vec::with_capacity(details.len());
    for (pid, idx) in details {
        let index = u32::try_from(idx).map_err(|_| {
            error::CorruptRow {
                message: format!("negative index {idx} in action {action_id}"),
            }
            .build()
        })?;
        assets.push(SubAssetRef { pid, index });
    }

    Ok(Some(DeliveryRecord {
        action_id,
        action_type,
        delivered_at,
        assets,
    }))
}
