use std::time::Instant;

use log::debug;
use sqlx::{migrate::MigrateError, SqlitePool};

pub mod config;
pub mod model;
pub mod store;

pub async fn migrate(db: &SqlitePool) -> Result<(), MigrateError> {
    debug!("migration started");
    let t = Instant::now();
    sqlx::migrate!().run(db).await?;
    debug!("migration finished: {:?}", t.elapsed());
    Ok(())
}
