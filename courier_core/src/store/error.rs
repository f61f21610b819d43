use snafu::Snafu;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
#[snafu(context(suffix(false)))]
pub enum Error {
    #[snafu(display("database: {source}"))]
    Database { source: sqlx::Error },

    #[snafu(display("database migration: {source}"))]
    Migrate { source: sqlx::migrate::MigrateError },

    #[snafu(display("cannot create store directory: {source}"))]
    StoreDir { source: std::io::Error },

    #[snafu(display("corrupt row: {message}"))]
    CorruptRow { message: String },
}
