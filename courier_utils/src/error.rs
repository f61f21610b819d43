use snafu::Snafu;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
#[snafu(context(suffix(false)))]
pub enum Error {
    #[snafu(display("io: {source}"))]
    Io { source: std::io::Error },

    #[snafu(display("cannot replace file: {source}"))]
    Persist { source: tempfile::PersistError },
}
