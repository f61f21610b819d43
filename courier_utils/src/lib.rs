use snafu::ResultExt;
use std::{io::Write, path::Path};
use tempfile::NamedTempFile;

mod backoff;
mod shutdown;

pub mod error;

pub use backoff::Backoff;
pub use shutdown::{Shutdown, ShutdownTrigger};
pub(crate) type Result<T> = std::result::Result<T, error::Error>;

/// Replace the file at `path` with `contents`.
///
/// The data is written to a temporary file in the same directory and renamed over the
/// target, so readers see either the old file or the new one, never a partial write.
pub fn write_atomic(path: impl AsRef<Path>, contents: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).context(error::Io)?;

    let mut tmp = NamedTempFile::new_in(dir).context(error::Io)?;
    tmp.write_all(contents).context(error::Io)?;
    tmp.as_file().sync_all().context(error::Io)?;
    tmp.persist(path).context(error::Persist)?;
    Ok(())
}

#[macro_export]
macro_rules! try_skip {
    ($res:expr) => {
        match $res {
            Ok(val) => val,
            Err(e) => {
                warn!("{}", e);
                continue;
            }
        }
    };
}
