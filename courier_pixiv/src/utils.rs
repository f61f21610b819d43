use url::Url;

use crate::{error, Result};

/// Last path segment of `url`, e.g. `92187206_p0.jpg`.
pub fn filename_from_url(url: &str) -> Result<String> {
    let filename = (|| -> Option<String> {
        Some(Url::parse(url).ok()?.path_segments()?.last()?.to_string())
    })();
    match filename {
        Some(filename) if !filename.is_empty() => Ok(filename),
        _ => Err(error::UnknownData {
            message: format!("cannot parse filename from url: {}", url),
        }
        .build()),
    }
}

/// Show only the start of a token in logs.
pub fn redact(token: &str) -> String {
    let head: String = token.chars().take(6).collect();
    format!("{head}…")
}
