pub mod loader;
pub mod reader;
pub mod writer;

pub use loader::LdifLoader;
pub use reader::{parse_ldif, LdifRecord};
pub use writer::{write_entries, write_entry};

use crate::DirectoryError;
use percent_encoding::percent_decode_str;
use std::path::PathBuf;
use url::Url;

/// Turns a filesystem path or `file:` URL into a path.
///
/// `file:///abs/path` and `file://localhost/abs/path` are absolute. The
/// opaque form `file:relative/path` is resolved against the current
/// directory.
pub fn resolve_location(location: &str) -> crate::Result<PathBuf> {
    let location = location.trim();
    let Some(rest) = location.strip_prefix("file:") else {
        return Ok(PathBuf::from(location));
    };

    if !rest.starts_with('/') {
        let decoded = percent_decode_str(rest)
            .decode_utf8()
            .map_err(|e| invalid_location(location, e))?;
        return Ok(PathBuf::from(decoded.as_ref()));
    }

    let url = Url::parse(location).map_err(|e| invalid_location(location, e))?;
    url.to_file_path()
        .map_err(|_| invalid_location(location, "not a local file URL"))
}

fn invalid_location(location: &str, reason: impl std::fmt::Display) -> DirectoryError {
    DirectoryError::Config(format!("invalid LDIF location {}: {}", location, reason))
}
