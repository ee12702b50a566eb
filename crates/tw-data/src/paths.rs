//! Year/month path templates and input location resolution.

use std::path::{Path, PathBuf};

use tw_types::{config_error, TwResult};

use crate::blob::{ObjectStore, S3Uri};
use crate::loaders::fetch_to_cache;

/// Substitute `{year}`/`{year:04d}` and `{month}`/`{month:02d}` in `pattern`.
pub fn render_pattern(pattern: &str, year: i32, month: u32) -> String {
    pattern
        .replace("{year:04d}", &format!("{year:04}"))
        .replace("{month:02d}", &format!("{month:02}"))
        .replace("{year}", &year.to_string())
        .replace("{month}", &month.to_string())
}

/// A pattern is usable when it names both the year and the month.
pub fn validate_pattern(name: &str, pattern: &str) -> TwResult<()> {
    if pattern.trim().is_empty() {
        return Err(config_error!("{} is empty", name));
    }
    if !pattern.contains("{year") || !pattern.contains("{month") {
        return Err(config_error!(
            "{} must contain year and month placeholders: {}",
            name,
            pattern
        ));
    }
    Ok(())
}

/// Where a rendered path points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local(PathBuf),
    Http(String),
    S3(S3Uri),
}

impl Location {
    pub fn parse(raw: &str) -> TwResult<Self> {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            Ok(Self::Http(raw.to_string()))
        } else if raw.starts_with("s3://") {
            Ok(Self::S3(S3Uri::parse(raw).map_err(tw_types::DataError::from)?))
        } else {
            Ok(Self::Local(PathBuf::from(raw)))
        }
    }

    /// Local file to read for this location. Remote files are downloaded
    /// into `cache_dir` first.
    pub async fn fetch(&self, objects: &ObjectStore, cache_dir: &Path) -> TwResult<PathBuf> {
        match self {
            Self::Local(path) => Ok(path.clone()),
            Self::Http(url) => fetch_to_cache(url, cache_dir).await,
            Self::S3(uri) => Ok(objects.resolve(uri).map_err(tw_types::DataError::from)?),
        }
    }

    /// Local file to write for this location. For `s3://` targets the bucket
    /// is created when missing and the object is written in place.
    pub fn writable_path(&self, objects: &ObjectStore) -> TwResult<PathBuf> {
        match self {
            Self::Local(path) => Ok(path.clone()),
            Self::Http(url) => Err(config_error!("cannot write output to {}", url)),
            Self::S3(uri) => {
                if !objects.bucket_exists(&uri.bucket) {
                    objects.make_bucket(&uri.bucket).map_err(tw_types::DataError::from)?;
                }
                Ok(objects
                    .object_path(&uri.bucket, &uri.key)
                    .map_err(tw_types::DataError::from)?)
            }
        }
    }
}
