//! Directory-backed object store with S3-style buckets and keys.
//!
//! A bucket is a directory under the store root; an object key maps to a
//! relative path inside it. `s3://bucket/key` uris resolve against the
//! same layout.

use chrono::Month;
use std::path::{Component, Path, PathBuf};
use tracing::info;

use tw_types::BlobError;

pub type BlobResult<T> = Result<T, BlobError>;

fn io_err(e: std::io::Error) -> BlobError {
    BlobError::Io { message: e.to_string() }
}

/// `s3://bucket/key`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Uri {
    pub bucket: String,
    pub key: String,
}

impl S3Uri {
    pub fn parse(uri: &str) -> BlobResult<Self> {
        let invalid = || BlobError::InvalidUri { uri: uri.to_string() };
        let rest = uri.strip_prefix("s3://").ok_or_else(invalid)?;
        let (bucket, key) = rest.split_once('/').ok_or_else(invalid)?;
        if bucket.is_empty() || key.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

impl std::fmt::Display for S3Uri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Object key `{year}/{MonthName}/{file}` used for uploaded predictions.
pub fn month_key(year: i32, month: u32, file_name: &str) -> String {
    let month_name = u8::try_from(month)
        .ok()
        .and_then(|m| Month::try_from(m).ok())
        .map(|m| m.name().to_string())
        .unwrap_or_else(|| format!("{month:02}"));
    format!("{year}/{month_name}/{file_name}")
}

fn validate_bucket(bucket: &str) -> BlobResult<()> {
    let valid_chars = bucket
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    let edges_ok = bucket
        .chars()
        .next()
        .zip(bucket.chars().last())
        .is_some_and(|(a, b)| a.is_ascii_alphanumeric() && b.is_ascii_alphanumeric());
    if (3..=63).contains(&bucket.len()) && valid_chars && edges_ok {
        Ok(())
    } else {
        Err(BlobError::InvalidBucketName {
            bucket: bucket.to_string(),
        })
    }
}

fn key_path(bucket: &str, key: &str) -> BlobResult<PathBuf> {
    let rel = Path::new(key);
    let clean = !key.is_empty() && rel.components().all(|c| matches!(c, Component::Normal(_)));
    if !clean {
        return Err(BlobError::InvalidUri {
            uri: format!("s3://{bucket}/{key}"),
        });
    }
    Ok(rel.to_path_buf())
}

#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    pub fn new<P: AsRef<Path>>(root: P) -> BlobResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(io_err)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    pub fn bucket_exists(&self, bucket: &str) -> bool {
        self.bucket_dir(bucket).is_dir()
    }

    pub fn make_bucket(&self, bucket: &str) -> BlobResult<()> {
        validate_bucket(bucket)?;
        std::fs::create_dir_all(self.bucket_dir(bucket)).map_err(io_err)?;
        info!("Created bucket {}", bucket);
        Ok(())
    }

    /// Local path of an object; the object need not exist.
    pub fn object_path(&self, bucket: &str, key: &str) -> BlobResult<PathBuf> {
        validate_bucket(bucket)?;
        Ok(self.bucket_dir(bucket).join(key_path(bucket, key)?))
    }

    /// Existing object addressed by an `s3://` uri.
    pub fn resolve(&self, uri: &S3Uri) -> BlobResult<PathBuf> {
        if !self.bucket_exists(&uri.bucket) {
            return Err(BlobError::NoSuchBucket {
                bucket: uri.bucket.clone(),
            });
        }
        let path = self.object_path(&uri.bucket, &uri.key)?;
        if !path.is_file() {
            return Err(BlobError::NoSuchKey {
                bucket: uri.bucket.clone(),
                key: uri.key.clone(),
            });
        }
        Ok(path)
    }

    /// Copy a local file into `bucket` under `key`.
    pub fn put_object<P: AsRef<Path>>(&self, bucket: &str, key: &str, file: P) -> BlobResult<PathBuf> {
        if !self.bucket_exists(bucket) {
            return Err(BlobError::NoSuchBucket {
                bucket: bucket.to_string(),
            });
        }
        let dest = self.object_path(bucket, key)?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let bytes = std::fs::copy(file.as_ref(), &dest).map_err(io_err)?;
        info!("Uploaded {} bytes to s3://{}/{}", bytes, bucket, key);
        Ok(dest)
    }

    pub fn get_object(&self, bucket: &str, key: &str) -> BlobResult<Vec<u8>> {
        let path = self.resolve(&S3Uri {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })?;
        std::fs::read(path).map_err(io_err)
    }

    /// Keys in `bucket` starting with `prefix`, sorted.
    pub fn list_objects(&self, bucket: &str, prefix: &str) -> BlobResult<Vec<String>> {
        if !self.bucket_exists(bucket) {
            return Err(BlobError::NoSuchBucket {
                bucket: bucket.to_string(),
            });
        }
        let mut keys = Vec::new();
        let mut pending = vec![self.bucket_dir(bucket)];
        while let Some(dir) = pending.pop() {
            for entry in std::fs::read_dir(&dir).map_err(io_err)? {
                let path = entry.map_err(io_err)?.path();
                if path.is_dir() {
                    pending.push(path);
                } else if let Ok(rel) = path.strip_prefix(self.bucket_dir(bucket)) {
                    let key = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("/");
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_s3_uris() {
        let uri = S3Uri::parse("s3://best-practices/predictions_03_2023.parquet").unwrap();
        assert_eq!(uri.bucket, "best-practices");
        assert_eq!(uri.key, "predictions_03_2023.parquet");
        assert_eq!(uri.to_string(), "s3://best-practices/predictions_03_2023.parquet");
        assert!(S3Uri::parse("s3://bucket-only").is_err());
        assert!(S3Uri::parse("/tmp/file").is_err());
    }

    #[test]
    fn month_keys() {
        assert_eq!(month_key(2023, 3, "out.parquet"), "2023/March/out.parquet");
        assert_eq!(month_key(2024, 12, "x"), "2024/December/x");
    }

    #[test]
    fn bucket_lifecycle_and_objects() {
        let dir = tempdir().unwrap();
        let store = ObjectStore::new(dir.path()).unwrap();
        let local = dir.path().join("local.parquet");
        std::fs::write(&local, b"rows").unwrap();

        assert!(!store.bucket_exists("batch-predictions"));
        assert!(matches!(
            store.put_object("batch-predictions", "k", &local),
            Err(BlobError::NoSuchBucket { .. })
        ));

        store.make_bucket("batch-predictions").unwrap();
        assert!(store.bucket_exists("batch-predictions"));

        let key = month_key(2023, 3, "local.parquet");
        store.put_object("batch-predictions", &key, &local).unwrap();
        assert_eq!(store.get_object("batch-predictions", &key).unwrap(), b"rows");
        assert_eq!(
            store.list_objects("batch-predictions", "2023/").unwrap(),
            vec!["2023/March/local.parquet".to_string()]
        );
        assert!(matches!(
            store.get_object("batch-predictions", "missing"),
            Err(BlobError::NoSuchKey { .. })
        ));
    }

    #[test]
    fn rejects_bad_names_and_keys() {
        let dir = tempdir().unwrap();
        let store = ObjectStore::new(dir.path()).unwrap();
        assert!(store.make_bucket("Bad_Bucket").is_err());
        assert!(store.make_bucket("ab").is_err());
        assert!(store.object_path("good-bucket", "../escape").is_err());
    }
}
