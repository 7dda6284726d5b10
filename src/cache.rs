use async_trait::async_trait;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug)]
pub enum CacheError {
    /// The key has no entry. This is ordinary control flow, not a failure;
    /// callers that see it fall through to certificate acquisition.
    Miss,
    Io(std::io::Error),
    /// The operation deadline elapsed before the cache answered.
    Timeout,
}

impl Display for CacheError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Miss => write!(f, "certificate cache miss"),
            CacheError::Io(e) => write!(f, "certificate cache I/O error: {e}"),
            CacheError::Timeout => write!(f, "certificate cache operation timed out"),
        }
    }
}

impl Error for CacheError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CacheError::Io(e) => e.source(),
            CacheError::Miss | CacheError::Timeout => None,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        CacheError::Io(e)
    }
}

/// Durable key→bytes store for encoded certificate bundles, keyed by
/// hostname. `get` distinguishes a genuine miss (`CacheError::Miss`) from
/// every other failure.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError>;
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

#[async_trait]
impl<C: Cache + ?Sized> Cache for Arc<C> {
    async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<(), CacheError> {
        (**self).put(key, data).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        (**self).delete(key).await
    }
}

/// Cache that stores nothing: every lookup misses, writes are dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopCache;

#[async_trait]
impl Cache for NopCache {
    async fn get(&self, _key: &str) -> Result<Vec<u8>, CacheError> {
        Err(CacheError::Miss)
    }

    async fn put(&self, _key: &str, _data: &[u8]) -> Result<(), CacheError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Directory-backed cache: one file per hostname, filename equals hostname.
#[derive(Debug, Clone)]
pub struct DirCache {
    directory: PathBuf,
}

impl DirCache {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.directory.join(key)
    }
}

#[async_trait]
impl Cache for DirCache {
    async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        match tokio::fs::read(self.entry_path(key)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(CacheError::Miss),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.directory).await?;
        tokio::fs::write(self.entry_path(key), data).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        match tokio::fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(()),
            // deleting an absent entry is not an error
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
