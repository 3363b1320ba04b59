//! Price Table Cache
//!
//! Best-effort JSON snapshot of the price table so a restart can report
//! values before the streamer delivers fresh tickers. Callers log and skip
//! any failure.

use std::path::{Path, PathBuf};

use crate::domain::pricing::PriceTable;

/// Errors reading or writing the cache file.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// File could not be read or written.
    #[error("cache I/O failed for {}: {source}", path.display())]
    Io {
        /// Cache file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// File contents are not a price table.
    #[error("cache file {} is corrupt: {source}", path.display())]
    Corrupt {
        /// Cache file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// JSON file holding the last saved price table.
#[derive(Debug, Clone)]
pub struct PriceCache {
    path: PathBuf,
}

impl PriceCache {
    /// Cache stored at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Cache file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved table. A missing file yields an empty table.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub async fn load(&self) -> Result<PriceTable, CacheError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(PriceTable::new()),
            Err(source) => {
                return Err(CacheError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        serde_json::from_slice(&bytes).map_err(|source| CacheError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Save the table, replacing the previous snapshot.
    ///
    /// Written to a sibling `.tmp` file, then renamed over the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn store(&self, table: &PriceTable) -> Result<(), CacheError> {
        let json = serde_json::to_vec(table).map_err(|source| CacheError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|source| self.io_error(source))?;
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await.map_err(|source| self.io_error(source))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| self.io_error(source))
    }

    fn io_error(&self, source: std::io::Error) -> CacheError {
        CacheError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
