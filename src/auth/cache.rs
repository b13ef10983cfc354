use std::fs;
use std::path::{Path, PathBuf};

use super::provider::ConsumerIdentityProvider;
use crate::error::AuthError;
use crate::util::fs::write_atomic;

/// Single-file persistence for the provider-opaque consumer token cache.
///
/// Callers load the file into the provider before every cache access and
/// write it back only when the provider reports that its in-memory cache
/// changed. Writes go through a temp file and a rename, so a crash mid-save
/// leaves the previous blob intact.
///
/// # Example
/// ```no_run
/// use portcullis::auth::TokenCache;
///
/// let cache = TokenCache::new("/tmp/portcullis/consumer-cache.bin");
/// cache.save(b"{\"version\":1,\"accounts\":[]}")?;
/// assert!(cache.load()?.is_some());
/// # Ok::<(), portcullis::error::AuthError>(())
/// ```
#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<Vec<u8>>, AuthError> {
        match fs::read(&self.path) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(AuthError::Io(err.to_string())),
        }
    }

    pub fn save(&self, blob: &[u8]) -> Result<(), AuthError> {
        write_atomic(&self.path, blob)
    }

    pub fn clear(&self) -> Result<(), AuthError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AuthError::Io(err.to_string())),
        }
    }

    /// Hydrate the provider from disk. Returns whether a blob was found.
    ///
    /// An unreadable blob is discarded rather than failing the caller; the
    /// user simply has to sign in again.
    pub fn load_into(&self, provider: &dyn ConsumerIdentityProvider) -> Result<bool, AuthError> {
        let Some(blob) = self.load()? else {
            return Ok(false);
        };
        if let Err(err) = provider.import_cache(&blob) {
            tracing::warn!(
                path = %self.path.display(),
                error = %err,
                "Discarding unreadable token cache"
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Persist the provider cache if it changed since the last import/export.
    /// Returns whether a write happened.
    pub fn save_if_changed(
        &self,
        provider: &dyn ConsumerIdentityProvider,
    ) -> Result<bool, AuthError> {
        if !provider.has_state_changed() {
            return Ok(false);
        }
        let blob = provider.export_cache()?;
        self.save(&blob)?;
        tracing::debug!(path = %self.path.display(), bytes = blob.len(), "Token cache saved");
        Ok(true)
    }
}
