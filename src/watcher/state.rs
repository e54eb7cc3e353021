//! File states and the collaborators that produce them.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::BoxError;
use super::identifier::FileIdentifier;

/// One historical snapshot of a watched file.
///
/// Readers receive `Arc<FileState<C>>`. The history store holds the owning
/// reference; once a state is evicted and the last reader drops its handle,
/// the content is dropped exactly once.
#[derive(Debug)]
pub struct FileState<C> {
    identifier: FileIdentifier,
    key: String,
    modified_at: DateTime<Utc>,
    content: C,
}

impl<C> FileState<C> {
    /// Create a new state.
    #[must_use]
    pub fn new(
        identifier: FileIdentifier,
        key: String,
        modified_at: DateTime<Utc>,
        content: C,
    ) -> Self {
        Self {
            identifier,
            key,
            modified_at,
            content,
        }
    }

    /// File this state belongs to.
    #[must_use]
    pub fn identifier(&self) -> &FileIdentifier {
        &self.identifier
    }

    /// Version key produced by the key deriver.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Last-modified timestamp observed when the state was loaded.
    #[must_use]
    pub fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }

    /// Loaded content.
    #[must_use]
    pub fn content(&self) -> &C {
        &self.content
    }
}

/// Loads the content of a file. Called once per detected change.
///
/// Implemented for async closures `Fn(PathBuf) -> impl Future<Output = Result<C, E>>`.
#[async_trait]
pub trait ContentLoader<C>: Send + Sync {
    /// Load the file at `path`.
    async fn load(&self, path: &Path) -> Result<C, BoxError>;
}

#[async_trait]
impl<C, F, Fut, E> ContentLoader<C> for F
where
    C: Send + 'static,
    F: Fn(PathBuf) -> Fut + Send + Sync,
    Fut: Future<Output = Result<C, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    async fn load(&self, path: &Path) -> Result<C, BoxError> {
        (self)(path.to_path_buf()).await.map_err(Into::into)
    }
}

/// Derives the version key of freshly loaded content.
///
/// Keys must be unique within one file's history; a repeated key replaces
/// the older state. Implemented for `Fn(&Path, &C) -> Result<String, E>`.
#[async_trait]
pub trait KeyDeriver<C>: Send + Sync {
    /// Derive the key for `content` loaded from `path`.
    async fn derive_key(&self, path: &Path, content: &C) -> Result<String, BoxError>;
}

#[async_trait]
impl<C, F, E> KeyDeriver<C> for F
where
    C: Sync,
    F: Fn(&Path, &C) -> Result<String, E> + Send + Sync,
    E: Into<BoxError> + 'static,
{
    async fn derive_key(&self, path: &Path, content: &C) -> Result<String, BoxError> {
        (self)(path, content).map_err(Into::into)
    }
}

/// Registration parameters for one watched file.
pub struct WatchParameters<C> {
    path: PathBuf,
    depth: usize,
    loader: Arc<dyn ContentLoader<C>>,
    key_deriver: Arc<dyn KeyDeriver<C>>,
}

impl<C> WatchParameters<C> {
    /// Create parameters for `path`, keeping at most `depth` states.
    ///
    /// Depth is validated when the file is registered, not here.
    #[must_use]
    pub fn new(
        path: impl Into<PathBuf>,
        depth: usize,
        loader: impl ContentLoader<C> + 'static,
        key_deriver: impl KeyDeriver<C> + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            depth,
            loader: Arc::new(loader),
            key_deriver: Arc::new(key_deriver),
        }
    }

    /// Path as given by the caller.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Maximum number of retained states.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Identifier derived from the path.
    #[must_use]
    pub fn identifier(&self) -> FileIdentifier {
        FileIdentifier::new(&self.path)
    }

    pub(crate) fn loader(&self) -> &dyn ContentLoader<C> {
        self.loader.as_ref()
    }

    pub(crate) fn key_deriver(&self) -> &dyn KeyDeriver<C> {
        self.key_deriver.as_ref()
    }
}

impl<C> Clone for WatchParameters<C> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            depth: self.depth,
            loader: Arc::clone(&self.loader),
            key_deriver: Arc::clone(&self.key_deriver),
        }
    }
}

impl<C> fmt::Debug for WatchParameters<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchParameters")
            .field("path", &self.path)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}
