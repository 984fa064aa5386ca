//! Bounded in-memory thumbnail cache.
//!
//! # Design
//!
//! - **Single owner**: the LRU store lives inside one actor task. Handles
//!   send commands over a channel, so reads and writes to the store are
//!   strictly serialized.
//! - **Off-actor generation**: decoding and scaling run on the blocking
//!   pool; the result comes back to the actor as a command.
//! - **Coalescing**: concurrent misses for the same key wait on a single
//!   generation.
//! - **Compact storage**: previews are stored as JPEG bytes.
//!
//! # Usage
//!
//! ```ignore
//! let cache = ThumbnailCache::spawn(2000);
//! let preview = cache.get(&file.identity(), file.media_type, 256).await;
//! ```

mod generate;

pub use generate::{encode_preview, generate_preview};

use lru::LruCache;
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, Span};

use crate::config::ThumbnailConfig;
use crate::model::{FileIdentity, MediaFile, MediaType};

/// Default maximum number of cached previews
pub const DEFAULT_CAPACITY: usize = 2000;

/// Encoded (JPEG) preview bytes, cheap to clone.
#[derive(Clone, PartialEq, Eq)]
pub struct Thumbnail(Arc<[u8]>);

impl Thumbnail {
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Thumbnail {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }
}

impl fmt::Debug for Thumbnail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thumbnail({} bytes)", self.0.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    identity: FileIdentity,
    target_size: u32,
}

type Reply = oneshot::Sender<Option<Thumbnail>>;

enum CacheCommand {
    Get {
        key: CacheKey,
        media_type: MediaType,
        reply: Reply,
    },
    Generated {
        key: CacheKey,
        thumbnail: Option<Thumbnail>,
    },
    Contains {
        key: CacheKey,
        reply: oneshot::Sender<bool>,
    },
    Len(oneshot::Sender<usize>),
    Clear,
}

/// Handle to the thumbnail cache actor. Clones share the same store.
#[derive(Clone)]
pub struct ThumbnailCache {
    tx: mpsc::Sender<CacheCommand>,
    capacity: usize,
}

impl ThumbnailCache {
    /// Start a cache actor holding at most `capacity` previews.
    ///
    /// Must be called from within a tokio runtime. The actor stops once
    /// every handle is dropped.
    pub fn spawn(capacity: usize) -> Self {
        Self::spawn_with_span(capacity, tracing::info_span!("thumbnail_cache"))
    }

    /// Start a cache actor that logs under the given span.
    pub fn spawn_with_span(capacity: usize, span: Span) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        let (tx, rx) = mpsc::channel(256);

        let actor = CacheActor {
            store: LruCache::new(capacity),
            pending: HashMap::new(),
            self_tx: tx.downgrade(),
        };
        tokio::spawn(actor.run(rx).instrument(span));

        Self {
            tx,
            capacity: capacity.get(),
        }
    }

    pub fn from_config(config: &ThumbnailConfig) -> Self {
        Self::spawn(config.capacity)
    }

    /// Get (or generate) a preview for a file.
    ///
    /// Returns `None` when no preview can be generated; failures are never
    /// cached.
    pub async fn get(
        &self,
        identity: &FileIdentity,
        media_type: MediaType,
        target_size: u32,
    ) -> Option<Thumbnail> {
        let (reply, rx) = oneshot::channel();
        let command = CacheCommand::Get {
            key: CacheKey {
                identity: identity.clone(),
                target_size,
            },
            media_type,
            reply,
        };
        self.tx.send(command).await.ok()?;
        rx.await.ok().flatten()
    }

    /// Convenience wrapper around [`get`](Self::get) for a scanned file.
    pub async fn get_for(&self, file: &MediaFile, target_size: u32) -> Option<Thumbnail> {
        self.get(&file.identity(), file.media_type, target_size).await
    }

    /// Whether a preview is stored, without touching recency.
    pub async fn contains(&self, identity: &FileIdentity, target_size: u32) -> bool {
        let (reply, rx) = oneshot::channel();
        let command = CacheCommand::Contains {
            key: CacheKey {
                identity: identity.clone(),
                target_size,
            },
            reply,
        };
        if self.tx.send(command).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Number of stored previews.
    pub async fn len(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(CacheCommand::Len(reply)).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every stored preview.
    pub async fn clear(&self) {
        let _ = self.tx.send(CacheCommand::Clear).await;
    }
}

/// Sole owner of the store.
struct CacheActor {
    store: LruCache<CacheKey, Thumbnail>,
    pending: HashMap<CacheKey, Vec<Reply>>,
    self_tx: mpsc::WeakSender<CacheCommand>,
}

impl CacheActor {
    async fn run(mut self, mut rx: mpsc::Receiver<CacheCommand>) {
        tracing::debug!(target: "thumbnail", capacity = self.store.cap().get(), "Thumbnail cache started");
        while let Some(command) = rx.recv().await {
            self.handle(command);
        }
        tracing::debug!(target: "thumbnail", "Thumbnail cache stopped");
    }

    fn handle(&mut self, command: CacheCommand) {
        match command {
            CacheCommand::Get {
                key,
                media_type,
                reply,
            } => self.get(key, media_type, reply),
            CacheCommand::Generated { key, thumbnail } => self.finish(key, thumbnail),
            CacheCommand::Contains { key, reply } => {
                let _ = reply.send(self.store.contains(&key));
            }
            CacheCommand::Len(reply) => {
                let _ = reply.send(self.store.len());
            }
            CacheCommand::Clear => self.store.clear(),
        }
    }

    fn get(&mut self, key: CacheKey, media_type: MediaType, reply: Reply) {
        if let Some(hit) = self.store.get(&key) {
            let _ = reply.send(Some(hit.clone()));
            return;
        }
        if let Some(waiters) = self.pending.get_mut(&key) {
            waiters.push(reply);
            return;
        }
        // Every handle is gone; nobody will read the result
        let Some(tx) = self.self_tx.upgrade() else {
            let _ = reply.send(None);
            return;
        };

        self.pending.insert(key.clone(), vec![reply]);
        tokio::spawn(
            async move {
                let path = key.identity.path.clone();
                let size = key.target_size;
                let thumbnail =
                    tokio::task::spawn_blocking(move || generate_preview(&path, media_type, size))
                        .await
                        .ok()
                        .flatten()
                        .map(Thumbnail::from);
                let _ = tx.send(CacheCommand::Generated { key, thumbnail }).await;
            }
            .in_current_span(),
        );
    }

    fn finish(&mut self, key: CacheKey, thumbnail: Option<Thumbnail>) {
        match &thumbnail {
            Some(preview) => {
                if let Some((evicted, _)) = self.store.push(key.clone(), preview.clone())
                    && evicted != key
                {
                    tracing::trace!(target: "thumbnail", path = %evicted.identity.path.display(), "Evicted preview");
                }
            }
            None => {
                tracing::debug!(target: "thumbnail", path = %key.identity.path.display(), "No preview available");
            }
        }
        for waiter in self.pending.remove(&key).unwrap_or_default() {
            let _ = waiter.send(thumbnail.clone());
        }
    }
}
