//! Time-bounded cache of the server's primitives.
//!
//! There is only ever one live connection, so the cache holds a single
//! snapshot that is replaced wholesale on refresh and dropped wholesale when
//! the connection changes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tether_protocol::Primitive;
use tokio::time::Instant;
use tracing::debug;

/// Primitives fetched from the server at one point in time. Never mutated.
#[derive(Debug, Clone)]
pub struct PrimitivesSnapshot {
    primitives: Vec<Primitive>,
    fetched_at: DateTime<Utc>,
    fetched: Instant,
}

impl PrimitivesSnapshot {
    /// Snapshot `primitives` as of now
    #[must_use]
    pub fn new(primitives: Vec<Primitive>) -> Self {
        Self {
            primitives,
            fetched_at: Utc::now(),
            fetched: Instant::now(),
        }
    }

    /// Primitives in server order
    #[must_use]
    pub fn primitives(&self) -> &[Primitive] {
        &self.primitives
    }

    /// Wall-clock time of the fetch
    #[must_use]
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// Tools only
    pub fn tools(&self) -> impl Iterator<Item = &Primitive> {
        self.primitives
            .iter()
            .filter(|p| matches!(p, Primitive::Tool(_)))
    }

    /// Looks a primitive up by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Primitive> {
        self.primitives.iter().find(|p| p.name() == name)
    }

    /// Number of primitives
    #[must_use]
    pub fn len(&self) -> usize {
        self.primitives.len()
    }

    /// Returns `true` if the server advertised nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }

    fn age(&self) -> Duration {
        self.fetched.elapsed()
    }
}

/// Single-entry TTL cache.
#[derive(Debug)]
pub struct PrimitivesCache {
    ttl: Duration,
    current: Option<Arc<PrimitivesSnapshot>>,
}

impl PrimitivesCache {
    /// Create an empty cache whose entries live for `ttl`
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, current: None }
    }

    /// Returns the cached snapshot if it is fresh and `force_refresh` is unset.
    #[must_use]
    pub fn get(&self, force_refresh: bool) -> Option<Arc<PrimitivesSnapshot>> {
        if force_refresh {
            debug!("Primitives refresh forced");
            return None;
        }
        match &self.current {
            Some(snapshot) if snapshot.age() < self.ttl => {
                debug!(count = snapshot.len(), "Primitives cache hit");
                Some(Arc::clone(snapshot))
            }
            Some(_) => {
                debug!("Primitives cache expired");
                None
            }
            None => {
                debug!("Primitives cache miss");
                None
            }
        }
    }

    /// Replace the cached snapshot.
    pub fn store(&mut self, snapshot: Arc<PrimitivesSnapshot>) {
        self.current = Some(snapshot);
    }

    /// Drop the cached snapshot.
    pub fn invalidate(&mut self) {
        if self.current.take().is_some() {
            debug!("Primitives cache invalidated");
        }
    }
}
