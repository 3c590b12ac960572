//! Path cache of the ray sharing method.
//!
//! Carriers entering the same face at the same point, within the entry
//! tolerance, along directions falling into the same bucket share the cell
//! sequence derived by the first of them. Entries are
//! written once and only read afterwards; the whole cache is dropped when the
//! mesh or the optical properties it was built against change.

use ahash::AHashMap;
use base::math::DVec3;
use mesh::{CellId, FaceId};
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, PoisonError, RwLock,
};

/// Quantised vector. Vectors whose components all round to the same
/// multiple of the bucket width share a bucket.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Bucket([i64; 3]);

impl Bucket {
    /// Bucket of `v` for the given width.
    pub fn of(v: DVec3, width: f64) -> Self {
        let q = (v / width).round();
        Self([q.x as i64, q.y as i64, q.z as i64])
    }
}

/// Where a cached segment ends.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SegmentExit {
    /// The segment leaves the domain through a boundary face.
    Domain(FaceId),
    /// The segment leaves the rank through `face` into `cell`, owned by
    /// `rank`.
    Rank {
        /// Face crossed.
        face: FaceId,
        /// First cell of the other rank.
        cell: CellId,
        /// Rank owning `cell`.
        rank: usize,
    },
}

/// Cell sequence traversed from an entry face until the carrier leaves the
/// domain or the rank.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Point the segment was derived from, on the entry face.
    pub entry: DVec3,
    /// Cells crossed with the path length inside each.
    pub steps: Vec<(CellId, f64)>,
    /// How the segment ends.
    pub exit: SegmentExit,
    /// Transmissivity of the whole segment.
    pub transmissivity: f64,
}

impl Segment {
    /// Total path length of the segment.
    pub fn length(&self) -> f64 { self.steps.iter().map(|(_, l)| l).sum() }
}

/// State a cache was filled against.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CacheStamp {
    /// Revision of the mesh.
    pub mesh_revision: u64,
    /// Epoch of the optical properties.
    pub optics_epoch: u64,
}

/// Counters of cache activity during one solve.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Probes answered from the cache.
    pub hits: u64,
    /// Probes not answered.
    pub misses: u64,
    /// Segments inserted.
    pub inserts: u64,
    /// Segments held at the end of the solve.
    pub entries: u64,
}

/// Entry face, entry point bucket and direction bucket.
type Key = (FaceId, Bucket, Bucket);

/// Per-rank store of derived segments.
#[derive(Debug)]
pub struct PathCache {
    width: f64,
    tolerance: f64,
    stamp: Option<CacheStamp>,
    segments: RwLock<AHashMap<Key, Arc<Segment>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
}

impl PathCache {
    /// Creates an empty cache with the given direction bucket width and entry
    /// point tolerance.
    pub fn new(width: f64, tolerance: f64) -> Self {
        Self {
            width,
            tolerance,
            stamp: None,
            segments: RwLock::new(AHashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
        }
    }

    /// Readies the cache for a solve against `stamp`: the counters are reset
    /// and the segments dropped if they were derived against another mesh or
    /// other optical properties. Returns whether segments were dropped.
    pub fn prepare(&mut self, stamp: CacheStamp) -> bool {
        *self.hits.get_mut() = 0;
        *self.misses.get_mut() = 0;
        *self.inserts.get_mut() = 0;
        let segments = self.segments.get_mut().unwrap_or_else(PoisonError::into_inner);
        let stale = self.stamp != Some(stamp) && !segments.is_empty();
        if stale {
            log::debug!(
                "Dropping {} cached segments built against {:?}",
                segments.len(),
                self.stamp
            );
            segments.clear();
        }
        self.stamp = Some(stamp);
        stale
    }

    fn key(&self, face: FaceId, entry: DVec3, direction: DVec3) -> Key {
        (face, Bucket::of(entry, self.tolerance), Bucket::of(direction, self.width))
    }

    /// Looks up the segment entering `face` at `entry` along `direction`.
    pub fn get(&self, face: FaceId, entry: DVec3, direction: DVec3) -> Option<Arc<Segment>> {
        let key = self.key(face, entry, direction);
        let found = self
            .segments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Inserts a segment unless one is already cached for the key; a
    /// concurrent duplicate derived the same geometry and is discarded.
    pub fn insert(&self, face: FaceId, direction: DVec3, segment: Segment) -> bool {
        let key = self.key(face, segment.entry, direction);
        let mut segments = self.segments.write().unwrap_or_else(PoisonError::into_inner);
        if segments.contains_key(&key) {
            return false;
        }
        segments.insert(key, Arc::new(segment));
        self.inserts.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Number of cached segments.
    pub fn len(&self) -> usize { self.segments.read().unwrap_or_else(PoisonError::into_inner).len() }

    /// Whether the cache holds no segment.
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Activity since the last [`PathCache::prepare`].
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            entries: self.len() as u64,
        }
    }
}
