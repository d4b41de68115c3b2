//! Byte-range cache for one versioned file.
//!
//! Cached extents are filed under the version that produced them. A lookup
//! for version `V` only ever sees bytes filed under `V`, so data from a
//! superseded version is never returned as current. Mutations do not edit a
//! version's extents in place: they derive the new version's extent map from
//! the predecessor's (copy, truncate or share) and then apply the change.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use celfs_config::log_cache_debug;
use celfs_object::{Extent, VersionId};
use tracing::field::display;
use tracing::instrument;

use crate::error::Result;

/// Bytes fetched by a loader together with the version they belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loaded {
    pub version: VersionId,
    pub data: Vec<u8>,
}

/// Result of a cache read. `data` starts at `start` and may be shorter than
/// requested at end of file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtentRead {
    pub version: VersionId,
    pub start: u64,
    pub data: Vec<u8>,
}

/// Non-overlapping, non-empty segments keyed by start offset.
#[derive(Debug, Clone, Default)]
struct ExtentMap {
    segments: BTreeMap<u64, Arc<[u8]>>,
}

impl ExtentMap {
    fn insert(&mut self, start: u64, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.punch(start, start.saturating_add(data.len() as u64));
        self.segments.insert(start, Arc::from(data));
    }

    /// Remove `[start, end)`, keeping the parts of segments outside it.
    fn punch(&mut self, start: u64, end: u64) {
        if start >= end {
            return;
        }
        let overlapping: Vec<u64> = self
            .segments
            .range(..end)
            .rev()
            .take_while(|(s, buf)| **s + buf.len() as u64 > start)
            .map(|(s, _)| *s)
            .collect();

        for seg_start in overlapping {
            let Some(buf) = self.segments.remove(&seg_start) else {
                continue;
            };
            let seg_end = seg_start + buf.len() as u64;
            if seg_start < start {
                let head = &buf[..(start - seg_start) as usize];
                self.segments.insert(seg_start, Arc::from(head));
            }
            if seg_end > end {
                let tail = &buf[(end - seg_start) as usize..];
                self.segments.insert(end, Arc::from(tail));
            }
        }
    }

    fn truncate(&mut self, length: u64) {
        let _dropped = self.segments.split_off(&length);
        if let Some((start, buf)) = self.segments.iter_mut().next_back() {
            let keep = (length - *start) as usize;
            if buf.len() > keep {
                *buf = Arc::from(&buf[..keep]);
            }
        }
    }

    /// Bytes cached contiguously from `extent.start`, up to `extent.end`.
    fn contiguous_from(&self, extent: Extent) -> Vec<u8> {
        let mut out = Vec::new();
        let mut pos = extent.start;
        while pos < extent.end {
            let Some((&seg_start, buf)) = self.segments.range(..=pos).next_back() else {
                break;
            };
            let seg_end = seg_start + buf.len() as u64;
            if seg_end <= pos {
                break;
            }
            let stop = seg_end.min(extent.end);
            out.extend_from_slice(&buf[(pos - seg_start) as usize..(stop - seg_start) as usize]);
            pos = stop;
        }
        out
    }

    fn cached_bytes(&self) -> u64 {
        self.segments.values().map(|b| b.len() as u64).sum()
    }
}

#[derive(Debug, Default)]
struct CacheState {
    enabled: bool,
    /// Versions in the order their maps were created.
    order: Vec<VersionId>,
    maps: HashMap<VersionId, ExtentMap>,
}

impl CacheState {
    /// Map for `version`, created from `base` if absent.
    fn install(&mut self, version: VersionId, base: impl FnOnce() -> ExtentMap) -> &mut ExtentMap {
        if !self.maps.contains_key(&version) {
            self.order.push(version);
        }
        self.maps.entry(version).or_insert_with(base)
    }

    fn derived_from(&self, old: Option<&VersionId>) -> ExtentMap {
        old.and_then(|v| self.maps.get(v)).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct CacheStats {
    reads: AtomicU64,
    read_aheads: AtomicU64,
    cache_hits: AtomicU64,
    writes: AtomicU64,
    truncates: AtomicU64,
    attribute_changes: AtomicU64,
    bytes_read: AtomicU64,
    bytes_cached: AtomicU64,
    bytes_written: AtomicU64,
}

/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub reads: u64,
    pub read_aheads: u64,
    pub cache_hits: u64,
    pub writes: u64,
    pub truncates: u64,
    pub attribute_changes: u64,
    pub bytes_read: u64,
    pub bytes_cached: u64,
    pub bytes_written: u64,
}

#[derive(Debug, Default)]
pub struct ByteRangeCache {
    state: Mutex<CacheState>,
    stats: CacheStats,
}

impl ByteRangeCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            state: Mutex::new(CacheState {
                enabled,
                ..Default::default()
            }),
            stats: CacheStats::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read `extent` of `version`, calling `loader` for whatever is not
    /// cached. The loader fetches the current remote version, which may
    /// differ from `version`; the result then belongs to the loader's
    /// version.
    ///
    /// With `read_ahead` set, loader failures are logged and swallowed.
    #[instrument(skip(self, loader), level = "debug")]
    pub fn read<F>(&self, version: VersionId, extent: Extent, read_ahead: bool, mut loader: F) -> Result<ExtentRead>
    where
        F: FnMut(Extent) -> Result<Loaded>,
    {
        let counter = if read_ahead {
            &self.stats.read_aheads
        } else {
            &self.stats.reads
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if extent.is_empty() {
            return Ok(ExtentRead {
                version,
                start: extent.start,
                data: Vec::new(),
            });
        }

        let mut prefix = self
            .state()
            .maps
            .get(&version)
            .map(|m| m.contiguous_from(extent))
            .unwrap_or_default();

        if prefix.len() as u64 == extent.len() {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(self.finish(version, extent.start, prefix));
        }

        let gap = Extent::new(extent.start + prefix.len() as u64, extent.end);
        let Some(loaded) = self.load(&mut loader, gap, read_ahead)? else {
            return Ok(self.finish(version, extent.start, prefix));
        };

        if loaded.version == version {
            prefix.extend_from_slice(&loaded.data);
            return Ok(self.finish(version, extent.start, prefix));
        }
        if prefix.is_empty() {
            return Ok(self.finish(loaded.version, extent.start, loaded.data));
        }

        // The cached prefix belongs to a superseded version.
        log_cache_debug!(
            "Version advanced during read, reloading extent",
            cached = display(&version),
            current = display(&loaded.version)
        );
        match self.load(&mut loader, extent, read_ahead)? {
            Some(full) => Ok(self.finish(full.version, extent.start, full.data)),
            None => Ok(self.finish(loaded.version, gap.start, loaded.data)),
        }
    }

    fn load<F>(&self, loader: &mut F, extent: Extent, read_ahead: bool) -> Result<Option<Loaded>>
    where
        F: FnMut(Extent) -> Result<Loaded>,
    {
        match loader(extent) {
            Ok(mut loaded) => {
                loaded.data.truncate(extent.len() as usize);
                self.add(&loaded.version, extent.start, &loaded.data);
                Ok(Some(loaded))
            }
            Err(e) if read_ahead => {
                log_cache_debug!("Read-ahead failed", extent = display(&extent), error = display(&e));
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn finish(&self, version: VersionId, start: u64, data: Vec<u8>) -> ExtentRead {
        self.stats
            .bytes_read
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        ExtentRead {
            version,
            start,
            data,
        }
    }

    fn add(&self, version: &VersionId, start: u64, data: &[u8]) {
        let mut state = self.state();
        if !state.enabled || data.is_empty() {
            return;
        }
        state.install(*version, ExtentMap::default).insert(start, data);
        self.stats
            .bytes_cached
            .fetch_add(data.len() as u64, Ordering::Relaxed);
    }

    /// A write of `data` at `offset` against `old` produced `new`.
    pub fn predicated_write(&self, old: Option<&VersionId>, new: &VersionId, offset: u64, data: &[u8]) {
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_written
            .fetch_add(data.len() as u64, Ordering::Relaxed);

        let mut state = self.state();
        let base = state.derived_from(old);
        let enabled = state.enabled;
        let map = state.install(*new, || base);
        if !enabled {
            // Bytes carried over from `old` are stale where this write landed.
            map.punch(offset, offset.saturating_add(data.len() as u64));
        } else if !data.is_empty() {
            map.insert(offset, data);
            self.stats
                .bytes_cached
                .fetch_add(data.len() as u64, Ordering::Relaxed);
        }
    }

    /// A length change against `old` produced `new`. Bytes at or beyond
    /// `length` are not carried over.
    pub fn predicated_truncate(&self, old: Option<&VersionId>, new: &VersionId, length: u64) {
        self.stats.truncates.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state();
        let base = state.derived_from(old);
        state.install(*new, || base).truncate(length);
    }

    /// A metadata-only change against `old` produced `new`.
    pub fn predicated_attribute_change(&self, old: Option<&VersionId>, new: &VersionId) {
        self.stats.attribute_changes.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state();
        let base = state.derived_from(old);
        state.install(*new, || base);
    }

    /// Drop cached data. With `retain_current`, the most recently created
    /// version's extents survive.
    pub fn flush(&self, retain_current: bool) {
        let mut state = self.state();
        let keep = if retain_current {
            state.order.last().copied()
        } else {
            None
        };
        let dropped = state.order.len() - usize::from(keep.is_some());
        match keep.and_then(|v| state.maps.remove(&v).map(|m| (v, m))) {
            Some((version, map)) => {
                state.maps.clear();
                state.order.clear();
                state.order.push(version);
                state.maps.insert(version, map);
            }
            None => {
                state.maps.clear();
                state.order.clear();
            }
        }
        log_cache_debug!("Cache flushed", retained = keep.is_some(), dropped_versions = dropped);
    }

    pub fn is_enabled(&self) -> bool {
        self.state().enabled
    }

    /// Disabling stops new data from entering the cache; extents already
    /// cached remain readable.
    pub fn set_enabled(&self, enabled: bool) {
        self.state().enabled = enabled;
    }

    pub fn cached_versions(&self) -> usize {
        self.state().maps.len()
    }

    pub fn cached_bytes(&self, version: &VersionId) -> u64 {
        self.state()
            .maps
            .get(version)
            .map(ExtentMap::cached_bytes)
            .unwrap_or(0)
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        let s = &self.stats;
        CacheStatsSnapshot {
            reads: s.reads.load(Ordering::Relaxed),
            read_aheads: s.read_aheads.load(Ordering::Relaxed),
            cache_hits: s.cache_hits.load(Ordering::Relaxed),
            writes: s.writes.load(Ordering::Relaxed),
            truncates: s.truncates.load(Ordering::Relaxed),
            attribute_changes: s.attribute_changes.load(Ordering::Relaxed),
            bytes_read: s.bytes_read.load(Ordering::Relaxed),
            bytes_cached: s.bytes_cached.load(Ordering::Relaxed),
            bytes_written: s.bytes_written.load(Ordering::Relaxed),
        }
    }
}
