// this_file: src/array_cache.rs
//! Bucketed array caches for per-pass scratch storage.
//!
//! A cache owns one lazily created [`Bucket`] per size class. Each bucket is
//! a short free-list of arrays that all have exactly the bucket's length.
//! Requests above the largest class bypass the cache entirely.
//!
//! Two flavours exist. A *clean* cache zero-fills the used range of every
//! array handed back, so every array it returns is all zeros. A *dirty*
//! cache skips that work; its users overwrite before they read.

use crate::config::{CacheConfig, DiagnosticsConfig, RasterConfig};
use crate::error::{Error, Result};
use log::{trace, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Element types that can live in an array cache
pub trait CacheElement: Copy + Default + PartialEq + Send + std::fmt::Debug + 'static {
    /// Short name for log records
    const NAME: &'static str;
}

impl CacheElement for i32 {
    const NAME: &'static str = "int";
}

impl CacheElement for f32 {
    const NAME: &'static str = "float";
}

/// Whether returned arrays are zero-filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    Clean,
    Dirty,
}

/// Size classes and growth policy shared by all caches of a context
#[derive(Debug, Clone)]
pub struct CacheSizing {
    sizes: Vec<usize>,
    bucket_capacity: usize,
    threshold: usize,
}

impl CacheSizing {
    pub fn new(config: &CacheConfig) -> Self {
        let sizes = (0..config.buckets)
            .map(|i| config.min_array_size << (config.growth_lg as usize * i))
            .collect();
        Self {
            sizes,
            bucket_capacity: config.bucket_capacity,
            threshold: config.threshold_array_size,
        }
    }

    /// Element counts of the size classes, ascending
    pub fn array_sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn min_array_size(&self) -> usize {
        self.sizes[0]
    }

    /// Largest poolable length; anything longer is never cached
    pub fn max_array_size(&self) -> usize {
        self.sizes[self.sizes.len() - 1]
    }

    pub fn bucket_capacity(&self) -> usize {
        self.bucket_capacity
    }

    /// Smallest size class able to hold `length` elements
    pub fn bucket_index(&self, length: usize) -> Option<usize> {
        self.sizes.iter().position(|&size| length <= size)
    }

    /// Target length when widening an array of `cur` elements to hold
    /// `need`. Always strictly greater than `need`.
    pub fn new_size(&self, cur: usize, need: usize) -> Result<usize> {
        let mut size = if cur > self.threshold {
            cur.saturating_add(cur >> 1)
        } else {
            cur.saturating_mul(2)
        };
        if size <= need {
            let step = self.min_array_size();
            size = (need / step)
                .checked_add(1)
                .and_then(|n| n.checked_mul(step))
                .ok_or(Error::OutOfMemory { requested: need })?;
        }
        if size > i32::MAX as usize {
            return Err(Error::OutOfMemory { requested: need });
        }
        Ok(size)
    }

    /// Growth policy for large off-heap byte buffers
    pub fn new_large_size(&self, cur: usize, need: usize) -> Result<usize> {
        let mut size = if cur > self.threshold.saturating_mul(4) {
            cur.saturating_add(cur >> 2)
        } else {
            cur.saturating_mul(2)
        };
        if size < need {
            size = need;
        }
        if size > isize::MAX as usize {
            return Err(Error::OutOfMemory { requested: need });
        }
        Ok(size)
    }
}

/// Free-list of arrays of one length
#[derive(Debug)]
pub struct Bucket<T> {
    array_size: usize,
    capacity: usize,
    arrays: Vec<Vec<T>>,
}

impl<T: CacheElement> Bucket<T> {
    fn new(array_size: usize, capacity: usize) -> Self {
        Self {
            array_size,
            capacity,
            arrays: Vec::with_capacity(capacity),
        }
    }

    fn get_array(&mut self) -> Option<Vec<T>> {
        self.arrays.pop()
    }

    /// Store `array`; returns false when the bucket is full and the array
    /// was dropped instead
    fn put_array(&mut self, array: Vec<T>) -> Result<bool> {
        if array.len() != self.array_size {
            return Err(Error::Precondition(format!(
                "{} array of length {} returned to bucket of size {}",
                T::NAME,
                array.len(),
                self.array_size
            )));
        }
        if self.arrays.len() < self.capacity {
            self.arrays.push(array);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn array_size(&self) -> usize {
        self.array_size
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }
}

/// Cache counters, collected when `do_stats` is on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Requests served from a bucket
    pub hits: u64,
    /// Requests that allocated a new size-class array
    pub misses: u64,
    /// Requests above the largest size class
    pub oversize: u64,
    /// Widen operations that reallocated
    pub widened: u64,
    /// Arrays stored back into a bucket
    pub returned: u64,
    /// Arrays dropped because their bucket was full or they were oversize
    pub dropped: u64,
    /// Clean arrays found dirty by verification
    pub dirty_detected: u64,
}

impl CacheStats {
    pub fn merge(&mut self, other: &CacheStats) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.oversize += other.oversize;
        self.widened += other.widened;
        self.returned += other.returned;
        self.dropped += other.dropped;
        self.dirty_detected += other.dirty_detected;
    }
}

/// Bucketed cache for one element type and one flavour
#[derive(Debug)]
pub struct ArrayCache<T: CacheElement> {
    kind: CacheKind,
    sizing: Arc<CacheSizing>,
    buckets: Vec<Option<Bucket<T>>>,
    do_checks: bool,
    do_stats: bool,
    stats: CacheStats,
}

impl<T: CacheElement> ArrayCache<T> {
    pub fn new(kind: CacheKind, sizing: Arc<CacheSizing>, diagnostics: &DiagnosticsConfig) -> Self {
        let buckets = (0..sizing.array_sizes().len()).map(|_| None).collect();
        Self {
            kind,
            sizing,
            buckets,
            do_checks: diagnostics.do_checks,
            do_stats: diagnostics.do_stats,
            stats: CacheStats::default(),
        }
    }

    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    pub fn sizing(&self) -> &CacheSizing {
        &self.sizing
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Arrays currently held by the size class with `index`
    pub fn population(&self, index: usize) -> usize {
        self.buckets
            .get(index)
            .and_then(Option::as_ref)
            .map_or(0, Bucket::len)
    }

    /// Arrays currently held across all buckets
    pub fn total_population(&self) -> usize {
        (0..self.buckets.len()).map(|i| self.population(i)).sum()
    }

    fn bucket_mut(&mut self, index: usize) -> &mut Bucket<T> {
        let size = self.sizing.array_sizes()[index];
        let capacity = self.sizing.bucket_capacity();
        self.buckets[index].get_or_insert_with(|| Bucket::new(size, capacity))
    }

    /// Array of at least `length` elements. Lengths within a size class
    /// come back at exactly the class length.
    pub fn get_array(&mut self, length: usize) -> Vec<T> {
        let Some(index) = self.sizing.bucket_index(length) else {
            if self.do_stats {
                self.stats.oversize += 1;
            }
            trace!("ArrayCache<{}>: oversize array of {}", T::NAME, length);
            return vec![T::default(); length];
        };
        let size = self.sizing.array_sizes()[index];
        match self.bucket_mut(index).get_array() {
            Some(mut array) => {
                if self.do_stats {
                    self.stats.hits += 1;
                }
                if self.do_checks && self.kind == CacheKind::Clean {
                    self.verify_clean(&mut array);
                }
                array
            }
            None => {
                if self.do_stats {
                    self.stats.misses += 1;
                }
                vec![T::default(); size]
            }
        }
    }

    /// Hand `array` back. A clean cache zeroes `[from, to)` first. Oversize
    /// arrays and arrays meeting a full bucket are dropped.
    pub fn put_array(&mut self, mut array: Vec<T>, from: usize, to: usize) -> Result<()> {
        if self.kind == CacheKind::Clean {
            let to = to.min(array.len());
            if from < to {
                array[from..to].fill(T::default());
            }
        }
        let length = array.len();
        let Some(index) = self.sizing.bucket_index(length) else {
            if self.do_stats {
                self.stats.dropped += 1;
            }
            return Ok(());
        };
        let stored = self.bucket_mut(index).put_array(array)?;
        if self.do_stats {
            if stored {
                self.stats.returned += 1;
            } else {
                self.stats.dropped += 1;
            }
        }
        Ok(())
    }

    /// Grow `current` so it can hold `needed` elements, keeping the first
    /// `used` ones. `current` goes back to this cache. No-op when it is
    /// already long enough.
    pub fn widen_array(&mut self, current: Vec<T>, used: usize, needed: usize) -> Result<Vec<T>> {
        if current.len() >= needed {
            return Ok(current);
        }
        let widened = self.widen_from(&current, used, needed)?;
        self.put_array(current, 0, used)?;
        Ok(widened)
    }

    /// Fresh array of a size class above `needed` holding a copy of
    /// `current[..used]`. `current` itself is left alone.
    pub(crate) fn widen_from(&mut self, current: &[T], used: usize, needed: usize) -> Result<Vec<T>> {
        if used > current.len() {
            return Err(Error::Precondition(format!(
                "used size {} exceeds {} array length {}",
                used,
                T::NAME,
                current.len()
            )));
        }
        let size = self.sizing.new_size(current.len(), needed)?;
        let mut widened = self.get_array(size);
        widened[..used].copy_from_slice(&current[..used]);
        if self.do_stats {
            self.stats.widened += 1;
        }
        trace!(
            "ArrayCache<{}>: widened {} -> {} (used {}, needed {})",
            T::NAME,
            current.len(),
            widened.len(),
            used,
            needed
        );
        Ok(widened)
    }

    fn verify_clean(&mut self, array: &mut [T]) {
        if let Some(pos) = array.iter().position(|v| *v != T::default()) {
            warn!(
                "ArrayCache<{}>: clean array of length {} has {:?} at {}; re-zeroing",
                T::NAME,
                array.len(),
                array[pos],
                pos
            );
            array.fill(T::default());
            self.stats.dirty_detected += 1;
        }
    }

    /// Test hook: push an arbitrary array into its bucket without cleaning
    #[cfg(test)]
    pub(crate) fn force_put(&mut self, array: Vec<T>) {
        if let Some(index) = self.sizing.bucket_index(array.len()) {
            let _ = self.bucket_mut(index).put_array(array);
        }
    }
}

/// A cache shared between a context and the handles borrowing from it
pub type SharedCache<T> = Arc<Mutex<ArrayCache<T>>>;

/// Lock a shared cache. A poisoned lock is recovered: the cache holds no
/// invariant a panicking holder could have broken halfway.
pub(crate) fn lock_cache<T: CacheElement>(cache: &SharedCache<T>) -> MutexGuard<'_, ArrayCache<T>> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counters of every cache in a context
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheSetStats {
    pub clean_int: CacheStats,
    pub dirty_int: CacheStats,
    pub dirty_float: CacheStats,
}

/// The caches owned by one rendering context
#[derive(Debug, Clone)]
pub struct ArrayCaches {
    pub sizing: Arc<CacheSizing>,
    pub clean_int: SharedCache<i32>,
    pub dirty_int: SharedCache<i32>,
    pub dirty_float: SharedCache<f32>,
}

impl ArrayCaches {
    pub fn new(config: &RasterConfig) -> Self {
        let sizing = Arc::new(CacheSizing::new(&config.cache));
        let diag = &config.diagnostics;
        Self {
            sizing: sizing.clone(),
            clean_int: Arc::new(Mutex::new(ArrayCache::new(
                CacheKind::Clean,
                sizing.clone(),
                diag,
            ))),
            dirty_int: Arc::new(Mutex::new(ArrayCache::new(
                CacheKind::Dirty,
                sizing.clone(),
                diag,
            ))),
            dirty_float: Arc::new(Mutex::new(ArrayCache::new(CacheKind::Dirty, sizing, diag))),
        }
    }

    pub fn stats(&self) -> CacheSetStats {
        CacheSetStats {
            clean_int: lock_cache(&self.clean_int).stats(),
            dirty_int: lock_cache(&self.dirty_int).stats(),
            dirty_float: lock_cache(&self.dirty_float).stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> CacheConfig {
        CacheConfig {
            buckets: 4,
            min_array_size: 32,
            growth_lg: 1,
            bucket_capacity: 2,
            threshold_array_size: 1 << 20,
        }
    }

    fn cache(kind: CacheKind) -> ArrayCache<i32> {
        let diag = DiagnosticsConfig {
            do_stats: true,
            do_checks: true,
            verbose: false,
        };
        ArrayCache::new(kind, Arc::new(CacheSizing::new(&small_config())), &diag)
    }

    #[test]
    fn size_classes_follow_growth() {
        let sizing = CacheSizing::new(&small_config());
        assert_eq!(sizing.array_sizes(), &[32, 64, 128, 256]);
        assert_eq!(sizing.max_array_size(), 256);
        assert_eq!(sizing.bucket_index(1), Some(0));
        assert_eq!(sizing.bucket_index(33), Some(1));
        assert_eq!(sizing.bucket_index(256), Some(3));
        assert_eq!(sizing.bucket_index(257), None);

        let defaults = CacheSizing::new(&CacheConfig::default());
        assert_eq!(defaults.min_array_size(), 4096);
        assert_eq!(defaults.max_array_size(), 4096 << 14);
    }

    #[test]
    fn new_size_is_strictly_greater() {
        let sizing = CacheSizing::new(&small_config());
        assert_eq!(sizing.new_size(16, 40).unwrap(), 64);
        assert_eq!(sizing.new_size(64, 100).unwrap(), 128);
        assert_eq!(sizing.new_size(64, 128).unwrap(), 160);
        for (cur, need) in [(0, 0), (0, 1), (31, 62), (100, 5000)] {
            assert!(sizing.new_size(cur, need).unwrap() > need);
        }
    }

    #[test]
    fn get_reuses_returned_arrays() {
        let mut cache = cache(CacheKind::Dirty);
        let a = cache.get_array(20);
        assert_eq!(a.len(), 32);
        cache.put_array(a, 0, 0).unwrap();
        assert_eq!(cache.population(0), 1);
        let b = cache.get_array(10);
        assert_eq!(b.len(), 32);
        assert_eq!(cache.population(0), 0);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.returned, 1);
    }

    #[test]
    fn full_bucket_drops_extra_arrays() {
        let mut cache = cache(CacheKind::Dirty);
        let arrays: Vec<_> = (0..3).map(|_| cache.get_array(64)).collect();
        for a in arrays {
            cache.put_array(a, 0, 0).unwrap();
        }
        assert_eq!(cache.population(1), 2);
        assert_eq!(cache.stats().dropped, 1);
    }

    #[test]
    fn oversize_bypass_never_pools() {
        let mut cache = cache(CacheKind::Clean);
        let before = cache.total_population();
        let big = cache.get_array(1000);
        assert_eq!(big.len(), 1000);
        cache.put_array(big, 0, 1000).unwrap();
        assert_eq!(cache.total_population(), before);
        assert_eq!(cache.stats().oversize, 1);
    }

    #[test]
    fn clean_cache_zeroes_used_range() {
        let mut cache = cache(CacheKind::Clean);
        let mut a = cache.get_array(32);
        a[..10].fill(7);
        cache.put_array(a, 0, 10).unwrap();
        let b = cache.get_array(32);
        assert!(b.iter().all(|&v| v == 0));
        assert_eq!(cache.stats().dirty_detected, 0);
    }

    #[test]
    fn dirty_cache_keeps_contents() {
        let mut cache = cache(CacheKind::Dirty);
        let mut a = cache.get_array(32);
        a[3] = 9;
        cache.put_array(a, 0, 10).unwrap();
        assert_eq!(cache.get_array(32)[3], 9);
    }

    #[test]
    fn verification_heals_dirty_clean_arrays() {
        let mut cache = cache(CacheKind::Clean);
        let mut a = cache.get_array(32);
        a[31] = 5;
        cache.force_put(a);
        let b = cache.get_array(32);
        assert!(b.iter().all(|&v| v == 0));
        assert_eq!(cache.stats().dirty_detected, 1);
    }

    #[test]
    fn length_mismatch_is_a_precondition_error() {
        let mut cache = cache(CacheKind::Dirty);
        let err = cache.put_array(vec![0; 20], 0, 0).unwrap_err();
        assert!(matches!(err, Error::Precondition(_)));
    }

    #[test]
    fn widen_keeps_prefix_and_returns_old_array() {
        let mut cache = cache(CacheKind::Clean);
        let mut a = cache.get_array(32);
        for (i, v) in a.iter_mut().enumerate() {
            *v = i as i32 + 1;
        }
        let b = cache.widen_array(a, 32, 50).unwrap();
        assert_eq!(b.len(), 64);
        assert_eq!(&b[..32], &(1..=32).collect::<Vec<i32>>()[..]);
        assert!(b[32..].iter().all(|&v| v == 0));
        assert_eq!(cache.population(0), 1);
        assert!(cache.get_array(1).iter().all(|&v| v == 0));
    }

    #[test]
    fn widen_is_noop_when_long_enough() {
        let mut cache = cache(CacheKind::Dirty);
        let a = cache.get_array(64);
        let ptr = a.as_ptr();
        let b = cache.widen_array(a, 10, 64).unwrap();
        assert_eq!(b.as_ptr(), ptr);
        assert_eq!(cache.stats().widened, 0);
    }
}
