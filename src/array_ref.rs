// this_file: src/array_ref.rs
//! Typed handle over one scratch-array slot of a rendering context.
//!
//! A handle owns an *initial* array allocated outside the cache. It is the
//! default storage and is never pooled. Widening swaps in a larger array
//! borrowed from the cache, and [`ArrayRef::put_array`] hands that one back
//! and makes the initial array current again.

use crate::array_cache::{lock_cache, CacheElement, CacheKind, SharedCache};
use crate::error::Result;

pub struct ArrayRef<T: CacheElement> {
    cache: SharedCache<T>,
    kind: CacheKind,
    initial: Vec<T>,
    working: Option<Vec<T>>,
}

impl<T: CacheElement> ArrayRef<T> {
    /// Handle whose initial array has `initial_size` elements
    pub fn new(cache: SharedCache<T>, initial_size: usize) -> Self {
        let kind = lock_cache(&cache).kind();
        Self {
            cache,
            kind,
            initial: vec![T::default(); initial_size],
            working: None,
        }
    }

    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    /// Current array
    #[inline]
    pub fn array(&self) -> &[T] {
        self.working.as_deref().unwrap_or(self.initial.as_slice())
    }

    /// Current array, mutable
    #[inline]
    pub fn array_mut(&mut self) -> &mut [T] {
        match self.working.as_mut() {
            Some(array) => array,
            None => &mut self.initial,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.array().len()
    }

    pub fn is_empty(&self) -> bool {
        self.array().is_empty()
    }

    pub fn initial_len(&self) -> usize {
        self.initial.len()
    }

    /// True when the current array is not the initial one
    pub fn is_widened(&self) -> bool {
        self.working.is_some()
    }

    /// Standalone scratch array from the owning cache. Give it back with
    /// [`ArrayRef::return_array`].
    pub fn get_array(&self, length: usize) -> Vec<T> {
        lock_cache(&self.cache).get_array(length)
    }

    /// Return an array obtained from [`ArrayRef::get_array`]
    pub fn return_array(&self, array: Vec<T>, from: usize, to: usize) -> Result<()> {
        lock_cache(&self.cache).put_array(array, from, to)
    }

    /// Make the current array at least `needed` long, preserving its first
    /// `used` elements
    pub fn widen_array(&mut self, used: usize, needed: usize) -> Result<()> {
        if self.len() >= needed {
            return Ok(());
        }
        let mut cache = lock_cache(&self.cache);
        let widened = match self.working.take() {
            Some(current) => cache.widen_array(current, used, needed)?,
            None => {
                let widened = cache.widen_from(&self.initial, used, needed)?;
                if self.kind == CacheKind::Clean {
                    self.initial[..used].fill(T::default());
                }
                widened
            }
        };
        self.working = Some(widened);
        Ok(())
    }

    /// Return the current array, zeroing `[from, to)` for clean caches, and
    /// make the initial array current
    pub fn put_array(&mut self, from: usize, to: usize) -> Result<()> {
        match self.working.take() {
            Some(array) => lock_cache(&self.cache).put_array(array, from, to),
            None => {
                if self.kind == CacheKind::Clean {
                    let to = to.min(self.initial.len());
                    if from < to {
                        self.initial[from..to].fill(T::default());
                    }
                }
                Ok(())
            }
        }
    }

    /// [`ArrayRef::put_array`] over the whole current array
    pub fn put_array_clean(&mut self) -> Result<()> {
        let len = self.len();
        self.put_array(0, len)
    }
}

impl<T: CacheElement> std::fmt::Debug for ArrayRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrayRef")
            .field("kind", &self.kind)
            .field("initial_len", &self.initial.len())
            .field("len", &self.len())
            .field("widened", &self.is_widened())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array_cache::{ArrayCache, CacheSizing};
    use crate::config::{CacheConfig, DiagnosticsConfig};
    use std::sync::{Arc, Mutex};

    fn shared(kind: CacheKind) -> SharedCache<i32> {
        let config = CacheConfig {
            buckets: 4,
            min_array_size: 32,
            growth_lg: 1,
            bucket_capacity: 4,
            threshold_array_size: 1 << 20,
        };
        let diag = DiagnosticsConfig {
            do_stats: true,
            do_checks: true,
            verbose: false,
        };
        Arc::new(Mutex::new(ArrayCache::new(
            kind,
            Arc::new(CacheSizing::new(&config)),
            &diag,
        )))
    }

    #[test]
    fn starts_on_initial_array() {
        let handle = ArrayRef::new(shared(CacheKind::Dirty), 16);
        assert_eq!(handle.len(), 16);
        assert!(!handle.is_widened());
    }

    #[test]
    fn two_widenings_preserve_values() {
        let cache = shared(CacheKind::Dirty);
        let mut handle = ArrayRef::new(cache.clone(), 16);
        for (i, v) in handle.array_mut().iter_mut().enumerate() {
            *v = 100 + i as i32;
        }
        handle.widen_array(16, 40).unwrap();
        assert!(handle.len() > 40);
        assert!(handle.is_widened());
        for i in 16..40 {
            handle.array_mut()[i] = 100 + i as i32;
        }
        handle.widen_array(40, 100).unwrap();
        assert!(handle.len() > 100);
        let expected: Vec<i32> = (0..40).map(|i| 100 + i).collect();
        assert_eq!(&handle.array()[..40], &expected[..]);
        // the 64-element array from the first widening went back to the cache
        assert_eq!(lock_cache(&cache).population(1), 1);
    }

    #[test]
    fn put_array_resets_to_initial_and_pools_working() {
        let cache = shared(CacheKind::Clean);
        let mut handle = ArrayRef::new(cache.clone(), 16);
        handle.widen_array(0, 50).unwrap();
        handle.array_mut()[49] = 3;
        handle.put_array(0, 50).unwrap();
        assert!(!handle.is_widened());
        assert_eq!(handle.len(), 16);
        assert_eq!(lock_cache(&cache).population(1), 1);
        assert!(handle.get_array(60).iter().all(|&v| v == 0));
    }

    #[test]
    fn initial_array_is_never_pooled() {
        let cache = shared(CacheKind::Clean);
        let mut handle = ArrayRef::new(cache.clone(), 32);
        handle.array_mut()[5] = 8;
        handle.put_array(0, 32).unwrap();
        assert_eq!(lock_cache(&cache).total_population(), 0);
        assert_eq!(handle.array()[5], 0);
    }

    #[test]
    fn clean_initial_is_zeroed_when_swapped_out() {
        let cache = shared(CacheKind::Clean);
        let mut handle = ArrayRef::new(cache, 16);
        handle.array_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);
        handle.widen_array(4, 20).unwrap();
        assert_eq!(&handle.array()[..4], &[1, 2, 3, 4]);
        handle.put_array(0, 4).unwrap();
        assert!(handle.array().iter().all(|&v| v == 0));
    }

    #[test]
    fn scratch_arrays_round_trip_through_cache() {
        let cache = shared(CacheKind::Dirty);
        let handle = ArrayRef::new(cache.clone(), 16);
        let scratch = handle.get_array(100);
        assert_eq!(scratch.len(), 128);
        handle.return_array(scratch, 0, 0).unwrap();
        assert_eq!(lock_cache(&cache).population(2), 1);
        let oversize = handle.get_array(1000);
        handle.return_array(oversize, 0, 0).unwrap();
        assert_eq!(lock_cache(&cache).total_population(), 1);
    }
}
