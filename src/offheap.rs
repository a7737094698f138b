// this_file: src/offheap.rs
//! Manually managed byte regions.
//!
//! Two ownership modes exist:
//!
//! - [`OffHeapBuffer`] is *confined*: owned by exactly one rendering context,
//!   resizable, and released exactly once when freed or dropped.
//! - [`GlobalBuffer`] is *global*: filled once at construction, read-only
//!   afterwards, shareable between threads and never released.
//!
//! Regions are 16-byte aligned and zero-filled on allocation.

use crate::error::{Error, Result};
use crate::memory_tracker::MemoryTracker;
use log::debug;
use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::Arc;

/// Alignment of every region in bytes
pub const ALIGNMENT: usize = 16;

/// Lifetime discipline of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipMode {
    /// Single owner, resizable, freed explicitly or on drop
    Confined,
    /// Shared, fixed size, never freed
    Global,
}

/// Operations common to both ownership modes
pub trait OffHeapRegion {
    fn mode(&self) -> OwnershipMode;

    /// Length in bytes
    fn length(&self) -> usize;

    fn as_bytes(&self) -> &[u8];

    /// Replace the backing storage with a region of `new_length` bytes
    fn resize(&mut self, new_length: usize) -> Result<()>;
}

/// Raw allocation. Releasing it is the owner's job.
#[derive(Debug)]
struct RawRegion {
    ptr: NonNull<u8>,
    length: usize,
    layout: Layout,
}

impl RawRegion {
    fn allocate(length: usize) -> Result<Self> {
        // Zero-length regions still get a real allocation so the pointer is
        // always valid for the layout we hand back to the allocator.
        let layout = Layout::from_size_align(padded_length(length)?, ALIGNMENT)
            .map_err(|_| Error::OutOfMemory { requested: length })?;
        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or(Error::OutOfMemory { requested: length })?;
        Ok(Self {
            ptr,
            length,
            layout,
        })
    }

    /// # Safety
    /// Must be called at most once, and no access may follow.
    unsafe fn release(&mut self) {
        alloc::dealloc(self.ptr.as_ptr(), self.layout);
    }

    /// Bytes actually held, padded to the alignment
    fn reserved(&self) -> usize {
        self.layout.size()
    }

    fn as_bytes(&self) -> &[u8] {
        // SAFETY: ptr is valid and initialised for `length` bytes.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.length) }
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid for `length` bytes and uniquely borrowed.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.length) }
    }
}

/// Confined, resizable off-heap region with a `used` cursor
pub struct OffHeapBuffer {
    region: RawRegion,
    used: usize,
    tracker: Arc<MemoryTracker>,
    verbose: bool,
}

// SAFETY: the buffer uniquely owns its region; moving it to another thread
// moves that ownership. It is deliberately not Sync.
unsafe impl Send for OffHeapBuffer {}

impl OffHeapBuffer {
    /// Allocate `length` zeroed bytes, reserving them in `tracker` first
    pub fn allocate(length: usize, tracker: Arc<MemoryTracker>, verbose: bool) -> Result<Self> {
        let padded = padded_length(length)?;
        tracker.reserve(padded)?;
        let region = match RawRegion::allocate(length) {
            Ok(region) => region,
            Err(e) => {
                tracker.release(padded);
                return Err(e);
            }
        };
        tracker.note_allocation();
        if verbose {
            debug!(
                "OffHeapBuffer: allocate {} bytes at {:p}",
                length,
                region.ptr.as_ptr()
            );
        }
        Ok(Self {
            region,
            used: 0,
            tracker,
            verbose,
        })
    }

    /// Bytes logically in use
    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    /// Move the used cursor. Must not exceed the length.
    #[inline]
    pub fn set_used(&mut self, used: usize) {
        debug_assert!(used <= self.region.length);
        self.used = used.min(self.region.length);
    }

    /// Release the region now rather than at end of scope
    pub fn free(self) {
        drop(self)
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.region.as_bytes_mut()
    }

    /// Zero `[from, to)`
    pub fn clear_range(&mut self, from: usize, to: usize) {
        self.region.as_bytes_mut()[from..to].fill(0);
    }

    /// Checked read
    pub fn get_byte(&self, offset: usize) -> u8 {
        self.region.as_bytes()[offset]
    }

    /// Checked write
    pub fn put_byte(&mut self, offset: usize, value: u8) {
        self.region.as_bytes_mut()[offset] = value;
    }

    /// Checked native-endian read of an `i32` at a byte offset
    pub fn get_int(&self, offset: usize) -> i32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.region.as_bytes()[offset..offset + 4]);
        i32::from_ne_bytes(raw)
    }

    /// Checked native-endian write of an `i32` at a byte offset
    pub fn put_int(&mut self, offset: usize, value: i32) {
        self.region.as_bytes_mut()[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
    }

    pub fn get_float(&self, offset: usize) -> f32 {
        f32::from_bits(self.get_int(offset) as u32)
    }

    pub fn put_float(&mut self, offset: usize, value: f32) {
        self.put_int(offset, value.to_bits() as i32)
    }

    /// # Safety
    /// `offset < self.length()`.
    #[inline]
    pub unsafe fn get_byte_unchecked(&self, offset: usize) -> u8 {
        debug_assert!(offset < self.region.length);
        *self.region.ptr.as_ptr().add(offset)
    }

    /// # Safety
    /// `offset < self.length()`.
    #[inline]
    pub unsafe fn put_byte_unchecked(&mut self, offset: usize, value: u8) {
        debug_assert!(offset < self.region.length);
        *self.region.ptr.as_ptr().add(offset) = value;
    }

    /// # Safety
    /// `offset + 4 <= self.length()`.
    #[inline]
    pub unsafe fn get_int_unchecked(&self, offset: usize) -> i32 {
        debug_assert!(offset + 4 <= self.region.length);
        std::ptr::read_unaligned(self.region.ptr.as_ptr().add(offset) as *const i32)
    }

    /// # Safety
    /// `offset + 4 <= self.length()`.
    #[inline]
    pub unsafe fn put_int_unchecked(&mut self, offset: usize, value: i32) {
        debug_assert!(offset + 4 <= self.region.length);
        std::ptr::write_unaligned(self.region.ptr.as_ptr().add(offset) as *mut i32, value)
    }

    /// # Safety
    /// `offset + 4 <= self.length()`.
    #[inline]
    pub unsafe fn get_float_unchecked(&self, offset: usize) -> f32 {
        f32::from_bits(self.get_int_unchecked(offset) as u32)
    }

    /// # Safety
    /// `offset + 4 <= self.length()`.
    #[inline]
    pub unsafe fn put_float_unchecked(&mut self, offset: usize, value: f32) {
        self.put_int_unchecked(offset, value.to_bits() as i32)
    }
}

impl OffHeapRegion for OffHeapBuffer {
    fn mode(&self) -> OwnershipMode {
        OwnershipMode::Confined
    }

    fn length(&self) -> usize {
        self.region.length
    }

    fn as_bytes(&self) -> &[u8] {
        self.region.as_bytes()
    }

    /// Copies `min(used, new_length)` bytes into a fresh region. On failure
    /// the current region is left untouched.
    fn resize(&mut self, new_length: usize) -> Result<()> {
        let padded = padded_length(new_length)?;
        self.tracker.reserve(padded)?;
        let mut fresh = match RawRegion::allocate(new_length) {
            Ok(region) => region,
            Err(e) => {
                self.tracker.release(padded);
                return Err(e);
            }
        };
        let keep = self.used.min(new_length);
        fresh.as_bytes_mut()[..keep].copy_from_slice(&self.region.as_bytes()[..keep]);

        let mut old = std::mem::replace(&mut self.region, fresh);
        if self.verbose {
            debug!(
                "OffHeapBuffer: resize {} -> {} bytes ({:p} -> {:p})",
                old.length,
                new_length,
                old.ptr.as_ptr(),
                self.region.ptr.as_ptr()
            );
        }
        let old_reserved = old.reserved();
        // SAFETY: `old` was just detached from self and is released once.
        unsafe { old.release() };
        self.tracker.release(old_reserved);
        self.tracker.note_resize();
        self.used = keep;
        Ok(())
    }
}

impl Drop for OffHeapBuffer {
    fn drop(&mut self) {
        if self.verbose {
            debug!(
                "OffHeapBuffer: free {} bytes at {:p}",
                self.region.length,
                self.region.ptr.as_ptr()
            );
        }
        let reserved = self.region.reserved();
        // SAFETY: drop runs once and nothing touches the region afterwards.
        unsafe { self.region.release() };
        self.tracker.release(reserved);
        self.tracker.note_free();
    }
}

impl std::fmt::Debug for OffHeapBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffHeapBuffer")
            .field("length", &self.region.length)
            .field("used", &self.used)
            .finish()
    }
}

/// Global, read-only region. Never freed.
#[derive(Debug)]
pub struct GlobalBuffer {
    region: RawRegion,
}

// SAFETY: contents are written only during construction and never mutated
// or released afterwards, so shared reads from any thread are sound.
unsafe impl Send for GlobalBuffer {}
unsafe impl Sync for GlobalBuffer {}

impl GlobalBuffer {
    /// Allocate a region holding a copy of `bytes`
    pub fn with_bytes(bytes: &[u8]) -> Result<Self> {
        let mut region = RawRegion::allocate(bytes.len())?;
        region.as_bytes_mut().copy_from_slice(bytes);
        Ok(Self { region })
    }

    /// Allocate and publish for the rest of the process
    pub fn leak(bytes: &[u8]) -> Result<&'static GlobalBuffer> {
        Ok(Box::leak(Box::new(Self::with_bytes(bytes)?)))
    }

    #[inline]
    pub fn get_byte(&self, offset: usize) -> u8 {
        self.region.as_bytes()[offset]
    }
}

impl OffHeapRegion for GlobalBuffer {
    fn mode(&self) -> OwnershipMode {
        OwnershipMode::Global
    }

    fn length(&self) -> usize {
        self.region.length
    }

    fn as_bytes(&self) -> &[u8] {
        self.region.as_bytes()
    }

    fn resize(&mut self, _new_length: usize) -> Result<()> {
        Err(Error::Unsupported(
            "global off-heap buffers cannot be resized".into(),
        ))
    }
}

fn padded_length(length: usize) -> Result<usize> {
    length
        .max(1)
        .checked_add(ALIGNMENT - 1)
        .map(|n| n & !(ALIGNMENT - 1))
        .ok_or(Error::OutOfMemory { requested: length })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> Arc<MemoryTracker> {
        Arc::new(MemoryTracker::unlimited())
    }

    #[test]
    fn allocation_is_aligned_and_zeroed() {
        let buf = OffHeapBuffer::allocate(100, tracker(), false).unwrap();
        assert_eq!(buf.length(), 100);
        assert_eq!(buf.as_bytes().as_ptr() as usize % ALIGNMENT, 0);
        assert!(buf.as_bytes().iter().all(|&b| b == 0));
        assert_eq!(buf.mode(), OwnershipMode::Confined);
    }

    #[test]
    fn resize_copies_used_prefix_only() {
        let mut buf = OffHeapBuffer::allocate(16, tracker(), false).unwrap();
        for i in 0..16 {
            buf.put_byte(i, i as u8 + 1);
        }
        buf.set_used(8);
        buf.resize(64).unwrap();
        assert_eq!(buf.length(), 64);
        assert_eq!(buf.used(), 8);
        assert_eq!(&buf.as_bytes()[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(buf.as_bytes()[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn shrinking_clamps_used() {
        let mut buf = OffHeapBuffer::allocate(32, tracker(), true).unwrap();
        buf.put_int(0, -7);
        buf.put_int(4, 99);
        buf.set_used(32);
        buf.resize(4).unwrap();
        assert_eq!(buf.used(), 4);
        assert_eq!(buf.get_int(0), -7);
    }

    #[test]
    fn unchecked_accessors_round_trip() {
        let mut buf = OffHeapBuffer::allocate(24, tracker(), false).unwrap();
        unsafe {
            buf.put_int_unchecked(3, 123_456);
            buf.put_float_unchecked(12, -2.5);
            buf.put_byte_unchecked(23, 0xAB);
            assert_eq!(buf.get_int_unchecked(3), 123_456);
            assert_eq!(buf.get_float_unchecked(12), -2.5);
            assert_eq!(buf.get_byte_unchecked(23), 0xAB);
        }
    }

    #[test]
    fn tracker_sees_allocate_resize_free() {
        let tracker = tracker();
        let mut buf = OffHeapBuffer::allocate(20, tracker.clone(), false).unwrap();
        assert_eq!(tracker.current_usage(), 32);
        buf.resize(100).unwrap();
        assert_eq!(tracker.current_usage(), 112);
        buf.free();
        let snap = tracker.snapshot();
        assert_eq!(snap.current_bytes, 0);
        assert_eq!(snap.allocations, 1);
        assert_eq!(snap.resizes, 1);
        assert_eq!(snap.frees, 1);
    }

    #[test]
    fn failed_resize_keeps_old_region() {
        let tracker = Arc::new(MemoryTracker::new(Some(64)));
        let mut buf = OffHeapBuffer::allocate(32, tracker, false).unwrap();
        buf.put_int(0, 42);
        buf.set_used(4);
        let err = buf.resize(1024).unwrap_err();
        assert!(matches!(err, Error::OutOfMemory { .. }));
        assert_eq!(buf.length(), 32);
        assert_eq!(buf.get_int(0), 42);
    }

    #[test]
    fn global_buffer_refuses_resize() {
        let mut global = GlobalBuffer::with_bytes(&[0, 128, 255]).unwrap();
        assert_eq!(global.mode(), OwnershipMode::Global);
        assert_eq!(global.get_byte(2), 255);
        assert!(matches!(global.resize(10), Err(Error::Unsupported(_))));
        assert_eq!(global.length(), 3);
    }
}
