// this_file: src/pool.rs
//! Pool of rendering contexts.
//!
//! Contexts are expensive to build and cheap to reuse, so each owner
//! borrows one through [`ContextPool::acquire`]. The returned guard disposes
//! the context and hands it back when dropped.
//!
//! In `thread_local` mode every thread keeps one context per pool. A thread
//! that acquires again while still holding its context falls back to the
//! shared queue. In `queue` mode all idle contexts live in a bounded
//! lock-free queue of `pool.max_idle` slots.
//!
//! Dropping the last handle of a pool frees the context parked in the
//! dropping thread's slot. Slots of that pool on other threads are freed
//! when those threads next acquire or release from any pool, or exit.

use crate::config::{PoolMode, RasterConfig};
use crate::context::RendererContext;
use crate::error::Result;
use crate::memory_tracker::{MemorySnapshot, MemoryTracker};
use crossbeam_queue::ArrayQueue;
use log::{debug, warn};
use serde::Serialize;
use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(1);

struct Slot {
    pool_id: usize,
    pool: Weak<PoolInner>,
    context: Option<Box<RendererContext>>,
}

thread_local! {
    static SLOTS: RefCell<Vec<Slot>> = RefCell::new(Vec::new());
}

/// Drop slots whose pool is gone, with their contexts
fn prune_dead(slots: &mut Vec<Slot>) {
    slots.retain(|slot| slot.pool.strong_count() > 0);
}

/// Pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub created: u64,
    pub reused: u64,
    pub released: u64,
    /// Contexts dropped because the idle queue was full or dispose failed
    pub dropped: u64,
    pub reclaimed: u64,
    pub idle: usize,
    pub memory: MemorySnapshot,
}

struct PoolInner {
    id: usize,
    config: Arc<RasterConfig>,
    tracker: Arc<MemoryTracker>,
    queue: ArrayQueue<Box<RendererContext>>,
    next_context_id: AtomicUsize,
    created: AtomicU64,
    reused: AtomicU64,
    released: AtomicU64,
    dropped: AtomicU64,
    reclaimed: AtomicU64,
}

impl PoolInner {
    fn take_local(&self) -> Option<Box<RendererContext>> {
        SLOTS
            .try_with(|slots| {
                let mut slots = slots.borrow_mut();
                prune_dead(&mut slots);
                slots
                    .iter_mut()
                    .find(|slot| slot.pool_id == self.id)
                    .and_then(|slot| slot.context.take())
            })
            .ok()
            .flatten()
    }

    fn create(&self) -> Result<Box<RendererContext>> {
        let id = self.next_context_id.fetch_add(1, Ordering::Relaxed);
        let context = RendererContext::new(id, self.config.clone(), self.tracker.clone())?;
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(context))
    }

    fn release(self: &Arc<Self>, context: Box<RendererContext>) {
        self.released.fetch_add(1, Ordering::Relaxed);
        let mut context = Some(context);
        if self.config.pool.mode == PoolMode::ThreadLocal {
            let _ = SLOTS.try_with(|slots| {
                let mut slots = slots.borrow_mut();
                prune_dead(&mut slots);
                match slots.iter_mut().find(|slot| slot.pool_id == self.id) {
                    Some(slot) if slot.context.is_none() => slot.context = context.take(),
                    Some(_) => {}
                    None => slots.push(Slot {
                        pool_id: self.id,
                        pool: Arc::downgrade(self),
                        context: context.take(),
                    }),
                }
            });
        }
        if let Some(context) = context {
            if let Err(context) = self.queue.push(context) {
                debug!("Pool {}: idle queue full, dropping context {}", self.id, context.id());
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        let id = self.id;
        let _ = SLOTS.try_with(|slots| {
            if let Ok(mut slots) = slots.try_borrow_mut() {
                slots.retain(|slot| slot.pool_id != id);
            }
        });
    }
}

/// Shared handle to a pool; clones refer to the same pool
#[derive(Clone)]
pub struct ContextPool {
    inner: Arc<PoolInner>,
}

impl ContextPool {
    /// Pool for `config`, validated first
    pub fn new(config: RasterConfig) -> Result<Self> {
        config.validate()?;
        let tracker = Arc::new(MemoryTracker::new(config.offheap_limit_bytes));
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        debug!("Pool {}: {:?} mode", id, config.pool.mode);
        let queue = ArrayQueue::new(config.pool.max_idle);
        Ok(Self {
            inner: Arc::new(PoolInner {
                id,
                config: Arc::new(config),
                tracker,
                queue,
                next_context_id: AtomicUsize::new(1),
                created: AtomicU64::new(0),
                reused: AtomicU64::new(0),
                released: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                reclaimed: AtomicU64::new(0),
            }),
        })
    }

    pub fn config(&self) -> &RasterConfig {
        &self.inner.config
    }

    pub fn tracker(&self) -> &Arc<MemoryTracker> {
        &self.inner.tracker
    }

    /// Borrow an idle context or build a new one
    pub fn acquire(&self) -> Result<PooledContext> {
        let inner = &self.inner;
        let reused = match inner.config.pool.mode {
            PoolMode::ThreadLocal => inner.take_local().or_else(|| inner.queue.pop()),
            PoolMode::Queue => inner.queue.pop(),
        };
        let context = match reused {
            Some(context) => {
                inner.reused.fetch_add(1, Ordering::Relaxed);
                context
            }
            None => inner.create()?,
        };
        Ok(PooledContext {
            pool: self.inner.clone(),
            context: Some(context),
        })
    }

    /// Run `f` with a pooled context
    pub fn with_context<T>(&self, f: impl FnOnce(&mut RendererContext) -> Result<T>) -> Result<T> {
        let mut context = self.acquire()?;
        f(&mut context)
    }

    /// Drop every idle context of this pool reachable from the calling
    /// thread. Later acquisitions rebuild contexts transparently.
    pub fn reclaim_idle(&self) -> usize {
        let inner = &self.inner;
        let mut count = 0;
        while inner.queue.pop().is_some() {
            count += 1;
        }
        if inner.take_local().is_some() {
            count += 1;
        }
        inner.reclaimed.fetch_add(count as u64, Ordering::Relaxed);
        debug!("Pool {}: reclaimed {} idle contexts", inner.id, count);
        count
    }

    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;
        PoolStats {
            created: inner.created.load(Ordering::Relaxed),
            reused: inner.reused.load(Ordering::Relaxed),
            released: inner.released.load(Ordering::Relaxed),
            dropped: inner.dropped.load(Ordering::Relaxed),
            reclaimed: inner.reclaimed.load(Ordering::Relaxed),
            idle: inner.queue.len(),
            memory: inner.tracker.snapshot(),
        }
    }
}

impl std::fmt::Debug for ContextPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextPool")
            .field("id", &self.inner.id)
            .field("mode", &self.inner.config.pool.mode)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A context on loan from a [`ContextPool`]. Dropping it disposes the
/// context and returns it to the pool.
pub struct PooledContext {
    pool: Arc<PoolInner>,
    context: Option<Box<RendererContext>>,
}

impl Deref for PooledContext {
    type Target = RendererContext;

    fn deref(&self) -> &RendererContext {
        self.context.as_deref().expect("context present until drop")
    }
}

impl DerefMut for PooledContext {
    fn deref_mut(&mut self) -> &mut RendererContext {
        self.context.as_deref_mut().expect("context present until drop")
    }
}

impl Drop for PooledContext {
    fn drop(&mut self) {
        let Some(mut context) = self.context.take() else {
            return;
        };
        match context.dispose() {
            Ok(()) => self.pool.release(context),
            Err(e) => {
                warn!("Dropping context {} after failed dispose: {}", context.id(), e);
                self.pool.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl std::fmt::Debug for PooledContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledContext")
            .field("pool", &self.pool.id)
            .field("context", &self.context)
            .finish()
    }
}
