//! A bounded pool of interchangeable resources, handing out the least used one first.
//!
//! Resources are created lazily, up to the pool capacity, by a [`PoolManager`].
//! A resource checked out of the pool is either freed back into it or invalidated;
//! the [`Allocation`] guard guarantees one of the two happens on every exit path.

use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    ops::Deref,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    thread,
};

use tracing::{debug, trace, warn};

/// Creates, destroys and ranks the resources of an [`ObjectPool`]
pub trait PoolManager: Send + Sync {
    type Resource: Send;
    type Error: std::fmt::Display;

    fn create(&self) -> Result<Self::Resource, Self::Error>;

    fn destroy(&self, resource: Self::Resource);

    /// Record one more successful use of `resource`
    fn bump(&self, resource: &Self::Resource);

    /// Resources with the lowest priority are handed out first
    fn priority(&self, resource: &Self::Resource) -> u64;
}

struct Entry<R> {
    priority: u64,
    seq: u64,
    resource: R,
}

// `BinaryHeap` is a max-heap: the order is reversed so that the lowest
// priority, then the oldest entry, comes out first
impl<R> Ord for Entry<R> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<R> PartialOrd for Entry<R> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<R> PartialEq for Entry<R> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<R> Eq for Entry<R> {}

struct PoolState<R> {
    idle: BinaryHeap<Entry<R>>,
    /// resources alive, idle or checked out, plus those being created
    tracked: usize,
    next_seq: u64,
}

pub struct ObjectPool<M: PoolManager> {
    manager: M,
    max_size: usize,
    state: Mutex<PoolState<M::Resource>>,
    released: Condvar,
}

impl<M: PoolManager> ObjectPool<M> {
    pub fn new(manager: M, max_size: usize) -> Self {
        Self {
            manager,
            max_size,
            state: Mutex::new(PoolState {
                idle: BinaryHeap::with_capacity(max_size),
                tracked: 0,
                next_seq: 0,
            }),
            released: Condvar::new(),
        }
    }

    pub const fn manager(&self) -> &M {
        &self.manager
    }

    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of live resources, idle or checked out
    pub fn size(&self) -> usize {
        self.lock().tracked
    }

    /// Number of resources waiting in the pool
    pub fn idle(&self) -> usize {
        self.lock().idle.len()
    }

    // the state is left consistent by every critical section: a poisoned lock is still usable
    fn lock(&self) -> MutexGuard<'_, PoolState<M::Resource>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check the least used resource out of the pool.
    ///
    /// When the pool is empty and below capacity, it is topped up first.
    /// When every resource is checked out at capacity, this blocks until one is released.
    pub fn alloc(&self) -> Result<M::Resource, M::Error> {
        let mut state = self.lock();
        loop {
            if let Some(entry) = state.idle.pop() {
                trace!("resource allocated, priority {}", entry.priority);
                return Ok(entry.resource);
            }
            if state.tracked < self.max_size {
                let missing = self.max_size - state.tracked;
                // reserve the slots, then create without holding the lock
                state.tracked += missing;
                drop(state);
                let created = self.top_up(missing);
                state = self.lock();
                match created {
                    Ok(entries) => {
                        state.tracked -= missing - entries.len();
                        for (priority, resource) in entries {
                            let seq = state.next_seq;
                            state.next_seq += 1;
                            state.idle.push(Entry {
                                priority,
                                seq,
                                resource,
                            });
                        }
                        self.released.notify_all();
                    }
                    Err(e) => {
                        state.tracked -= missing;
                        self.released.notify_all();
                        return Err(e);
                    }
                }
            } else {
                state = self
                    .released
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
    }

    /// Create up to `count` resources.
    /// Partial success is a success; the first error is returned when nothing could be created.
    fn top_up(&self, count: usize) -> Result<Vec<(u64, M::Resource)>, M::Error> {
        let mut created = Vec::with_capacity(count);
        let mut first_error = None;
        for _ in 0..count {
            match self.manager.create() {
                Ok(resource) => created.push((self.manager.priority(&resource), resource)),
                Err(e) => {
                    warn!("failed creating a pool resource: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) if created.is_empty() => Err(e),
            _ => {
                debug!("{} resources created out of {count}", created.len());
                Ok(created)
            }
        }
    }

    /// Give a checked out resource back to the pool
    pub fn free(&self, resource: M::Resource) {
        // ranked before locking: the manager may lock the resource
        let priority = self.manager.priority(&resource);
        let mut state = self.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.idle.push(Entry {
            priority,
            seq,
            resource,
        });
        drop(state);
        self.released.notify_one();
    }

    /// Destroy a checked out resource; it will never be handed out again
    pub fn invalidate(&self, resource: M::Resource) {
        // destroyed before its place is released, so that a replacement never overlaps it
        self.manager.destroy(resource);
        {
            let mut state = self.lock();
            state.tracked = state.tracked.saturating_sub(1);
        }
        self.released.notify_one();
    }

    /// Check a resource out, wrapped in a guard returning it to the pool when dropped
    pub fn allocation(&self) -> Result<Allocation<'_, M>, M::Error> {
        Ok(Allocation {
            pool: self,
            resource: Some(self.alloc()?),
        })
    }

    /// Run `f` with a checked out resource.
    /// The resource is freed, with its use bumped, when `f` succeeds and invalidated when it fails.
    pub fn with_allocation<T, E>(
        &self,
        f: impl FnOnce(&M::Resource) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<M::Error>,
    {
        let allocation = self.allocation()?;
        match f(&*allocation) {
            Ok(value) => Ok(value),
            Err(e) => {
                allocation.invalidate();
                Err(e)
            }
        }
    }
}

/// A resource checked out of an [`ObjectPool`].
///
/// Dropping the guard bumps the resource use and frees it back into the pool,
/// unless the thread is panicking, in which case the resource is invalidated.
pub struct Allocation<'a, M: PoolManager> {
    pool: &'a ObjectPool<M>,
    resource: Option<M::Resource>,
}

impl<M: PoolManager> Allocation<'_, M> {
    /// Destroy the resource instead of returning it to the pool
    pub fn invalidate(mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.invalidate(resource);
        }
    }
}

impl<M: PoolManager> Deref for Allocation<'_, M> {
    type Target = M::Resource;

    #[allow(clippy::expect_used)]
    fn deref(&self) -> &Self::Target {
        // only `invalidate` and `drop` take the resource, and both consume the guard
        self.resource
            .as_ref()
            .expect("an allocation always holds its resource")
    }
}

impl<M: PoolManager> Drop for Allocation<'_, M> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            if thread::panicking() {
                self.pool.invalidate(resource);
            } else {
                self.pool.manager.bump(&resource);
                self.pool.free(resource);
            }
        }
    }
}
