// src/recycle/mod.rs

//! Reference-counted pools with deferred teardown
//!
//! A [`Recycler`] owns at most one expensive entity (a root shell, a broker
//! link) and hands out [`Recyclable`] handles to it. The entity is built
//! lazily on first acquisition and torn down only after the last handle has
//! been released *and* a grace delay (15 s by default) has elapsed without a
//! new acquisition. Rapid sequential installs therefore share one channel
//! instead of reconnecting every time.
//!
//! # Example
//!
//! ```ignore
//! use sideloader::recycle::Recycler;
//!
//! let pool = Recycler::new(ShellFactory::new("su"));
//! let shell = pool.acquire()?;
//! shell.entity().exec(&["id"]).await?;
//! drop(shell); // teardown is armed, not executed
//! ```

mod manager;

pub use manager::RecyclerManager;

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Default grace period between the last release and teardown
pub const DEFAULT_RECYCLE_DELAY: Duration = Duration::from_secs(15);

/// Builds and destroys the entity a [`Recycler`] manages
pub trait RecycleFactory<T: ?Sized>: Send + Sync + 'static {
    /// Name used in log messages
    fn name(&self) -> &str;

    /// Construct a fresh entity
    fn make(&self) -> Result<Arc<T>>;

    /// Release the entity's own resources
    fn shutdown(&self, _entity: &T) -> Result<()> {
        Ok(())
    }

    /// Runs after every teardown; releases chained child resources
    fn on_recycle(&self) -> Result<()> {
        Ok(())
    }
}

struct PoolState<T: ?Sized> {
    entity: Option<Arc<T>>,
    /// Bumped each time a new entity is built
    epoch: u64,
    count: usize,
    timer: Option<JoinHandle<()>>,
    /// Bumped on every arm/cancel; a timer only fires for its own generation
    generation: u64,
    closed: bool,
}

struct Inner<T: ?Sized> {
    factory: Box<dyn RecycleFactory<T>>,
    delay: Duration,
    state: Mutex<PoolState<T>>,
}

/// Pool holding at most one live entity of type `T`
pub struct Recycler<T: ?Sized> {
    inner: Arc<Inner<T>>,
}

impl<T: ?Sized> Clone for Recycler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ?Sized + Send + Sync + 'static> Recycler<T> {
    /// Create a pool with the default recycle delay
    pub fn new<F: RecycleFactory<T>>(factory: F) -> Self {
        Self::with_delay(factory, DEFAULT_RECYCLE_DELAY)
    }

    /// Create a pool with a custom recycle delay
    pub fn with_delay<F: RecycleFactory<T>>(factory: F, delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory: Box::new(factory),
                delay,
                state: Mutex::new(PoolState {
                    entity: None,
                    epoch: 0,
                    count: 0,
                    timer: None,
                    generation: 0,
                    closed: false,
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.factory.name()
    }

    pub fn delay(&self) -> Duration {
        self.inner.delay
    }

    /// Take a handle to the pooled entity, building it if necessary
    ///
    /// Cancels any pending teardown. Factory errors are returned as-is and
    /// leave the pool empty.
    pub fn acquire(&self) -> Result<Recyclable<T>> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(Error::InvalidState(format!(
                "recycler '{}' is closed",
                self.name()
            )));
        }

        if let Some(timer) = state.timer.take() {
            timer.abort();
            debug!("Recycler[{}]: pending teardown cancelled", self.name());
        }
        state.generation += 1;

        let entity = match &state.entity {
            Some(entity) => Arc::clone(entity),
            None => {
                let entity = self.inner.factory.make()?;
                state.epoch += 1;
                state.entity = Some(Arc::clone(&entity));
                debug!("Recycler[{}]: entity created", self.name());
                entity
            }
        };
        state.count += 1;

        Ok(Recyclable {
            entity,
            epoch: state.epoch,
            pool: Arc::downgrade(&self.inner),
            recycled: AtomicBool::new(false),
        })
    }

    /// Tear the entity down now, ignoring outstanding handles
    ///
    /// Handles acquired before this call stay usable as plain references
    /// but no longer count towards the new entity.
    pub fn recycle_forcibly(&self) {
        let torn_down = {
            let mut state = self.inner.state.lock();
            Inner::cancel_timer(&mut state);
            state.count = 0;
            self.inner.teardown_locked(&mut state)
        };
        if torn_down {
            self.inner.after_teardown();
        }
    }

    /// Tear the entity down only if it is still the one built at `epoch`
    ///
    /// Lets a holder of a dead handle discard it without destroying a
    /// replacement another holder already built. Returns whether a teardown
    /// happened.
    pub fn recycle_if_epoch(&self, epoch: u64) -> bool {
        let torn_down = {
            let mut state = self.inner.state.lock();
            if state.entity.is_none() || state.epoch != epoch {
                debug!(
                    "Recycler[{}]: epoch {} already replaced, keeping current entity",
                    self.name(),
                    epoch
                );
                return false;
            }
            Inner::cancel_timer(&mut state);
            state.count = 0;
            self.inner.teardown_locked(&mut state)
        };
        if torn_down {
            self.inner.after_teardown();
        }
        torn_down
    }

    /// Close the pool; later acquisitions fail
    pub fn close(&self) {
        let torn_down = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            Inner::cancel_timer(&mut state);
            state.count = 0;
            self.inner.teardown_locked(&mut state)
        };
        if torn_down {
            self.inner.after_teardown();
        }
        debug!("Recycler[{}]: closed", self.name());
    }

    pub fn reference_count(&self) -> usize {
        self.inner.state.lock().count
    }

    /// Whether an entity is currently built
    pub fn is_live(&self) -> bool {
        self.inner.state.lock().entity.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }
}

impl<T: ?Sized + 'static> fmt::Debug for Recycler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Recycler")
            .field("name", &self.inner.factory.name())
            .field("count", &state.count)
            .field("live", &state.entity.is_some())
            .field("closed", &state.closed)
            .finish()
    }
}

impl<T: ?Sized + Send + Sync + 'static> Inner<T> {
    fn cancel_timer(state: &mut PoolState<T>) {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.generation += 1;
    }

    /// Drop one reference taken at `epoch`
    fn release(self: &Arc<Self>, epoch: u64) {
        let mut state = self.state.lock();
        if state.entity.is_none() || state.epoch != epoch {
            // Handle outlived a forced recycle
            return;
        }
        state.count = state.count.saturating_sub(1);
        if state.count > 0 || state.closed {
            return;
        }

        Self::cancel_timer(&mut state);
        let generation = state.generation;
        let Some(handle) = timer_runtime() else {
            warn!(
                "Recycler[{}]: no timer runtime, tearing down immediately",
                self.factory.name()
            );
            let torn_down = self.teardown_locked(&mut state);
            drop(state);
            if torn_down {
                self.after_teardown();
            }
            return;
        };

        let weak = Arc::downgrade(self);
        let delay = self.delay;
        state.timer = Some(handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.expire(generation);
            }
        }));
        debug!(
            "Recycler[{}]: teardown armed for {:?}",
            self.factory.name(),
            delay
        );
    }

    fn expire(&self, generation: u64) {
        let torn_down = {
            let mut state = self.state.lock();
            if state.generation != generation || state.count > 0 {
                return;
            }
            state.timer = None;
            self.teardown_locked(&mut state)
        };
        if torn_down {
            self.after_teardown();
        }
    }

    /// Remove and shut down the entity while the lock is held
    fn teardown_locked(&self, state: &mut PoolState<T>) -> bool {
        let Some(entity) = state.entity.take() else {
            return false;
        };
        if let Err(e) = self.factory.shutdown(&entity) {
            error!("Recycler[{}]: shutdown failed: {}", self.factory.name(), e);
        }
        debug!("Recycler[{}]: entity torn down", self.factory.name());
        true
    }

    fn after_teardown(&self) {
        if let Err(e) = self.factory.on_recycle() {
            error!(
                "Recycler[{}]: on_recycle hook failed: {}",
                self.factory.name(),
                e
            );
        }
    }
}

/// Runtime that executes deferred teardown
///
/// Uses the caller's runtime when there is one, otherwise a single-worker
/// background runtime started on first use.
fn timer_runtime() -> Option<Handle> {
    if let Ok(handle) = Handle::try_current() {
        return Some(handle);
    }

    static BACKGROUND: OnceLock<Option<Runtime>> = OnceLock::new();
    BACKGROUND
        .get_or_init(|| {
            Builder::new_multi_thread()
                .worker_threads(1)
                .thread_name("recycler-timer")
                .enable_time()
                .build()
                .map_err(|e| error!("Failed to start recycler timer runtime: {}", e))
                .ok()
        })
        .as_ref()
        .map(|rt| rt.handle().clone())
}

/// Caller-held handle to a pooled entity
///
/// Releasing is idempotent: [`Recyclable::recycle`] may be called any number
/// of times, from any thread, and the pool sees exactly one release. Dropping
/// the handle releases it too.
pub struct Recyclable<T: ?Sized + Send + Sync + 'static> {
    entity: Arc<T>,
    epoch: u64,
    pool: Weak<Inner<T>>,
    recycled: AtomicBool,
}

impl<T: ?Sized + Send + Sync + 'static> Recyclable<T> {
    pub fn entity(&self) -> &Arc<T> {
        &self.entity
    }

    /// Build number of the entity this handle refers to
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether the pool still holds the entity this handle refers to
    pub fn is_current(&self) -> bool {
        self.pool.upgrade().is_some_and(|pool| {
            let state = pool.state.lock();
            state.entity.is_some() && state.epoch == self.epoch
        })
    }

    /// Give the reference back to the pool
    pub fn recycle(&self) {
        if self
            .recycled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        if let Some(pool) = self.pool.upgrade() {
            pool.release(self.epoch);
        }
    }

    pub fn is_recycled(&self) -> bool {
        self.recycled.load(Ordering::Acquire)
    }
}

impl<T: ?Sized + Send + Sync + 'static> Deref for Recyclable<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.entity
    }
}

impl<T: ?Sized + Send + Sync + 'static> Drop for Recyclable<T> {
    fn drop(&mut self) {
        self.recycle();
    }
}

impl<T: ?Sized + Send + Sync + 'static> fmt::Debug for Recyclable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recyclable")
            .field("epoch", &self.epoch)
            .field("recycled", &self.is_recycled())
            .finish()
    }
}
