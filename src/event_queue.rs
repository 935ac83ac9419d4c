//! Three-tier priority event queue with a dedicated worker thread
//!
//! Producers append events to one of three FIFO tiers. A single worker
//! thread drains the tiers in priority order. Preemption is cooperative:
//! before taking each event the worker re-checks whether a higher tier has
//! received work and, if so, abandons the current pass so the next cycle
//! starts again from the top. A burst of low priority events therefore
//! delays an urgent event by at most one handler invocation.
//!
//! ```text
//!   add(H) ─┐      ┌──────────── worker cycle ─────────────┐
//!   add(M) ─┼──►   │ drain Highest  (never interrupted)     │
//!   add(L) ─┘      │ drain Medium   (stops if Highest > 0)  │
//!                  │ drain Lowest   (stops if H or M > 0)   │
//!                  │ all empty? wait for add / shutdown     │
//!                  └────────────────────────────────────────┘
//! ```

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::QueueError;

/// Tier an event is queued at
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Highest,
    Medium,
    Lowest,
}

impl Priority {
    /// All tiers in drain order
    pub const ALL: [Priority; 3] = [Priority::Highest, Priority::Medium, Priority::Lowest];
}

/// Consumer of dequeued events
///
/// Called on the worker thread, and on the caller's thread during
/// [`EventQueue::clear`] and the final drain of [`EventQueue::shutdown`].
/// A panic inside `handle` is caught and logged; that event is lost and the
/// queue keeps serving the rest.
pub trait EventHandler<T>: Send + Sync {
    fn handle(&self, event: T);
}

impl<T, F> EventHandler<T> for F
where
    F: Fn(T) + Send + Sync,
{
    fn handle(&self, event: T) {
        self(event)
    }
}

/// Tier storage, guarded by one mutex per queue
struct Tiers<T> {
    highest: VecDeque<T>,
    medium: VecDeque<T>,
    lowest: VecDeque<T>,
    running: bool,
}

impl<T> Tiers<T> {
    fn new() -> Self {
        Self {
            highest: VecDeque::new(),
            medium: VecDeque::new(),
            lowest: VecDeque::new(),
            running: true,
        }
    }

    fn tier_mut(&mut self, priority: Priority) -> &mut VecDeque<T> {
        match priority {
            Priority::Highest => &mut self.highest,
            Priority::Medium => &mut self.medium,
            Priority::Lowest => &mut self.lowest,
        }
    }

    /// Whether a pass over `priority` must yield to a higher tier
    fn interrupted(&self, priority: Priority) -> bool {
        match priority {
            Priority::Highest => false,
            Priority::Medium => !self.highest.is_empty(),
            Priority::Lowest => !self.highest.is_empty() || !self.medium.is_empty(),
        }
    }

    fn len(&self) -> usize {
        self.highest.len() + self.medium.len() + self.lowest.len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainMode {
    /// Worker pass: honours shutdown and interrupt predicates
    Worker,
    /// Flush pass: takes everything currently queued
    Flush,
}

struct Shared<T> {
    name: String,
    tiers: Mutex<Tiers<T>>,
    new_item: Condvar,
    handler: Box<dyn EventHandler<T>>,
    handled: AtomicU64,
}

impl<T> Shared<T> {
    fn drain(&self, priority: Priority, mode: DrainMode) -> usize {
        let mut handled = 0;
        loop {
            let event = {
                let mut tiers = self.tiers.lock();
                if mode == DrainMode::Worker && (!tiers.running || tiers.interrupted(priority)) {
                    break;
                }
                match tiers.tier_mut(priority).pop_front() {
                    Some(event) => event,
                    None => break,
                }
            };
            // A panicking handler must not take the worker down with it
            if panic::catch_unwind(AssertUnwindSafe(|| self.handler.handle(event))).is_err() {
                tracing::error!("Event queue '{}': handler panicked, event dropped", self.name);
            }
            handled += 1;
        }
        self.handled.fetch_add(handled as u64, Ordering::Relaxed);
        handled
    }

    fn drain_all(&self, mode: DrainMode) -> usize {
        Priority::ALL
            .iter()
            .map(|&priority| self.drain(priority, mode))
            .sum()
    }

    fn is_running(&self) -> bool {
        self.tiers.lock().running
    }

    fn wait_for_work(&self) {
        let mut tiers = self.tiers.lock();
        while tiers.running && tiers.is_empty() {
            self.new_item.wait(&mut tiers);
        }
    }

    fn run(&self) {
        tracing::debug!("Event queue worker '{}' started", self.name);
        while self.is_running() {
            self.drain_all(DrainMode::Worker);
            self.wait_for_work();
        }
        tracing::debug!("Event queue worker '{}' exiting", self.name);
    }
}

/// Priority event queue owning one worker thread
pub struct EventQueue<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> EventQueue<T> {
    /// Create the queue and start its worker
    ///
    /// `stack_size` is a hint; the platform may round it up to its minimum.
    pub fn create<H>(name: impl Into<String>, handler: H, stack_size: usize) -> Result<Self, QueueError>
    where
        H: EventHandler<T> + 'static,
    {
        let name = name.into();
        let shared = Arc::new(Shared {
            name: name.clone(),
            tiers: Mutex::new(Tiers::new()),
            new_item: Condvar::new(),
            handler: Box::new(handler),
            handled: AtomicU64::new(0),
        });

        let worker_shared = shared.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .stack_size(stack_size)
            .spawn(move || worker_shared.run())
            .map_err(|e| QueueError::Spawn(e.to_string()))?;

        tracing::debug!("Created event queue '{}' (stack {} bytes)", name, stack_size);

        Ok(Self {
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Append an event to the tail of its tier and wake the worker
    ///
    /// Never waits on the worker. The event is dropped if space for it
    /// cannot be allocated or the queue has been shut down.
    pub fn add(&self, event: T, priority: Priority) -> Result<(), QueueError> {
        let mut tiers = self.shared.tiers.lock();
        if !tiers.running {
            return Err(QueueError::Stopped);
        }

        let tier = tiers.tier_mut(priority);
        if tier.try_reserve(1).is_err() {
            drop(tiers);
            tracing::error!("Event queue '{}': alloc memory failed", self.shared.name);
            return Err(QueueError::AllocationFailed);
        }
        tier.push_back(event);
        drop(tiers);

        self.shared.new_item.notify_one();
        Ok(())
    }

    /// Hand every queued event to the handler on the calling thread
    ///
    /// Returns the number of events handled.
    pub fn clear(&self) -> usize {
        self.shared.drain_all(DrainMode::Flush)
    }

    /// Stop the worker, then handle whatever is still queued
    ///
    /// Every event queued before this call is handled exactly once. Safe to
    /// call more than once.
    pub fn shutdown(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };

        self.shared.tiers.lock().running = false;
        self.shared.new_item.notify_all();

        if handle.thread().id() == thread::current().id() {
            tracing::warn!(
                "Event queue '{}' shut down from its own worker, not joining",
                self.shared.name
            );
        } else if handle.join().is_err() {
            tracing::error!("Event queue '{}' worker panicked", self.shared.name);
        }

        let flushed = self.shared.drain_all(DrainMode::Flush);
        tracing::debug!(
            "Event queue '{}' stopped, {} pending events handled on shutdown",
            self.shared.name,
            flushed
        );
    }

    /// Shut down and release the queue
    pub fn destroy(self) {
        self.shutdown();
    }

    /// Queue name, also used as the worker thread name
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Number of events waiting across all tiers
    pub fn len(&self) -> usize {
        self.shared.tiers.lock().len()
    }

    /// Number of events waiting in one tier
    pub fn tier_len(&self, priority: Priority) -> usize {
        self.shared.tiers.lock().tier_mut(priority).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the queue still accepts events
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Total events handed to the handler so far
    pub fn handled_count(&self) -> u64 {
        self.shared.handled.load(Ordering::Relaxed)
    }
}

impl<T: Send + 'static> Drop for EventQueue<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
