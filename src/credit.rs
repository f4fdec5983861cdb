//! Bounded credit pool for producer/consumer backpressure.
//!
//! The capture side takes one credit before it requests and enqueues a chunk;
//! the display side gives the credit back once that chunk has been fully
//! reassembled. With `N` credits, at most `N` chunks can be in flight between
//! the two, no matter how chunk sizes vary or how long reassembly takes.
//!
//! # Design
//!
//! The pool uses the semaphore pattern:
//! 1. Semaphore permits = credits currently available (pre-seeded to capacity)
//! 2. Acquiring forgets the permit; the [`Credit`] token owns it from then on
//! 3. Dropping (or explicitly releasing) the token adds the permit back
//!
//! Releasing more credits than were handed out is a programming error and
//! panics. Closing the pool wakes every waiting producer with
//! [`CaptureError::CreditPoolClosed`], which is how a failed consumer stops the
//! producer from waiting forever.
//!
//! # Example
//!
//! ```
//! use raster_daq::credit::CreditPool;
//!
//! # tokio_test::block_on(async {
//! let pool = CreditPool::new(2);
//! let credit = pool.acquire().await?;
//! assert_eq!(pool.outstanding(), 1);
//!
//! drop(credit); // returned to the pool
//! assert_eq!(pool.available(), 2);
//! # Ok::<(), raster_daq::error::CaptureError>(())
//! # }).unwrap();
//! ```

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::CaptureError;

/// Default number of chunks allowed in flight.
pub const DEFAULT_CREDIT_CAPACITY: usize = 8;

/// Fixed-capacity pool of opaque credits.
pub struct CreditPool {
    semaphore: Semaphore,
    capacity: usize,
    /// Credits handed out and not yet returned
    outstanding: AtomicUsize,
    /// High-water mark of `outstanding`
    peak: AtomicUsize,
}

impl fmt::Debug for CreditPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreditPool")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .field("outstanding", &self.outstanding())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl CreditPool {
    /// Create a pool holding `capacity` credits.
    ///
    /// # Panics
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        assert!(capacity > 0, "credit pool capacity must be greater than 0");
        Arc::new(Self {
            semaphore: Semaphore::new(capacity),
            capacity,
            outstanding: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    /// Wait until a credit is available and take it.
    ///
    /// Fails only if the pool has been closed.
    pub async fn acquire(self: &Arc<Self>) -> Result<Credit, CaptureError> {
        if let Some(credit) = self.try_acquire() {
            return Ok(credit);
        }

        debug!(
            capacity = self.capacity,
            outstanding = self.outstanding(),
            "Credit pool exhausted, waiting for display loop"
        );
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| CaptureError::CreditPoolClosed)?;
        permit.forget();
        Ok(self.issue())
    }

    /// Take a credit without waiting.
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>) -> Option<Credit> {
        let permit = self.semaphore.try_acquire().ok()?;
        permit.forget();
        Some(self.issue())
    }

    fn issue(self: &Arc<Self>) -> Credit {
        let outstanding = self.outstanding.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(outstanding, Ordering::AcqRel);
        Credit {
            pool: Arc::clone(self),
        }
    }

    /// Return one credit to the pool.
    ///
    /// Normally called through [`Credit`]'s drop.
    ///
    /// # Panics
    /// Panics if no credit is outstanding, i.e. the release would push the
    /// pool beyond its capacity.
    pub fn release(&self) {
        let previous = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous.is_err() {
            panic!(
                "credit released beyond pool capacity {} - internal invariant violated",
                self.capacity
            );
        }
        self.semaphore.add_permits(1);
    }

    /// Refuse all further acquires and wake waiting producers.
    pub fn close(&self) {
        if !self.semaphore.is_closed() {
            warn!(
                outstanding = self.outstanding(),
                "Closing credit pool, producer will stop"
            );
            self.semaphore.close();
        }
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// Total credits N.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Credits ready to be acquired.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Credits currently held by in-flight chunks.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Largest number of credits that were ever outstanding at once.
    #[must_use]
    pub fn peak_outstanding(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }
}

/// One acquired credit. Returns itself to the pool when dropped.
pub struct Credit {
    pool: Arc<CreditPool>,
}

impl Credit {
    /// Return the credit now.
    pub fn release(self) {
        drop(self);
    }
}

impl fmt::Debug for Credit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credit")
            .field("outstanding", &self.pool.outstanding())
            .finish()
    }
}

impl Drop for Credit {
    fn drop(&mut self) {
        self.pool.release();
    }
}
