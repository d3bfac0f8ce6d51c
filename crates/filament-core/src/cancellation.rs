//! Generation-based cancellation for queued operations.
//!
//! A [`CancellationSource`] owns an atomic generation counter. Every
//! [`CancellationToken`] handed out snapshots the generation at the time it
//! was issued; the token reads as cancelled as soon as the source's
//! generation moves past that snapshot, or while the source is destroyed.
//!
//! This gives three useful properties for asynchronous I/O:
//!
//! - `cancel()` invalidates every operation issued so far, while operations
//!   issued afterwards start with a fresh, valid token.
//! - `destroy()` invalidates everything, including tokens issued later, until
//!   the source is revived with `reset()` or `cancel()`.
//! - Checking a token is a single atomic load. No lock, no allocation.
//!
//! # Example
//!
//! ```
//! use filament_core::cancellation::CancellationSource;
//!
//! let source = CancellationSource::new();
//! let before = source.token();
//!
//! source.cancel();
//! let after = source.token();
//!
//! assert!(before.is_cancelled());
//! assert!(!after.is_cancelled());
//!
//! source.destroy();
//! assert!(after.is_cancelled());
//! assert!(source.token().is_cancelled());
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// High bit of the generation word, set while the source is destroyed.
const DESTROYED: u64 = 1 << 63;

/// Mask selecting the generation counter.
const GENERATION_MASK: u64 = !DESTROYED;

#[inline]
fn next_generation(current: u64) -> u64 {
    (current & GENERATION_MASK).wrapping_add(1) & GENERATION_MASK
}

/// The owning side of a cancellation pair.
///
/// A source is held by whoever may cancel (for file I/O, the per-handle
/// service state). It is deliberately not `Clone`: there is exactly one
/// place that decides when outstanding work becomes stale.
pub struct CancellationSource {
    state: Arc<AtomicU64>,
}

impl CancellationSource {
    /// Create a live source at generation zero.
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Issue a token bound to the current generation.
    #[inline]
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            state: self.state.clone(),
            snapshot: self.state.load(Ordering::Acquire),
        }
    }

    /// Cancel every token issued so far.
    ///
    /// Tokens issued after this call are valid until the next change.
    /// A destroyed source is revived.
    pub fn cancel(&self) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some(next_generation(cur))
            });
        tracing::trace!(target: "filament_core::cancellation", "source cancelled");
    }

    /// Mark the source as destroyed.
    ///
    /// Every existing token and every token issued while destroyed reads
    /// as cancelled.
    pub fn destroy(&self) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some(next_generation(cur) | DESTROYED)
            });
        tracing::trace!(target: "filament_core::cancellation", "source destroyed");
    }

    /// Revive a destroyed source with a fresh generation.
    ///
    /// Has no effect on a live source. Tokens issued while destroyed stay
    /// cancelled.
    pub fn reset(&self) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                (cur & DESTROYED != 0).then(|| next_generation(cur))
            });
    }

    /// Whether the source is currently destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.state.load(Ordering::Acquire) & DESTROYED != 0
    }

    /// Current generation, without the destroyed flag.
    pub fn generation(&self) -> u64 {
        self.state.load(Ordering::Acquire) & GENERATION_MASK
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSource")
            .field("generation", &self.generation())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// A cheap, cloneable observer of a [`CancellationSource`].
///
/// Once a token reads as cancelled it never reads as live again.
#[derive(Clone)]
pub struct CancellationToken {
    state: Arc<AtomicU64>,
    snapshot: u64,
}

impl CancellationToken {
    /// Check whether the operation owning this token should be abandoned.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        let current = self.state.load(Ordering::Acquire);
        current != self.snapshot || current & DESTROYED != 0
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("generation", &(self.snapshot & GENERATION_MASK))
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

static_assertions::assert_impl_all!(CancellationSource: Send, Sync);
static_assertions::assert_impl_all!(CancellationToken: Send, Sync, Clone);
static_assertions::assert_not_impl_any!(CancellationSource: Clone);

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fresh_token_is_live() {
        let source = CancellationSource::new();
        let token = source.token();
        assert!(!token.is_cancelled());
        assert!(!source.is_destroyed());
        assert_eq!(source.generation(), 0);
    }

    #[test]
    fn test_cancel_affects_only_earlier_tokens() {
        let source = CancellationSource::new();
        let first = source.token();
        let second = first.clone();

        source.cancel();
        let third = source.token();

        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
        assert!(!third.is_cancelled());

        source.cancel();
        assert!(third.is_cancelled());
        assert!(!source.token().is_cancelled());
    }

    #[test]
    fn test_destroy_cancels_future_tokens() {
        let source = CancellationSource::new();
        let before = source.token();

        source.destroy();
        let during = source.token();

        assert!(source.is_destroyed());
        assert!(before.is_cancelled());
        assert!(during.is_cancelled());
    }

    #[test]
    fn test_reset_revives_destroyed_source() {
        let source = CancellationSource::new();
        source.destroy();
        let during = source.token();

        source.reset();
        assert!(!source.is_destroyed());
        assert!(during.is_cancelled());
        assert!(!source.token().is_cancelled());
    }

    #[test]
    fn test_reset_on_live_source_is_noop() {
        let source = CancellationSource::new();
        let token = source.token();
        source.reset();
        assert!(!token.is_cancelled());
        assert_eq!(source.generation(), 0);
    }

    #[test]
    fn test_cancel_revives_destroyed_source() {
        let source = CancellationSource::new();
        source.destroy();
        source.cancel();
        assert!(!source.is_destroyed());
        assert!(!source.token().is_cancelled());
    }

    #[test]
    fn test_cancelled_token_stays_cancelled() {
        let source = CancellationSource::new();
        let token = source.token();
        source.destroy();
        source.reset();
        source.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_token_observed_across_threads() {
        let source = CancellationSource::new();
        let token = source.token();

        let observer = thread::spawn(move || {
            while !token.is_cancelled() {
                thread::yield_now();
            }
            true
        });

        source.cancel();
        assert!(observer.join().unwrap());
    }
}
