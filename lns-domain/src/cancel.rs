//! [`ScopedCancellation`] — ties one uplink's processing to a single release
//! point.
//!
//! A handle pairs an optional owned [`Disposable`] (typically the deadline
//! timer armed when the uplink arrived) with a cancellation signal.  Code
//! that only needs cancellation semantics borrows the bare signal through
//! [`ScopedCancellation::signal`]; nothing downstream needs to know about
//! the resource.
//!
//! Releasing the handle, explicitly or by dropping it, disposes the resource
//! once and triggers the signal so any wait still parked on it unblocks.
//! The signal is a child of the token supplied at construction, so
//! releasing one uplink's handle never cancels its parent.

use std::fmt;
use std::sync::Arc;

// ---

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Disposable
// ---------------------------------------------------------------------------

/// A resource with an explicit end of life.
pub trait Disposable: Send + Sync {
    // ---
    fn dispose(&self);
}

// ---------------------------------------------------------------------------
// DeadlineTimer
// ---------------------------------------------------------------------------

/// Timer task that cancels a signal when the deadline passes.  Disposing it
/// aborts the task.
struct DeadlineTimer {
    // ---
    task: JoinHandle<()>,
}

impl Disposable for DeadlineTimer {
    fn dispose(&self) {
        self.task.abort();
    }
}

// ---------------------------------------------------------------------------
// ScopedCancellation
// ---------------------------------------------------------------------------

pub struct ScopedCancellation {
    // ---
    resource: Option<Arc<dyn Disposable>>,

    /// Boxed in an `Arc` so equality can compare signal instances.
    signal: Arc<CancellationToken>,

    released: bool,
}

// ---

impl ScopedCancellation {
    // ---
    /// Wrap `resource` with a fresh child of `parent`.
    pub fn new(resource: Option<Arc<dyn Disposable>>, parent: &CancellationToken) -> Self {
        // ---
        Self {
            resource,
            signal: Arc::new(parent.child_token()),
            released: false,
        }
    }

    // ---

    /// A handle with no resource and no parent.
    pub fn detached() -> Self {
        Self::new(None, &CancellationToken::new())
    }

    // ---

    /// A handle whose signal fires at `deadline` (or when `parent` fires).
    ///
    /// The owned resource is the timer task; releasing the handle before the
    /// deadline stops the timer.  Must be called inside a tokio runtime.
    pub fn with_deadline(parent: &CancellationToken, deadline: Instant) -> Self {
        // ---
        let signal = parent.child_token();
        let timer_signal = signal.clone();

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::trace!("processing deadline reached");
                    timer_signal.cancel();
                }
                _ = timer_signal.cancelled() => {}
            }
        });

        Self {
            resource: Some(Arc::new(DeadlineTimer { task })),
            signal: Arc::new(signal),
            released: false,
        }
    }

    // ---

    /// The bare cancellation signal, for code that only needs to observe or
    /// await cancellation.
    pub fn signal(&self) -> &CancellationToken {
        &self.signal
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Trigger the signal early without releasing the resource.
    pub fn cancel(&self) {
        self.signal.cancel();
    }

    pub fn has_resource(&self) -> bool {
        self.resource.is_some()
    }

    // ---

    /// Release the handle: dispose the owned resource (if any) and trigger
    /// the signal.  Equivalent to dropping it.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        // ---
        if self.released {
            return;
        }
        self.released = true;

        if let Some(resource) = self.resource.as_ref() {
            resource.dispose();
        }
        self.signal.cancel();
    }
}

// ---

impl Drop for ScopedCancellation {
    fn drop(&mut self) {
        self.release_once();
    }
}

// ---

/// Identity equality: same resource allocation and same signal instance.
/// Cancellation state plays no part.
impl PartialEq for ScopedCancellation {
    fn eq(&self, other: &Self) -> bool {
        // ---
        let same_resource = match (&self.resource, &other.resource) {
            (None, None) => true,
            (Some(a), Some(b)) => std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
            _ => false,
        };
        same_resource && Arc::ptr_eq(&self.signal, &other.signal)
    }
}

impl Eq for ScopedCancellation {}

// ---

impl AsRef<CancellationToken> for ScopedCancellation {
    fn as_ref(&self) -> &CancellationToken {
        &self.signal
    }
}

impl From<&ScopedCancellation> for CancellationToken {
    fn from(scope: &ScopedCancellation) -> Self {
        scope.signal().clone()
    }
}

impl fmt::Debug for ScopedCancellation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedCancellation")
            .field("has_resource", &self.resource.is_some())
            .field("cancelled", &self.signal.is_cancelled())
            .field("released", &self.released)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    // ---

    #[derive(Default)]
    struct CountingResource {
        disposed: AtomicUsize,
    }

    impl Disposable for CountingResource {
        fn dispose(&self) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Stand-in for any API that only knows about bare signals.
    async fn wait_for(signal: &CancellationToken) {
        signal.cancelled().await;
    }

    // ---

    #[test]
    fn release_without_resource_is_a_no_op() {
        // ---
        let scope = ScopedCancellation::detached();
        assert!(!scope.has_resource());
        scope.release();
    }

    // ---

    #[test]
    fn release_disposes_resource_exactly_once() {
        // ---
        let resource = Arc::new(CountingResource::default());
        let scope = ScopedCancellation::new(
            Some(resource.clone() as Arc<dyn Disposable>),
            &CancellationToken::new(),
        );
        let signal = scope.signal().clone();

        scope.release();

        assert_eq!(resource.disposed.load(Ordering::SeqCst), 1);
        assert!(signal.is_cancelled(), "release must trigger the signal");
    }

    // ---

    #[test]
    fn drop_disposes_resource_exactly_once() {
        // ---
        let resource = Arc::new(CountingResource::default());
        {
            let _scope = ScopedCancellation::new(
                Some(resource.clone() as Arc<dyn Disposable>),
                &CancellationToken::new(),
            );
        }
        assert_eq!(resource.disposed.load(Ordering::SeqCst), 1);
    }

    // ---

    #[test]
    fn handles_over_the_same_token_are_not_equal() {
        // ---
        let token = CancellationToken::new();
        let a = ScopedCancellation::new(None, &token);
        let b = ScopedCancellation::new(None, &token.clone());

        assert_ne!(a, b);
        assert_eq!(a, a);
    }

    // ---

    #[test]
    fn handles_sharing_a_resource_differ_by_signal() {
        // ---
        let resource: Arc<dyn Disposable> = Arc::new(CountingResource::default());
        let token = CancellationToken::new();
        let a = ScopedCancellation::new(Some(resource.clone()), &token);
        let b = ScopedCancellation::new(Some(resource), &token);

        assert_ne!(a, b);
    }

    // ---

    #[test]
    fn parent_cancellation_reaches_the_handle_but_not_back() {
        // ---
        let parent = CancellationToken::new();
        let scope = ScopedCancellation::new(None, &parent);
        scope.cancel();
        assert!(scope.is_cancelled());
        assert!(!parent.is_cancelled(), "child must not cancel its parent");

        let scope = ScopedCancellation::new(None, &parent);
        parent.cancel();
        assert!(scope.signal().is_cancelled());
    }

    // ---

    #[tokio::test]
    async fn handle_stands_in_for_a_bare_signal() {
        // ---
        let scope = ScopedCancellation::detached();
        let bare: CancellationToken = (&scope).into();

        scope.cancel();
        wait_for(scope.signal()).await;
        wait_for(scope.as_ref()).await;
        assert!(bare.is_cancelled());
    }

    // ---

    #[tokio::test(start_paused = true)]
    async fn deadline_fires_the_signal() {
        // ---
        let deadline = Instant::now() + Duration::from_millis(500);
        let scope = ScopedCancellation::with_deadline(&CancellationToken::new(), deadline);

        assert!(!scope.is_cancelled());
        wait_for(scope.signal()).await;
        assert!(Instant::now() >= deadline);
    }

    // ---

    #[tokio::test(start_paused = true)]
    async fn release_before_deadline_stops_the_timer() {
        // ---
        let parent = CancellationToken::new();
        let scope =
            ScopedCancellation::with_deadline(&parent, Instant::now() + Duration::from_secs(5));
        let signal = scope.signal().clone();

        scope.release();

        assert!(signal.is_cancelled());
        assert!(!parent.is_cancelled());
    }
}
