//! Cooperative cancellation for in-flight requests.
//!
//! A [`CancellationSource`] is held by whoever may abort a request (the
//! transport on client disconnect, the executor on timeout or forced shutdown).
//! Middleware only ever see the read-only [`CancellationToken`]: they poll
//! [`is_cancelled`](CancellationToken::is_cancelled) or await
//! [`cancelled`](CancellationToken::cancelled) and unwind on their own.
//!
//! Sources can be linked to parent tokens so that a single executor-wide source
//! fans out to every request it is running.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::watch;

#[derive(Debug)]
struct Signal {
    fired: AtomicBool,
    tx: watch::Sender<bool>,
}

impl Signal {
    fn new() -> Arc<Self> {
        let (tx, _) = watch::channel(false);
        Arc::new(Self {
            fired: AtomicBool::new(false),
            tx,
        })
    }

    fn fire(&self) -> bool {
        let first = !self.fired.swap(true, Ordering::AcqRel);
        if first {
            self.tx.send_replace(true);
        }
        first
    }

    fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The receiver is dropped only with the sender we own, so an Err here
        // can't happen while `self` is alive.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

/// The write side of a cancellation signal.
///
/// # Examples
///
/// ```
/// use onionpipe::context::cancel::CancellationSource;
///
/// let source = CancellationSource::new();
/// let token = source.token();
/// assert!(!token.is_cancelled());
///
/// source.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationSource {
    signal: Arc<Signal>,
    parents: Arc<[CancellationToken]>,
}

impl CancellationSource {
    /// Creates an independent source.
    pub fn new() -> Self {
        Self::linked([])
    }

    /// Creates a source whose tokens also report cancellation when `parent` fires.
    ///
    /// Cancelling the child never affects the parent.
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self::linked([parent.clone()])
    }

    /// Creates a source whose tokens fire when it or any of `parents` fires.
    pub fn linked(parents: impl IntoIterator<Item = CancellationToken>) -> Self {
        Self {
            signal: Signal::new(),
            parents: parents.into_iter().collect(),
        }
    }

    /// Fires the signal. Returns `true` if this call was the one that fired it.
    pub fn cancel(&self) -> bool {
        self.signal.fire()
    }

    /// Returns `true` if this source or any ancestor was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token().is_cancelled()
    }

    /// Returns a read-only token observing this source.
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            signal: Arc::clone(&self.signal),
            parents: Arc::clone(&self.parents),
        }
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

/// The read side of a cancellation signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    signal: Arc<Signal>,
    parents: Arc<[CancellationToken]>,
}

impl CancellationToken {
    /// A token that never fires.
    pub fn never() -> Self {
        CancellationSource::new().token()
    }

    /// Returns `true` once this token or any ancestor fired.
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_fired() || self.parents.iter().any(CancellationToken::is_cancelled)
    }

    /// Resolves once the token (or an ancestor) fires. Resolves immediately if it
    /// already did.
    pub async fn cancelled(&self) {
        let mut signals = Vec::new();
        self.collect_signals(&mut signals);

        let mut pending: Vec<_> = signals.iter().map(|signal| Box::pin(signal.wait())).collect();
        std::future::poll_fn(|cx| {
            for wait in pending.iter_mut() {
                if wait.as_mut().poll(cx).is_ready() {
                    return std::task::Poll::Ready(());
                }
            }
            std::task::Poll::Pending
        })
        .await;
    }

    fn collect_signals(&self, out: &mut Vec<Arc<Signal>>) {
        if !out.iter().any(|known| Arc::ptr_eq(known, &self.signal)) {
            out.push(Arc::clone(&self.signal));
        }
        for parent in self.parents.iter() {
            parent.collect_signals(out);
        }
    }
}
