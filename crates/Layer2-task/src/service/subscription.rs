//! Cancellable completion subscriptions
//!
//! A subscription is the client half of a registration on the task service.
//! The service half ([`SubscriptionSender`]) pushes items until the client
//! cancels, the subscription is dropped, or the service closes.
//!
//! Cancelling is idempotent: cancelling twice, or cancelling a subscription
//! whose item was already delivered, has no observable effect.

use futures::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use wpok_foundation::Result;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Create a linked sender/subscription pair.
///
/// The subscription is also cancelled when `parent` is (service shutdown).
pub fn subscription_channel<T>(
    label: impl Into<String>,
    capacity: usize,
    parent: &CancellationToken,
) -> (SubscriptionSender<T>, Subscription<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let token = parent.child_token();
    let id = NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed);

    (
        SubscriptionSender {
            id,
            tx,
            token: token.clone(),
        },
        Subscription {
            id,
            label: label.into(),
            rx,
            token,
        },
    )
}

// ============================================================================
// Client half
// ============================================================================

/// Client side of a registration
pub struct Subscription<T> {
    id: u64,
    label: String,
    rx: mpsc::Receiver<Result<T>>,
    token: CancellationToken,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next item, or `None` once cancelled or the service side is gone
    pub async fn recv(&mut self) -> Option<Result<T>> {
        if self.token.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            item = self.rx.recv() => item,
            _ = self.token.cancelled() => None,
        }
    }

    /// Release the registration. Returns `true` only for the call that
    /// actually cancelled.
    pub fn cancel(&mut self) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.token.cancel();
        self.rx.close();
        trace!("Cancelled subscription {} ({})", self.id, self.label);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.token.is_cancelled() {
            return Poll::Ready(None);
        }
        this.rx.poll_recv(cx)
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

// ============================================================================
// Service half
// ============================================================================

/// Service side of a registration
pub struct SubscriptionSender<T> {
    id: u64,
    tx: mpsc::Sender<Result<T>>,
    token: CancellationToken,
}

impl<T> Clone for SubscriptionSender<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            tx: self.tx.clone(),
            token: self.token.clone(),
        }
    }
}

impl<T> SubscriptionSender<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Deliver an item. Returns `false` if the subscriber is gone.
    pub async fn send(&self, item: Result<T>) -> bool {
        if self.is_closed() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            sent = self.tx.send(item) => sent.is_ok(),
        }
    }

    /// Deliver without waiting; fails when the buffer is full or the
    /// subscriber is gone
    pub fn try_send(&self, item: Result<T>) -> bool {
        !self.is_closed() && self.tx.try_send(item).is_ok()
    }

    /// Resolves when the subscriber cancels or the service shuts down
    pub async fn cancelled(&self) {
        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = self.tx.closed() => {}
        }
    }

    /// Whether the registration has been released
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled() || self.tx.is_closed()
    }
}
