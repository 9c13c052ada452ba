//! Handler registry and inbound envelope dispatch.
//!
//! # How replies find their caller (for beginners)
//!
//! Every inbound envelope carries a `command` and a correlation `token`.  The
//! registry maps that pair to the *handlers* waiting for it.  A handler is one
//! of two things:
//!
//! - **One-shot**: a caller blocked in `send_and_await`.  It receives exactly
//!   one outcome through a `tokio::sync::oneshot` channel and is then removed.
//! - **Subscription**: a callback invoked for every matching event, either
//!   forever or a fixed number of times.
//!
//! Replies can arrive in any order.  Because the lookup is by `(command,
//! token)` and tokens are unique, a reply can only ever reach the caller that
//! sent the matching request.
//!
//! # Locking
//!
//! The table sits behind one `std::sync::Mutex`.  The lock is never held
//! across an `.await`, and callbacks are collected under the lock but invoked
//! after it is released, so a callback may freely register or unregister
//! handlers without deadlocking.
//!
//! Each subscription carries an `active` flag next to its callback.
//! `unregister` clears the flag under the lock and `dispatch` checks it right
//! before each call, so once `unregister` returns `true` no further call of
//! that callback begins.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use robot_core::{CommandId, CorrelationToken, Envelope, TARGET_UNSUPPORTED};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::domain::{ChannelError, RequestOutcome};

/// Callback invoked with the payload of each matching event.
pub type EventCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

// ── Handles and limits ────────────────────────────────────────────────────────

/// Opaque handle returned by [`HandlerRegistry::register_subscription`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How many more events a subscription may receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryLimit {
    /// Deliver every matching event until unsubscribed.
    Unbounded,
    /// Deliver this many more events, then remove the subscription.
    Remaining(u32),
}

impl DeliveryLimit {
    /// Converts the robot SDK's `repeat count` convention: any negative value
    /// means unbounded, otherwise the count is the number of deliveries.
    pub fn from_repeat_count(count: i64) -> Self {
        if count < 0 {
            DeliveryLimit::Unbounded
        } else {
            DeliveryLimit::Remaining(u32::try_from(count).unwrap_or(u32::MAX))
        }
    }

    /// Takes one delivery from the budget.  Returns `false` if none was left.
    fn consume(&mut self) -> bool {
        match self {
            DeliveryLimit::Unbounded => true,
            DeliveryLimit::Remaining(0) => false,
            DeliveryLimit::Remaining(n) => {
                *n -= 1;
                true
            }
        }
    }

    fn is_exhausted(&self) -> bool {
        matches!(self, DeliveryLimit::Remaining(0))
    }
}

// ── Handler variants ──────────────────────────────────────────────────────────

enum Handler {
    OneShot(oneshot::Sender<RequestOutcome>),
    Subscription {
        id: SubscriptionId,
        remaining: DeliveryLimit,
        active: Arc<AtomicBool>,
        callback: EventCallback,
    },
}

impl Handler {
    fn is_one_shot(&self) -> bool {
        matches!(self, Handler::OneShot(_))
    }

    fn is_exhausted_subscription(&self) -> bool {
        matches!(self, Handler::Subscription { remaining, .. } if remaining.is_exhausted())
    }
}

/// The receiving half of a pending request.
///
/// Resolves to the request's [`RequestOutcome`].  If the registration is
/// discarded without an outcome (for example by [`HandlerRegistry::clear`]),
/// it resolves to [`RequestOutcome::ConnectionLost`].
#[derive(Debug)]
pub struct PendingReply {
    rx: oneshot::Receiver<RequestOutcome>,
}

impl Future for PendingReply {
    type Output = RequestOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(RequestOutcome::ConnectionLost))
    }
}

// ── Dispatch results ──────────────────────────────────────────────────────────

/// Why an inbound envelope reached nobody.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Nothing is registered for the envelope's command.
    UnknownCommand,
    /// Handlers exist for the command, but none for the envelope's token.
    UnknownToken,
    /// Handlers matched, but none took the envelope: the waiting caller had
    /// already given up, or every subscription was cancelled or spent.
    NoLiveHandler,
    /// An unsupported-sentinel envelope matched only subscriptions.
    UnsupportedEvent,
}

/// What [`HandlerRegistry::dispatch`] did with an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The envelope was handed to at least one handler.
    Delivered {
        /// A pending request was completed by this envelope.
        completed_request: bool,
        /// Number of subscription callbacks invoked.
        subscribers: usize,
    },
    /// No handler received the envelope.
    Dropped(DropReason),
}

// ── Registry ──────────────────────────────────────────────────────────────────

type Table = HashMap<CommandId, HashMap<CorrelationToken, Vec<Handler>>>;

/// Maps `(command, token)` pairs to the handlers waiting for them.
#[derive(Default)]
pub struct HandlerRegistry {
    table: Mutex<Table>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a caller waiting for exactly one reply to `(command, token)`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::DuplicateCorrelation`] if a pending request for
    /// the same pair already exists.
    pub fn register_pending(
        &self,
        command: CommandId,
        token: CorrelationToken,
    ) -> Result<PendingReply, ChannelError> {
        let mut table = self.table();
        let handlers = table.entry(command).or_default().entry(token.clone()).or_default();
        if handlers.iter().any(Handler::is_one_shot) {
            return Err(ChannelError::DuplicateCorrelation { command, token });
        }

        let (tx, rx) = oneshot::channel();
        handlers.push(Handler::OneShot(tx));
        trace!(command, %token, "pending request registered");
        Ok(PendingReply { rx })
    }

    /// Registers a callback for events matching `(command, token)`.
    pub fn register_subscription(
        &self,
        command: CommandId,
        token: CorrelationToken,
        limit: DeliveryLimit,
        callback: EventCallback,
    ) -> SubscriptionId {
        let id = SubscriptionId::new();
        debug!(command, %token, %id, ?limit, "subscription registered");
        self.table()
            .entry(command)
            .or_default()
            .entry(token)
            .or_default()
            .push(Handler::Subscription {
                id,
                remaining: limit,
                active: Arc::new(AtomicBool::new(true)),
                callback,
            });
        id
    }

    /// Removes a subscription.  Returns `false` if it was already gone.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        let mut table = self.table();
        let mut removed = false;
        for by_token in table.values_mut() {
            for handlers in by_token.values_mut() {
                handlers.retain(|h| match h {
                    Handler::Subscription { id: sid, active, .. } if *sid == id => {
                        active.store(false, Ordering::SeqCst);
                        removed = true;
                        false
                    }
                    _ => true,
                });
            }
        }
        prune(&mut table);
        if removed {
            debug!(%id, "subscription removed");
        }
        removed
    }

    /// Removes the pending request for `(command, token)` without completing
    /// it.  Returns `false` if there was none.
    pub fn unregister_pending(&self, command: CommandId, token: &CorrelationToken) -> bool {
        let mut table = self.table();
        let Some(handlers) = table.get_mut(&command).and_then(|t| t.get_mut(token)) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|h| !h.is_one_shot());
        let removed = handlers.len() != before;
        prune(&mut table);
        removed
    }

    /// Routes one inbound envelope to its handlers.
    ///
    /// Unmatched envelopes are logged and dropped.  Subscription callbacks
    /// run after the registry lock is released.
    pub fn dispatch(&self, envelope: Envelope) -> DispatchOutcome {
        let Envelope {
            command,
            token,
            target,
            payload,
        } = envelope;
        let unsupported = target == TARGET_UNSUPPORTED;

        let mut pending = None;
        let mut callbacks: Vec<(Arc<AtomicBool>, EventCallback)> = Vec::new();
        {
            let mut table = self.table();
            let Some(by_token) = table.get_mut(&command) else {
                debug!(command, %token, "no handler for command; envelope dropped");
                return DispatchOutcome::Dropped(DropReason::UnknownCommand);
            };
            let Some(handlers) = by_token.get_mut(&token) else {
                debug!(command, %token, "no handler for token; envelope dropped");
                return DispatchOutcome::Dropped(DropReason::UnknownToken);
            };

            if let Some(pos) = handlers.iter().position(Handler::is_one_shot) {
                if let Handler::OneShot(tx) = handlers.remove(pos) {
                    pending = Some(tx);
                }
            }

            if !unsupported {
                for handler in handlers.iter_mut() {
                    if let Handler::Subscription {
                        remaining,
                        active,
                        callback,
                        ..
                    } = handler
                    {
                        if remaining.consume() {
                            callbacks.push((Arc::clone(active), Arc::clone(callback)));
                        }
                    }
                }
                handlers.retain(|h| !h.is_exhausted_subscription());
            }
            prune(&mut table);
        }

        let completed_request = match pending {
            Some(tx) => {
                let outcome = if unsupported {
                    warn!(command, %token, "robot reports command as unsupported");
                    RequestOutcome::Unsupported
                } else {
                    RequestOutcome::Success(payload.clone())
                };
                let delivered = tx.send(outcome).is_ok();
                if !delivered {
                    debug!(command, %token, "reply arrived after the caller gave up");
                }
                delivered
            }
            None if unsupported => {
                debug!(command, %token, "unsupported sentinel ignored by subscriptions");
                return DispatchOutcome::Dropped(DropReason::UnsupportedEvent);
            }
            None => false,
        };

        let mut subscribers = 0;
        for (active, callback) in &callbacks {
            if active.load(Ordering::SeqCst) {
                callback(&payload);
                subscribers += 1;
            }
        }

        if !completed_request && subscribers == 0 {
            debug!(command, %token, "no live handler took the envelope");
            return DispatchOutcome::Dropped(DropReason::NoLiveHandler);
        }
        DispatchOutcome::Delivered {
            completed_request,
            subscribers,
        }
    }

    /// Completes every pending request with [`RequestOutcome::ConnectionLost`].
    ///
    /// Subscriptions are left in place.  Returns the number of requests failed.
    pub fn fail_all_pending(&self) -> usize {
        let mut failed = Vec::new();
        {
            let mut table = self.table();
            for by_token in table.values_mut() {
                for handlers in by_token.values_mut() {
                    let mut i = 0;
                    while i < handlers.len() {
                        if handlers[i].is_one_shot() {
                            if let Handler::OneShot(tx) = handlers.remove(i) {
                                failed.push(tx);
                            }
                        } else {
                            i += 1;
                        }
                    }
                }
            }
            prune(&mut table);
        }

        let count = failed.len();
        for tx in failed {
            let _ = tx.send(RequestOutcome::ConnectionLost);
        }
        if count > 0 {
            debug!(count, "pending requests failed with ConnectionLost");
        }
        count
    }

    /// Drops every registration.  Pending callers observe `ConnectionLost`.
    pub fn clear(&self) {
        self.table().clear();
    }

    /// Number of requests waiting for a reply.
    pub fn pending_len(&self) -> usize {
        self.count(Handler::is_one_shot)
    }

    /// Number of live subscriptions.
    pub fn subscription_len(&self) -> usize {
        self.count(|h| !h.is_one_shot())
    }

    fn count(&self, pred: impl Fn(&Handler) -> bool) -> usize {
        self.table()
            .values()
            .flat_map(HashMap::values)
            .flatten()
            .filter(|h| pred(h))
            .count()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("pending", &self.pending_len())
            .field("subscriptions", &self.subscription_len())
            .finish()
    }
}

/// Removes empty token and command entries.
fn prune(table: &mut Table) {
    table.retain(|_, by_token| {
        by_token.retain(|_, handlers| !handlers.is_empty());
        !by_token.is_empty()
    });
}

// ── Tests ─────────────────────────────────────────────────────────────────────
