//! Publish/subscribe event notification.
//!
//! Servers, clients and sessions are *subjects*: each owns a [`Notifier`]
//! and broadcasts [`Event`]s at every lifecycle and I/O step. Observers
//! register zero or one handler per [`EventKind`]; an event with no handler
//! is simply skipped.
//!
//! ```rust,ignore
//! use sipsock::notifier::{EventKind, Observer};
//!
//! let observer = Observer::new()
//!     .on(EventKind::RecvSuccess, |subject, event| {
//!         println!("{subject}: {event:?}");
//!     })
//!     .into_shared();
//!
//! server.register(&observer);
//! ```
//!
//! Subjects hold observers weakly: dropping the last `Arc<Observer>`
//! silently unsubscribes it.
//!
//! Handlers run inside the broadcast critical section and must not
//! broadcast on the same subject.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;

/// Identity of the component broadcasting an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    /// A listening server.
    Server {
        /// Configured listen port.
        port: u16,
    },
    /// One peer connection.
    Session {
        /// Session ID.
        id: String,
        /// Remote address.
        peer: SocketAddr,
    },
    /// An outbound client.
    Client {
        /// `host:port` the client targets.
        target: String,
    },
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server { port } => write!(f, "server:{port}"),
            Self::Session { peer, .. } => write!(f, "session[{peer}]"),
            Self::Client { target } => write!(f, "client->{target}"),
        }
    }
}

/// Discriminant of an [`Event`], used as the handler key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Server run begins.
    WillRun,
    /// Server run finished.
    DidRun,
    /// Server about to bind.
    WillStart,
    /// Server bound.
    DidStart,
    /// Server waiting for a peer.
    WillAccept,
    /// New peer session registered.
    DidAccept,
    /// Server about to stop.
    WillStop,
    /// Server stopped.
    DidStop,
    /// Client connect attempt.
    WillConnect,
    /// Client connected.
    DidConnect,
    /// Send started.
    Sending,
    /// Send completed.
    SendSuccess,
    /// Send failed.
    SendFailure,
    /// Receive started.
    Receiving,
    /// Receive completed.
    RecvSuccess,
    /// Receive failed.
    RecvFailure,
    /// Close started.
    Closing,
    /// Transport released.
    CloseSuccess,
    /// Transport release failed.
    CloseFailure,
}

/// A lifecycle or I/O event with its arguments.
#[derive(Debug, Clone)]
pub enum Event {
    /// Server run begins.
    WillRun,
    /// Server run finished.
    DidRun,
    /// Server about to bind.
    WillStart,
    /// Server bound to `local`.
    DidStart {
        /// Bound address.
        local: SocketAddr,
    },
    /// Server waiting for a peer.
    WillAccept,
    /// New peer session registered.
    DidAccept {
        /// Remote address of the new session.
        peer: SocketAddr,
    },
    /// Server about to stop.
    WillStop,
    /// Server stopped.
    DidStop,
    /// Client connect attempt number `attempt` (1-based).
    WillConnect {
        /// Attempt number.
        attempt: u32,
    },
    /// Client connected to `peer`.
    DidConnect {
        /// Remote address.
        peer: SocketAddr,
    },
    /// About to send `message`.
    Sending {
        /// Payload.
        message: Bytes,
    },
    /// `message` was sent.
    SendSuccess {
        /// Payload.
        message: Bytes,
    },
    /// Sending `message` failed.
    SendFailure {
        /// Payload.
        message: Bytes,
        /// Failure description.
        error: String,
    },
    /// About to receive up to `buffersize` bytes.
    Receiving {
        /// Receive buffer size.
        buffersize: usize,
    },
    /// `message` was received.
    RecvSuccess {
        /// Receive buffer size.
        buffersize: usize,
        /// Payload.
        message: Bytes,
    },
    /// Receiving failed.
    RecvFailure {
        /// Receive buffer size.
        buffersize: usize,
        /// Failure description.
        error: String,
    },
    /// Close started.
    Closing,
    /// Transport released.
    CloseSuccess,
    /// Transport release failed.
    CloseFailure {
        /// Failure description.
        error: String,
    },
}

impl Event {
    /// Get the event kind.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::WillRun => EventKind::WillRun,
            Self::DidRun => EventKind::DidRun,
            Self::WillStart => EventKind::WillStart,
            Self::DidStart { .. } => EventKind::DidStart,
            Self::WillAccept => EventKind::WillAccept,
            Self::DidAccept { .. } => EventKind::DidAccept,
            Self::WillStop => EventKind::WillStop,
            Self::DidStop => EventKind::DidStop,
            Self::WillConnect { .. } => EventKind::WillConnect,
            Self::DidConnect { .. } => EventKind::DidConnect,
            Self::Sending { .. } => EventKind::Sending,
            Self::SendSuccess { .. } => EventKind::SendSuccess,
            Self::SendFailure { .. } => EventKind::SendFailure,
            Self::Receiving { .. } => EventKind::Receiving,
            Self::RecvSuccess { .. } => EventKind::RecvSuccess,
            Self::RecvFailure { .. } => EventKind::RecvFailure,
            Self::Closing => EventKind::Closing,
            Self::CloseSuccess => EventKind::CloseSuccess,
            Self::CloseFailure { .. } => EventKind::CloseFailure,
        }
    }
}

/// Event handler callback.
pub type Handler = Arc<dyn Fn(&Subject, &Event) + Send + Sync>;

/// A set of handlers, at most one per [`EventKind`].
#[derive(Default)]
pub struct Observer {
    handlers: HashMap<EventKind, Handler>,
}

impl Observer {
    /// Create an observer with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the handler for `kind`, replacing any previous one.
    pub fn on<F>(mut self, kind: EventKind, handler: F) -> Self
    where
        F: Fn(&Subject, &Event) + Send + Sync + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    /// Get the handler for `kind`, if any.
    pub fn handler(&self, kind: EventKind) -> Option<&Handler> {
        self.handlers.get(&kind)
    }

    /// Wrap into an `Arc` for registration.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Subject side of the observer relation.
pub struct Notifier {
    subject: Subject,
    observers: Mutex<Vec<Weak<Observer>>>,
    /// Held for the whole sweep of one broadcast.
    broadcast: Mutex<()>,
}

impl Notifier {
    /// Create a notifier for `subject`.
    pub fn new(subject: Subject) -> Self {
        Self {
            subject,
            observers: Mutex::new(Vec::new()),
            broadcast: Mutex::new(()),
        }
    }

    /// Get the subject.
    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    /// Register an observer. Registering the same observer twice is a no-op.
    pub fn register(&self, observer: &Arc<Observer>) {
        let mut observers = lock(&self.observers);
        let weak = Arc::downgrade(observer);
        if !observers.iter().any(|o| o.ptr_eq(&weak)) {
            observers.push(weak);
        }
    }

    /// Remove an observer. Unknown observers are ignored.
    pub fn unregister(&self, observer: &Arc<Observer>) {
        let weak = Arc::downgrade(observer);
        lock(&self.observers).retain(|o| !o.ptr_eq(&weak));
    }

    /// Number of live registered observers.
    pub fn observer_count(&self) -> usize {
        lock(&self.observers)
            .iter()
            .filter(|o| o.strong_count() > 0)
            .count()
    }

    /// Deliver `event` to one observer. Returns whether it had a handler.
    pub fn notify(&self, observer: &Observer, event: &Event) -> bool {
        match observer.handler(event.kind()) {
            Some(handler) => {
                handler(&self.subject, event);
                true
            },
            None => false,
        }
    }

    /// Broadcast `event` to every registered observer in registration order.
    ///
    /// Returns the number of observers that handled it.
    pub fn notify_all(&self, event: &Event) -> usize {
        let _sweep = lock(&self.broadcast);

        let observers: Vec<Arc<Observer>> = {
            let mut list = lock(&self.observers);
            list.retain(|o| o.strong_count() > 0);
            list.iter().filter_map(Weak::upgrade).collect()
        };

        observers
            .iter()
            .filter(|observer| self.notify(observer, event))
            .count()
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("subject", &self.subject)
            .field("observers", &self.observer_count())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn server() -> Notifier {
        Notifier::new(Subject::Server { port: 5060 })
    }

    #[test]
    fn test_notify_without_handler_is_noop() {
        let notifier = server();
        let observer = Observer::new().on(EventKind::DidStart, |_, _| {});

        assert!(!notifier.notify(&observer, &Event::WillStart));
        assert!(notifier.notify(
            &observer,
            &Event::DidStart {
                local: "127.0.0.1:5060".parse().unwrap()
            }
        ));
    }

    #[test]
    fn test_notify_all_in_registration_order() {
        let notifier = server();
        let order = Arc::new(Mutex::new(Vec::new()));

        let observers: Vec<Arc<Observer>> = (0..3)
            .map(|i| {
                let order = order.clone();
                Observer::new()
                    .on(EventKind::WillStop, move |_, _| order.lock().unwrap().push(i))
                    .into_shared()
            })
            .collect();
        for observer in &observers {
            notifier.register(observer);
        }

        assert_eq!(notifier.notify_all(&Event::WillStop), 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_handler_receives_subject() {
        let notifier = server();
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        let observer = Observer::new()
            .on(EventKind::WillAccept, move |subject, _| {
                *seen_clone.lock().unwrap() = Some(subject.clone());
            })
            .into_shared();

        notifier.register(&observer);
        notifier.notify_all(&Event::WillAccept);

        assert_eq!(
            *seen.lock().unwrap(),
            Some(Subject::Server { port: 5060 })
        );
    }

    #[test]
    fn test_dropped_observer_is_pruned() {
        let notifier = server();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let observer = Observer::new()
            .on(EventKind::DidStop, move |_, _| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            })
            .into_shared();

        notifier.register(&observer);
        assert_eq!(notifier.observer_count(), 1);
        drop(observer);

        assert_eq!(notifier.notify_all(&Event::DidStop), 0);
        assert_eq!(notifier.observer_count(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_register_twice_and_unregister() {
        let notifier = server();
        let observer = Observer::new().on(EventKind::DidRun, |_, _| {}).into_shared();

        notifier.register(&observer);
        notifier.register(&observer);
        assert_eq!(notifier.observer_count(), 1);

        notifier.unregister(&observer);
        assert_eq!(notifier.notify_all(&Event::DidRun), 0);
    }

    #[test]
    fn test_on_replaces_handler() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let observer = Observer::new()
            .on(EventKind::Closing, |_, _| panic!("replaced handler must not run"))
            .on(EventKind::Closing, move |_, _| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            });

        server().notify(&observer, &Event::Closing);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
