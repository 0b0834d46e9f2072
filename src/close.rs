//! Close handlers fired when a channel shuts down.
//!
//! Outbound requests may register a callback to learn that the channel
//! closed before their response arrived. Registration hands back a
//! [`CloseKey`]; the request lifecycle releases that key explicitly when the
//! response is handled or the send fails, so no callback outlives its
//! exchange. Dropping a key without releasing it leaves the callback armed.

use std::{
    fmt,
    sync::{
        Arc,
        Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;

/// Why a channel was closed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The owner closed the channel.
    Local,
    /// The inbound message stream ended.
    TransportClosed,
    /// The inbound message stream failed.
    TransportError(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("closed locally"),
            Self::TransportClosed => f.write_str("transport closed"),
            Self::TransportError(error) => write!(f, "transport failed: {error}"),
        }
    }
}

/// Callback invoked once when the channel closes.
pub type CloseHandler = Box<dyn FnOnce(&CloseReason) + Send + Sync + 'static>;

type HandlerMap = DashMap<u64, CloseHandler>;

/// Registry of armed close handlers for one channel.
#[derive(Default)]
pub struct CloseHandlers {
    handlers: Arc<HandlerMap>,
    next_key: AtomicU64,
}

impl CloseHandlers {
    /// Arm `handler`, returning the key that disarms it.
    pub fn register(&self, handler: CloseHandler) -> CloseKey {
        let id = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.handlers.insert(id, handler);
        CloseKey {
            id,
            handlers: Arc::downgrade(&self.handlers),
        }
    }

    /// Number of armed handlers.
    #[must_use]
    pub fn len(&self) -> usize { self.handlers.len() }

    /// Returns true when no handler is armed.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.handlers.is_empty() }

    /// Fire and disarm every handler, returning how many ran.
    ///
    /// Each handler is removed from the map before it runs, so a handler
    /// racing with [`CloseKey::release`] runs at most once.
    pub fn fire(&self, reason: &CloseReason) -> usize {
        let ids: Vec<u64> = self.handlers.iter().map(|entry| *entry.key()).collect();
        let mut fired = 0;
        for id in ids {
            if let Some((_, handler)) = self.handlers.remove(&id) {
                handler(reason);
                fired += 1;
            }
        }
        fired
    }
}

impl fmt::Debug for CloseHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseHandlers")
            .field("armed", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

/// Deregistration handle for one close handler.
#[derive(Debug)]
#[must_use = "an unreleased key leaves its close handler armed"]
pub struct CloseKey {
    id: u64,
    handlers: Weak<HandlerMap>,
}

impl CloseKey {
    /// Disarm the handler without running it.
    ///
    /// Returns false if the handler already fired or the channel is gone.
    pub fn release(self) -> bool {
        self.handlers
            .upgrade()
            .is_some_and(|handlers| handlers.remove(&self.id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use rstest::{fixture, rstest};

    use super::*;

    #[allow(
        unused_braces,
        reason = "rustc false positive for single-line rstest fixtures"
    )]
    #[fixture]
    fn handlers() -> CloseHandlers { CloseHandlers::default() }

    fn counting(counter: &Arc<AtomicUsize>) -> CloseHandler {
        let counter = Arc::clone(counter);
        Box::new(move |_: &CloseReason| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[rstest]
    fn released_handlers_do_not_fire(handlers: CloseHandlers) {
        let counter = Arc::new(AtomicUsize::new(0));
        let key = handlers.register(counting(&counter));

        assert!(key.release());
        assert_eq!(handlers.fire(&CloseReason::Local), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[rstest]
    fn fire_runs_each_handler_once(handlers: CloseHandlers) {
        let counter = Arc::new(AtomicUsize::new(0));
        let first = handlers.register(counting(&counter));
        let _second = handlers.register(counting(&counter));

        assert_eq!(handlers.fire(&CloseReason::TransportClosed), 2);
        assert_eq!(handlers.fire(&CloseReason::TransportClosed), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(!first.release(), "fired handler cannot be released");
    }

    #[rstest]
    fn handler_receives_reason(handlers: CloseHandlers) {
        let seen = Arc::new(std::sync::Mutex::new(None));
        let sink = Arc::clone(&seen);
        let _key = handlers.register(Box::new(move |reason: &CloseReason| {
            *sink.lock().expect("lock reason") = Some(reason.clone());
        }));

        handlers.fire(&CloseReason::TransportError("reset".into()));
        assert_eq!(
            *seen.lock().expect("lock reason"),
            Some(CloseReason::TransportError("reset".into()))
        );
    }

    #[test]
    fn key_outliving_registry_releases_nothing() {
        let handlers = CloseHandlers::default();
        let key = handlers.register(Box::new(|_: &CloseReason| {}));
        drop(handlers);
        assert!(!key.release());
    }
}
