//! Atomically published operation handler for a channel.
//!
//! The handler is installed by the owning application, normally before the
//! channel carries traffic, and read by every inbound request. Reads never
//! take a lock; installing a replacement is visible to every request that
//! starts afterwards.

use std::{fmt, sync::Arc};

use arc_swap::ArcSwapOption;

use crate::handler::OperationHandler;

type Installed = Arc<dyn OperationHandler>;

/// Slot holding the channel's current [`OperationHandler`].
#[derive(Default)]
pub struct OperationRegistry {
    slot: ArcSwapOption<Installed>,
}

impl OperationRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Publish `handler`, returning the one it replaced.
    pub fn install(&self, handler: Arc<dyn OperationHandler>) -> Option<Arc<dyn OperationHandler>> {
        self.slot
            .swap(Some(Arc::new(handler)))
            .map(|previous| Arc::clone(&*previous))
    }

    /// The handler visible to requests starting now.
    #[must_use]
    pub fn current(&self) -> Option<Arc<dyn OperationHandler>> {
        self.slot
            .load_full()
            .map(|installed| Arc::clone(&*installed))
    }

    /// Returns true if a handler is installed.
    #[must_use]
    pub fn is_installed(&self) -> bool { self.slot.load().is_some() }

    /// Remove the handler, returning it.
    pub fn clear(&self) -> Option<Arc<dyn OperationHandler>> {
        self.slot.swap(None).map(|previous| Arc::clone(&*previous))
    }
}

impl fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = self.current();
        f.debug_struct("OperationRegistry")
            .field("installed", &current.as_ref().map(|handler| handler.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use rstest::{fixture, rstest};

    use super::*;
    use crate::handler::{OperationTable, RequestHandler};

    #[allow(
        unused_braces,
        reason = "rustc false positive for single-line rstest fixtures"
    )]
    #[fixture]
    fn registry() -> OperationRegistry { OperationRegistry::new() }

    struct Named(&'static str);

    impl OperationHandler for Named {
        fn request_handler(&self, _operation_id: u8) -> Option<Box<dyn RequestHandler>> { None }

        fn name(&self) -> &str { self.0 }
    }

    #[rstest]
    fn empty_registry_has_no_handler(registry: OperationRegistry) {
        assert!(registry.current().is_none());
        assert!(!registry.is_installed());
    }

    #[rstest]
    fn install_replaces_and_returns_previous(registry: OperationRegistry) {
        assert!(registry.install(Arc::new(Named("first"))).is_none());
        let previous = registry
            .install(Arc::new(Named("second")))
            .expect("first handler should be returned");
        assert_eq!(previous.name(), "first");
        assert_eq!(registry.current().map(|h| h.name().to_owned()), Some("second".into()));
    }

    #[rstest]
    fn clear_removes_handler(registry: OperationRegistry) {
        registry.install(Arc::new(OperationTable::new("table")));
        assert!(registry.clear().is_some());
        assert!(registry.current().is_none());
    }

    #[rstest]
    fn installed_handler_is_visible_to_other_threads(registry: OperationRegistry) {
        let registry = Arc::new(registry);
        registry.install(Arc::new(Named("shared")));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.current().map(|h| h.name().to_owned()))
            })
            .collect();
        for reader in readers {
            let seen = reader.join().expect("reader thread panicked");
            assert_eq!(seen.as_deref(), Some("shared"));
        }
    }
}
