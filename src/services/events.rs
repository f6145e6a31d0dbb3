//! Subscriber event registries

use parking_lot::RwLock;
use std::sync::Arc;

use crate::models::{Mode, WebSubError};

/// Receives `(topic_url, callback_id, body)` for every accepted notification
pub type Listener = Arc<dyn Fn(&str, &str, &[u8]) + Send + Sync>;

/// Receives `(topic_url, callback_id, mode)` after a confirmed request
pub type SuccessHandler = Arc<dyn Fn(&str, &str, Mode) + Send + Sync>;

/// Receives `(topic_url, callback_id, error)` for asynchronous failures
pub type ErrorHandler = Arc<dyn Fn(&str, &str, &WebSubError) + Send + Sync>;

/// Ordered listener registries owned by one subscriber engine.
///
/// Handlers run in registration order. The registries are cloned out of
/// the lock before dispatch, so a handler may register further handlers.
#[derive(Default)]
pub struct SubscriberEvents {
    listeners: RwLock<Vec<Listener>>,
    success_handlers: RwLock<Vec<SuccessHandler>>,
    error_handlers: RwLock<Vec<ErrorHandler>>,
}

impl SubscriberEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener<F>(&self, f: F)
    where
        F: Fn(&str, &str, &[u8]) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(f));
    }

    pub fn add_success_handler<F>(&self, f: F)
    where
        F: Fn(&str, &str, Mode) + Send + Sync + 'static,
    {
        self.success_handlers.write().push(Arc::new(f));
    }

    pub fn add_error_handler<F>(&self, f: F)
    where
        F: Fn(&str, &str, &WebSubError) + Send + Sync + 'static,
    {
        self.error_handlers.write().push(Arc::new(f));
    }

    pub fn notify(&self, topic_url: &str, callback_id: &str, body: &[u8]) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener(topic_url, callback_id, body);
        }
    }

    pub fn succeeded(&self, topic_url: &str, callback_id: &str, mode: Mode) {
        let handlers = self.success_handlers.read().clone();
        for handler in handlers {
            handler(topic_url, callback_id, mode);
        }
    }

    pub fn failed(&self, topic_url: &str, callback_id: &str, error: &WebSubError) {
        let handlers = self.error_handlers.read().clone();
        for handler in handlers {
            handler(topic_url, callback_id, error);
        }
    }
}

impl std::fmt::Debug for SubscriberEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberEvents")
            .field("listeners", &self.listeners.read().len())
            .field("success_handlers", &self.success_handlers.read().len())
            .field("error_handlers", &self.error_handlers.read().len())
            .finish()
    }
}
