//! WebSocket hooks for Dioxus components.
//!
//! The [`ConnectionRegistry`] is expected in context, provided once near the
//! app root with `use_context_provider`. Components never own sockets; they
//! hold a subscription that lives as long as the component.

use std::cell::RefCell;
use std::rc::Rc;

use dioxus::prelude::*;

use super::registry::{ConnectionRegistry, ConnectionState, ListenerOptions, Subscription};
use super::transport::Socket;

type SharedSubscription = Rc<RefCell<Option<Subscription>>>;

/// What a component gets back from [`use_websocket`].
#[derive(Clone)]
pub struct UseWebSocket {
    subscription: SharedSubscription,
}

impl UseWebSocket {
    pub fn current_socket(&self) -> Option<Socket> {
        self.subscription
            .borrow()
            .as_ref()
            .and_then(Subscription::current_socket)
    }

    pub fn state(&self) -> ConnectionState {
        self.subscription
            .borrow()
            .as_ref()
            .map_or(ConnectionState::Disconnected, Subscription::state)
    }

    pub fn force_reconnect(&self) {
        if let Some(subscription) = self.subscription.borrow().as_ref() {
            subscription.force_reconnect();
        }
    }
}

/// Subscribe this component to `path`.
///
/// Subscribes on first render, pushes the latest `options` to the registry on
/// every render (no resubscribe, no socket churn), resubscribes if `path`
/// changes and unsubscribes when the component unmounts.
///
/// # Arguments
/// * `path` - Logical endpoint, e.g. "/qf/ws/notifications"; empty disables the hook
/// * `options` - Callbacks and enabled flag for this component
pub fn use_websocket(path: &str, options: ListenerOptions) -> UseWebSocket {
    let registry = use_context::<ConnectionRegistry>();
    let subscription: SharedSubscription = use_hook(|| Rc::new(RefCell::new(None)));

    {
        let mut current = subscription.borrow_mut();
        let same_path = current.as_ref().is_some_and(|s| s.path() == path);
        if same_path {
            if let Some(existing) = current.as_ref() {
                existing.update(options);
            }
        } else {
            // Unsubscribe from the old path before joining the new one
            current.take();
            *current = Some(registry.subscribe(path, options));
        }
    }

    let on_drop = subscription.clone();
    use_drop(move || {
        on_drop.borrow_mut().take();
    });

    UseWebSocket { subscription }
}

/// Hook to read the connection state for a path without subscribing.
pub fn use_connection_state(path: &str) -> ConnectionState {
    use_context::<ConnectionRegistry>().state(path)
}
