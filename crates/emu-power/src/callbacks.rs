//! Handler registry and dispatch precedence.
//!
//! For every decoded notification the global handler fires first, then the
//! handler registered for its kind or, when there is none, the fallback.
//! Decode failures go to a separate failure handler and never reach the
//! notification handlers.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use emu_types::{DecodeFailure, Notification, NotificationKind};
use tracing::{debug, trace};

/// Notification handler. Runs on the read loop; a slow handler stalls it.
pub type Handler = Arc<dyn Fn(&Notification) + Send + Sync>;
/// Receives fragments that failed to decode.
pub type FailureHandler = Arc<dyn Fn(&DecodeFailure) + Send + Sync>;

/// Where a handler is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// Notifications of one kind.
    Kind(NotificationKind),
    /// Every notification, alongside any other handler.
    Global,
    /// Notifications whose kind has no handler of its own.
    Fallback,
}

impl From<NotificationKind> for Target {
    fn from(kind: NotificationKind) -> Self {
        Target::Kind(kind)
    }
}

/// Which handlers a dispatch reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dispatched {
    pub global: bool,
    pub specific: bool,
    pub fallback: bool,
}

impl Dispatched {
    pub fn any(&self) -> bool {
        self.global || self.specific || self.fallback
    }
}

#[derive(Default)]
struct Slots {
    by_kind: HashMap<NotificationKind, Handler>,
    global: Option<Handler>,
    fallback: Option<Handler>,
    failure: Option<FailureHandler>,
}

/// Thread-safe handler table; registrations replace earlier ones.
#[derive(Default)]
pub struct CallbackRegistry {
    slots: RwLock<Slots>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Slots> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Slots> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `handler` for `target`, replacing any previous one.
    pub fn callback<F>(&self, target: impl Into<Target>, handler: F)
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let target = target.into();
        let handler: Handler = Arc::new(handler);
        let mut slots = self.write();
        match target {
            Target::Kind(kind) => {
                slots.by_kind.insert(kind, handler);
            }
            Target::Global => slots.global = Some(handler),
            Target::Fallback => slots.fallback = Some(handler),
        }
        debug!(?target, "callback registered");
    }

    /// Remove the handler for `target`; returns whether one was registered.
    pub fn remove(&self, target: impl Into<Target>) -> bool {
        let target = target.into();
        let mut slots = self.write();
        let removed = match target {
            Target::Kind(kind) => slots.by_kind.remove(&kind).is_some(),
            Target::Global => slots.global.take().is_some(),
            Target::Fallback => slots.fallback.take().is_some(),
        };
        debug!(?target, removed, "callback removed");
        removed
    }

    /// Register the decode-failure handler.
    pub fn on_failure<F>(&self, handler: F)
    where
        F: Fn(&DecodeFailure) + Send + Sync + 'static,
    {
        self.write().failure = Some(Arc::new(handler));
    }

    /// Clear every notification handler. The failure handler is kept.
    pub fn reset_callbacks(&self) {
        let mut slots = self.write();
        slots.by_kind.clear();
        slots.global = None;
        slots.fallback = None;
        debug!("callbacks reset");
    }

    /// Whether a handler is registered for `target`.
    pub fn is_registered(&self, target: impl Into<Target>) -> bool {
        let slots = self.read();
        match target.into() {
            Target::Kind(kind) => slots.by_kind.contains_key(&kind),
            Target::Global => slots.global.is_some(),
            Target::Fallback => slots.fallback.is_some(),
        }
    }

    /// Invoke the handlers for `notification` in precedence order.
    ///
    /// Handlers are cloned out of the table first, so a handler may register
    /// or remove callbacks without deadlocking.
    pub fn dispatch(&self, notification: &Notification) -> Dispatched {
        let kind = notification.kind();
        let (global, specific, fallback) = {
            let slots = self.read();
            let specific = slots.by_kind.get(&kind).cloned();
            let fallback = if specific.is_none() {
                slots.fallback.clone()
            } else {
                None
            };
            (slots.global.clone(), specific, fallback)
        };
        let mut dispatched = Dispatched::default();
        if let Some(handler) = global {
            handler(notification);
            dispatched.global = true;
        }
        if let Some(handler) = specific {
            handler(notification);
            dispatched.specific = true;
        } else if let Some(handler) = fallback {
            handler(notification);
            dispatched.fallback = true;
        }
        trace!(%kind, ?dispatched, "notification dispatched");
        dispatched
    }

    /// Hand `failure` to the failure handler; returns whether one was registered.
    pub fn report_failure(&self, failure: &DecodeFailure) -> bool {
        let handler = self.read().failure.clone();
        match handler {
            Some(handler) => {
                handler(failure);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.read();
        let mut kinds: Vec<_> = slots.by_kind.keys().copied().collect();
        kinds.sort();
        f.debug_struct("CallbackRegistry")
            .field("kinds", &kinds)
            .field("global", &slots.global.is_some())
            .field("fallback", &slots.fallback.is_some())
            .field("failure", &slots.failure.is_some())
            .finish()
    }
}
