//! Reentrancy-safe listener lists.
//!
//! NOT thread-safe; only use from one thread.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use tracing::{error, trace, warn};

/// Identifies a registered listener for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchToken(u64);

type Callback<T> = Rc<RefCell<dyn FnMut(&T)>>;

struct Entry<T> {
    token: WatchToken,
    callback: Callback<T>,
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            token: self.token,
            callback: Rc::clone(&self.callback),
        }
    }
}

/// An insertion-ordered list of listeners sharing one call signature.
///
/// Listeners may add or remove listeners (including themselves) from within
/// a notification: removals are deferred until the in-progress pass
/// completes and the removed listener is skipped for the remainder of the
/// pass, while additions do not fire until the next pass. A panicking
/// listener is logged and suppressed without disturbing the others.
pub struct Watchable<T> {
    listeners: RefCell<Vec<Entry<T>>>,
    pending_removals: RefCell<Vec<WatchToken>>,
    notify_depth: Cell<u32>,
    next_token: Cell<u64>,
}

impl<T> Default for Watchable<T> {
    fn default() -> Self {
        Self {
            listeners: RefCell::new(Vec::new()),
            pending_removals: RefCell::new(Vec::new()),
            notify_depth: Cell::new(0),
            next_token: Cell::new(0),
        }
    }
}

impl<T> Watchable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener and returns the token identifying it.
    pub fn add_listener(&self, listener: impl FnMut(&T) + 'static) -> WatchToken {
        let token = WatchToken(self.next_token.get());
        self.next_token.set(token.0 + 1);
        self.listeners.borrow_mut().push(Entry {
            token,
            callback: Rc::new(RefCell::new(listener)),
        });
        token
    }

    /// Removes the listener identified by `token`.
    ///
    /// If called during a notification the removal is deferred until the
    /// pass completes. An unknown token is a no-op with a warning.
    pub fn remove_listener(&self, token: WatchToken) {
        let known = self
            .listeners
            .borrow()
            .iter()
            .any(|entry| entry.token == token);
        if !known {
            warn!(token = token.0, "attempted to remove an unknown listener");
            return;
        }
        if self.notify_depth.get() > 0 {
            let mut pending = self.pending_removals.borrow_mut();
            if pending.contains(&token) {
                warn!(token = token.0, "listener is already marked for removal");
            } else {
                trace!(token = token.0, "deferring listener removal until after the current pass");
                pending.push(token);
            }
            return;
        }
        self.listeners
            .borrow_mut()
            .retain(|entry| entry.token != token);
    }

    pub fn has_listeners(&self) -> bool {
        !self.listeners.borrow().is_empty()
    }

    /// Calls every listener in insertion order with the same value.
    pub fn notify(&self, value: &T) {
        let snapshot: Vec<Entry<T>> = self.listeners.borrow().clone();
        self.notify_depth.set(self.notify_depth.get() + 1);
        for entry in snapshot {
            if self.pending_removals.borrow().contains(&entry.token) {
                trace!(token = entry.token.0, "skipping listener marked for removal");
                continue;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                let mut callback = entry.callback.borrow_mut();
                (*callback)(value);
            }));
            if let Err(payload) = outcome {
                error!(
                    token = entry.token.0,
                    reason = panic_label(payload.as_ref()),
                    "listener panicked during notification"
                );
            }
        }
        self.notify_depth.set(self.notify_depth.get() - 1);
        if self.notify_depth.get() == 0 {
            let removals: Vec<WatchToken> = self.pending_removals.borrow_mut().drain(..).collect();
            if !removals.is_empty() {
                self.listeners
                    .borrow_mut()
                    .retain(|entry| !removals.contains(&entry.token));
            }
        }
    }
}

pub(crate) fn panic_label(payload: &(dyn Any + Send)) -> &str {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;

    #[test]
    fn notify_calls_registered_listener() {
        let watchable = Watchable::new();
        let last = Rc::new(Cell::new(0));
        let seen = Rc::clone(&last);
        let _token = watchable.add_listener(move |value: &i32| seen.set(*value));
        watchable.notify(&5);
        assert_eq!(last.get(), 5);
    }

    #[test]
    fn notify_calls_listeners_in_insertion_order() {
        let watchable = Watchable::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for id in 0..3 {
            let order = Rc::clone(&order);
            let _token = watchable.add_listener(move |_: &i32| order.borrow_mut().push(id));
        }
        watchable.notify(&1);
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn removed_listener_is_not_called() {
        let watchable = Watchable::new();
        let last = Rc::new(Cell::new(0));
        let seen = Rc::clone(&last);
        let token = watchable.add_listener(move |value: &i32| seen.set(*value));
        watchable.remove_listener(token);
        watchable.notify(&5);
        assert_eq!(last.get(), 0);
    }

    #[test]
    fn removing_an_unknown_token_is_a_no_op() {
        let watchable = Watchable::new();
        let token = watchable.add_listener(|_: &i32| {});
        watchable.remove_listener(token);
        // second removal warns but must not disturb anything
        watchable.remove_listener(token);
        watchable.notify(&1);
    }

    #[test]
    fn removal_during_notify_skips_the_listener_for_the_rest_of_the_pass() {
        let watchable = Rc::new(Watchable::new());
        let first_calls = Rc::new(Cell::new(0));
        let second_calls = Rc::new(Cell::new(0));
        let victim = Rc::new(Cell::new(None));

        let inner = Rc::clone(&watchable);
        let calls = Rc::clone(&first_calls);
        let target = Rc::clone(&victim);
        let _first = watchable.add_listener(move |_: &i32| {
            calls.set(calls.get() + 1);
            if let Some(token) = target.get() {
                inner.remove_listener(token);
            }
        });

        let calls = Rc::clone(&second_calls);
        let token = watchable.add_listener(move |_: &i32| calls.set(calls.get() + 1));
        victim.set(Some(token));

        watchable.notify(&1);
        watchable.notify(&2);
        assert_eq!(first_calls.get(), 2);
        // the second listener never fires: it is removed before being reached
        assert_eq!(second_calls.get(), 0);
    }

    #[test]
    fn listener_added_during_notify_fires_on_the_next_pass() {
        let watchable = Rc::new(Watchable::new());
        let late_calls = Rc::new(Cell::new(0));

        let inner = Rc::clone(&watchable);
        let counter = Rc::clone(&late_calls);
        let armed = Rc::new(Cell::new(false));
        let once = Rc::clone(&armed);
        let _token = watchable.add_listener(move |_: &i32| {
            if !once.get() {
                once.set(true);
                let counter = Rc::clone(&counter);
                let _late = inner.add_listener(move |_: &i32| counter.set(counter.get() + 1));
            }
        });

        watchable.notify(&1);
        assert_eq!(late_calls.get(), 0);
        watchable.notify(&2);
        assert_eq!(late_calls.get(), 1);
    }

    #[test]
    fn panicking_listeners_do_not_disturb_the_rest() {
        let watchable = Watchable::new();
        let last = Rc::new(Cell::new(0));
        let _a = watchable.add_listener(|_: &i32| panic!("banana"));
        let _b = watchable.add_listener(|_: &i32| panic!("split"));
        let seen = Rc::clone(&last);
        let _c = watchable.add_listener(move |value: &i32| seen.set(*value));
        watchable.notify(&5);
        watchable.notify(&6);
        assert_eq!(last.get(), 6);
    }
}
