//! Result cells: the spreadsheet-facing holders of subscribed values.
//!
//! A [`ResultCell`] behaves like a volatile result in the spreadsheet host:
//! instead of being polled, it pushes a [`ResultEvent`] to every registered
//! [`ResultListener`] whenever it accepts a new value.
//!
//! # Locking
//!
//! Two locks guard a cell. `state` protects the value and listener list and is
//! only held for short reads and writes. `notify` is held for the whole of
//! "change state, then deliver", so an initial replay to a new listener can
//! never interleave with an update delivery. A listener may call
//! [`ResultCell::get_result`] or [`ResultCell::value`] from `modified`, but must
//! not add listeners to, or update, the cell that is notifying it.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pvcalc_protocol::{PvValue, ResultEvent};

use crate::filter::should_emit;

/// Receiver of result cell updates, typically a spreadsheet cell that
/// re-evaluates when notified.
pub trait ResultListener: Send + Sync + 'static {
    fn modified(&self, event: &ResultEvent);
}

/// Adapter that turns a closure into a [`ResultListener`].
pub struct FnListener<F>(pub F);

impl<F: Fn(&ResultEvent) + Send + Sync + 'static> ResultListener for FnListener<F> {
    fn modified(&self, event: &ResultEvent) {
        (self.0)(event);
    }
}

/// Wrap a closure as a shareable listener handle.
pub fn listener_fn<F>(f: F) -> Arc<dyn ResultListener>
where
    F: Fn(&ResultEvent) + Send + Sync + 'static,
{
    Arc::new(FnListener(f))
}

struct CellState {
    value: PvValue,
    seq: u64,
    listeners: Vec<Arc<dyn ResultListener>>,
}

/// Latest delivered value of one PV plus the listeners watching it.
pub struct ResultCell {
    name: String,
    state: Mutex<CellState>,
    notify: Mutex<()>,
}

impl ResultCell {
    /// Create a cell holding the `#N/A` sentinel and no listeners.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(CellState {
                value: PvValue::NotAvailable,
                seq: 0,
                listeners: Vec::new(),
            }),
            notify: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current value.
    pub fn value(&self) -> PvValue {
        self.state().value.clone()
    }

    pub fn listener_count(&self) -> usize {
        self.state().listeners.len()
    }

    /// Snapshot of the current value, usable as an event payload.
    pub fn get_result(&self) -> ResultEvent {
        let state = self.state();
        self.snapshot(&state)
    }

    /// Register `listener` and immediately deliver the current value to it.
    ///
    /// The same listener may be registered more than once; each registration
    /// receives its own notifications.
    pub fn add_result_listener(&self, listener: Arc<dyn ResultListener>) {
        let _notify = self.notify.lock().unwrap_or_else(PoisonError::into_inner);
        let event = {
            let mut state = self.state();
            state.listeners.push(Arc::clone(&listener));
            self.snapshot(&state)
        };
        deliver(&self.name, &listener, &event);
    }

    /// Remove the first registration of `listener`.
    ///
    /// Listeners are matched by identity of the shared handle. Returns `false`
    /// and leaves the cell untouched when the listener is not registered.
    pub fn remove_result_listener(&self, listener: &Arc<dyn ResultListener>) -> bool {
        let mut state = self.state();
        match state
            .listeners
            .iter()
            .position(|l| Arc::ptr_eq(l, listener))
        {
            Some(idx) => {
                state.listeners.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Offer a new value to the cell.
    ///
    /// The value is accepted only if [`should_emit`] says it differs enough
    /// from the current one. On acceptance every listener is notified, in
    /// registration order, before this returns `true`.
    pub fn update_value(&self, value: PvValue, mdel: f64) -> bool {
        let _notify = self.notify.lock().unwrap_or_else(PoisonError::into_inner);
        let (event, listeners) = {
            let mut state = self.state();
            if !should_emit(&state.value, &value, mdel) {
                return false;
            }
            state.value = value;
            state.seq += 1;
            (self.snapshot(&state), state.listeners.clone())
        };

        for listener in &listeners {
            deliver(&self.name, listener, &event);
        }
        true
    }

    fn state(&self) -> MutexGuard<'_, CellState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self, state: &CellState) -> ResultEvent {
        ResultEvent::new(self.name.clone(), state.value.clone(), state.seq)
    }
}

/// Hand one event to one listener. A panicking listener is logged and skipped
/// so the remaining listeners still see the update.
fn deliver(name: &str, listener: &Arc<dyn ResultListener>, event: &ResultEvent) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.modified(event)));
    if outcome.is_err() {
        tracing::warn!("Result listener for {name} panicked while handling update #{}", event.seq);
    }
}

impl fmt::Display for ResultCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        write!(
            f,
            "{} ({}) with {} listeners",
            self.name,
            state.value,
            state.listeners.len()
        )
    }
}

impl fmt::Debug for ResultCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("ResultCell")
            .field("name", &self.name)
            .field("value", &state.value)
            .field("seq", &state.seq)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}
