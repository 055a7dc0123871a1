//! The subscription tables owned by a worker.
//!
//! Three tables are kept in lockstep: live subscriptions, result cells, and
//! per-name deadbands. A name with a subscription always has a result cell.
//! Deadbands outlive subscriptions so a name re-added later keeps its
//! sensitivity.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::client::{Subscription, SubscriptionState};
use crate::error::ClientError;
use crate::result::ResultCell;

/// A live subscription and the task draining its values.
pub(crate) struct Entry {
    pub(crate) subscription: Box<dyn Subscription>,
    pub(crate) pump: JoinHandle<()>,
}

/// Stands in for a subscription while the real one is being closed.
struct Closing(SubscriptionState);

#[async_trait]
impl Subscription for Closing {
    fn state(&self) -> SubscriptionState {
        self.0
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    subs: BTreeMap<String, Entry>,
    mdel: HashMap<String, f64>,
    pool: HashMap<String, Arc<ResultCell>>,
}

impl Registry {
    pub(crate) fn contains(&self, name: &str) -> bool {
        self.subs.contains_key(name)
    }

    pub(crate) fn set_mdel(&mut self, name: &str, mdel: f64) {
        self.mdel.insert(name.to_string(), mdel);
    }

    /// Deadband for `name`, if one was ever set.
    pub(crate) fn mdel(&self, name: &str) -> Option<f64> {
        self.mdel.get(name).copied()
    }

    /// Register a fresh subscription with a new result cell.
    pub(crate) fn insert(
        &mut self,
        name: &str,
        subscription: Box<dyn Subscription>,
        pump: JoinHandle<()>,
        mdel: f64,
    ) -> Arc<ResultCell> {
        let cell = Arc::new(ResultCell::new(name));
        self.subs
            .insert(name.to_string(), Entry { subscription, pump });
        self.pool.insert(name.to_string(), Arc::clone(&cell));
        self.set_mdel(name, mdel);
        cell
    }

    /// Remove `name` from the subscription and result tables.
    pub(crate) fn take(&mut self, name: &str) -> Option<(Entry, Arc<ResultCell>)> {
        let entry = self.subs.remove(name)?;
        let cell = self
            .pool
            .remove(name)
            .unwrap_or_else(|| Arc::new(ResultCell::new(name)));
        Some((entry, cell))
    }

    /// Borrow the subscription of `name` out of its entry so it can be closed
    /// without holding the lock. The entry and its result cell stay in place.
    pub(crate) fn detach(&mut self, name: &str) -> Option<Box<dyn Subscription>> {
        let entry = self.subs.get_mut(name)?;
        let state = entry.subscription.state();
        Some(std::mem::replace(
            &mut entry.subscription,
            Box::new(Closing(state)),
        ))
    }

    /// Give back a subscription taken by [`Registry::detach`].
    pub(crate) fn reattach(&mut self, name: &str, subscription: Box<dyn Subscription>) {
        if let Some(entry) = self.subs.get_mut(name) {
            entry.subscription = subscription;
        }
    }

    /// Empty the subscription and result tables.
    pub(crate) fn drain(&mut self) -> Vec<(String, Entry)> {
        self.pool.clear();
        std::mem::take(&mut self.subs).into_iter().collect()
    }

    pub(crate) fn get_result(&self, name: &str) -> Option<Arc<ResultCell>> {
        self.pool.get(name).cloned()
    }

    /// Subscription state of every live name, ordered by name.
    pub(crate) fn list(&self) -> Vec<(String, SubscriptionState)> {
        self.subs
            .iter()
            .map(|(name, entry)| (name.clone(), entry.subscription.state()))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.subs.len()
    }
}
