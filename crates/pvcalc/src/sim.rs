//! In-process loopback PV source.
//!
//! [`SoftIoc`] implements [`PvClient`] without any network: channels are
//! created on first use, values are published with [`SoftIoc::put`] from any
//! thread, and every open monitor of the channel receives them. Like a
//! control-system monitor, a new subscription to a channel that already holds
//! a value receives that value immediately.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use pvcalc_protocol::PvValue;

use crate::client::{MonitorSink, PvClient, Subscription, SubscriptionState};
use crate::error::ClientError;

#[derive(Default)]
struct Channel {
    value: Option<PvValue>,
    monitors: Vec<(u64, MonitorSink)>,
    refused: Option<String>,
}

#[derive(Default)]
struct IocState {
    channels: HashMap<String, Channel>,
    next_id: u64,
}

/// A loopback PV server living in the current process.
#[derive(Clone, Default)]
pub struct SoftIoc {
    inner: Arc<Mutex<IocState>>,
}

impl SoftIoc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `value` on `name`. Returns how many monitors received it.
    pub fn put(&self, name: &str, value: impl Into<PvValue>) -> usize {
        let value = value.into();
        let mut state = self.state();
        let channel = state.channels.entry(name.to_string()).or_default();
        channel.monitors.retain(|(_, sink)| sink.send(value.clone()));
        channel.value = Some(value);
        channel.monitors.len()
    }

    /// Last value published on `name`.
    pub fn get(&self, name: &str) -> Option<PvValue> {
        self.state()
            .channels
            .get(name)
            .and_then(|c| c.value.clone())
    }

    /// Make future monitor requests for `name` fail with `reason`.
    pub fn refuse(&self, name: &str, reason: &str) {
        let mut state = self.state();
        state.channels.entry(name.to_string()).or_default().refused = Some(reason.to_string());
    }

    /// Undo [`SoftIoc::refuse`].
    pub fn accept(&self, name: &str) {
        if let Some(channel) = self.state().channels.get_mut(name) {
            channel.refused = None;
        }
    }

    /// Number of open monitors on `name`.
    pub fn monitor_count(&self, name: &str) -> usize {
        self.state()
            .channels
            .get(name)
            .map(|c| c.monitors.iter().filter(|(_, s)| !s.is_closed()).count())
            .unwrap_or(0)
    }

    fn attach(&self, name: &str, sink: MonitorSink) -> Result<u64, ClientError> {
        let mut state = self.state();
        state.next_id += 1;
        let id = state.next_id;
        let channel = state.channels.entry(name.to_string()).or_default();
        if let Some(reason) = &channel.refused {
            return Err(ClientError::Rejected {
                name: name.to_string(),
                reason: reason.clone(),
            });
        }
        if let Some(value) = &channel.value {
            sink.send(value.clone());
        }
        channel.monitors.push((id, sink));
        Ok(id)
    }

    fn detach(&self, name: &str, id: u64) {
        if let Some(channel) = self.state().channels.get_mut(name) {
            channel.monitors.retain(|(mid, _)| *mid != id);
        }
    }

    fn has_value(&self, name: &str) -> bool {
        self.state()
            .channels
            .get(name)
            .map_or(false, |c| c.value.is_some())
    }

    fn state(&self) -> MutexGuard<'_, IocState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PvClient for SoftIoc {
    async fn monitor(
        &self,
        name: &str,
        sink: MonitorSink,
    ) -> Result<Box<dyn Subscription>, ClientError> {
        let id = self.attach(name, sink)?;
        tracing::debug!("SoftIoc: monitor #{id} opened on {name}");
        Ok(Box::new(SoftSubscription {
            ioc: self.clone(),
            name: name.to_string(),
            id,
            closed: false,
        }))
    }
}

struct SoftSubscription {
    ioc: SoftIoc,
    name: String,
    id: u64,
    closed: bool,
}

#[async_trait]
impl Subscription for SoftSubscription {
    fn state(&self) -> SubscriptionState {
        if self.closed {
            SubscriptionState::Closed
        } else if self.ioc.has_value(&self.name) {
            SubscriptionState::Open
        } else {
            SubscriptionState::Opening
        }
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        if !self.closed {
            self.ioc.detach(&self.name, self.id);
            self.closed = true;
            tracing::debug!("SoftIoc: monitor #{} on {} closed", self.id, self.name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_monitor_receives_puts() {
        let ioc = SoftIoc::new();
        let (sink, mut rx) = MonitorSink::channel();
        let sub = ioc.monitor("PHY:TEST", sink).await.unwrap();
        assert_eq!(sub.state(), SubscriptionState::Opening);

        assert_eq!(ioc.get("PHY:TEST"), None);
        assert_eq!(ioc.put("PHY:TEST", 1.0), 1);
        assert_eq!(sub.state(), SubscriptionState::Open);
        assert_eq!(ioc.get("PHY:TEST"), Some(PvValue::Number(1.0)));
        assert_eq!(rx.recv().await, Some(PvValue::Number(1.0)));
    }

    #[tokio::test]
    async fn test_monitor_gets_current_value_on_connect() {
        let ioc = SoftIoc::new();
        ioc.put("STATE", "OPEN");
        let (sink, mut rx) = MonitorSink::channel();
        let _sub = ioc.monitor("STATE", sink).await.unwrap();
        assert_eq!(rx.recv().await, Some(PvValue::from("OPEN")));
    }

    #[tokio::test]
    async fn test_close_stops_delivery() {
        let ioc = SoftIoc::new();
        let (sink, mut rx) = MonitorSink::channel();
        let mut sub = ioc.monitor("X", sink).await.unwrap();
        assert_eq!(ioc.monitor_count("X"), 1);

        sub.close().await.unwrap();
        assert_eq!(sub.state(), SubscriptionState::Closed);
        assert_eq!(ioc.monitor_count("X"), 0);
        assert_eq!(ioc.put("X", 5.0), 0);
        // The sink was dropped with the monitor, so the stream ends.
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_refused_channel() {
        let ioc = SoftIoc::new();
        ioc.refuse("LOCKED", "access denied");
        let (sink, _rx) = MonitorSink::channel();
        let err = ioc.monitor("LOCKED", sink).await.err().unwrap();
        assert!(matches!(err, ClientError::Rejected { .. }));

        ioc.accept("LOCKED");
        let (sink, _rx) = MonitorSink::channel();
        assert!(ioc.monitor("LOCKED", sink).await.is_ok());
    }
}
