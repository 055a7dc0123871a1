//! The boundary to the external PV data source.
//!
//! A [`PvClient`] opens monitors on named channels and pushes every new value
//! into the [`MonitorSink`] it was given. The worker drains that sink on its
//! own event loop, so the client may deliver from whatever thread or task it
//! likes.

use std::fmt;

use async_trait::async_trait;
use pvcalc_protocol::PvValue;
use tokio::sync::mpsc;

use crate::error::ClientError;

/// Connection state of a monitor, as reported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionState {
    Opening,
    Open,
    Closed,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubscriptionState::Opening => "OPENING",
            SubscriptionState::Open => "OPEN",
            SubscriptionState::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

/// Where a client delivers the values of one monitored channel.
#[derive(Debug, Clone)]
pub struct MonitorSink {
    tx: mpsc::UnboundedSender<PvValue>,
}

impl MonitorSink {
    /// Create a sink and the receiver that drains it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PvValue>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Deliver a value. Returns `false` once the receiving side is gone.
    pub fn send(&self, value: PvValue) -> bool {
        self.tx.send(value).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A live monitor on one channel.
#[async_trait]
pub trait Subscription: Send + Sync {
    fn state(&self) -> SubscriptionState;

    /// Stop monitoring. No value is delivered to the sink afterwards.
    async fn close(&mut self) -> Result<(), ClientError>;
}

/// A source of process-variable monitors.
#[async_trait]
pub trait PvClient: Send + Sync + 'static {
    /// Begin monitoring `name`, delivering every new value into `sink`.
    async fn monitor(
        &self,
        name: &str,
        sink: MonitorSink,
    ) -> Result<Box<dyn Subscription>, ClientError>;
}
