//! The PV bridge worker: a dedicated thread running the subscription event loop.
//!
//! # Architecture
//!
//! ```text
//! controlling thread                    worker thread (current-thread tokio runtime)
//! ──────────────────                    ────────────────────────────────────────────
//! add_pv / del_pv / set_mdel  ──req──►  request loop ──► PvClient::monitor / close
//!        ▲ blocks on reply    ◄─reply─       │
//!        │                                   ├─ liveness task (logs every interval)
//! get_result / list ── read lock ──┐         └─ one value pump per subscription
//!                                  ▼                    │ global update lock
//!                               Registry ◄──────────────┘ ResultCell::update_value
//! ```
//!
//! Every registry mutation happens inside the request loop, one request at a
//! time, in submission order. Value updates from all subscriptions are
//! serialized by a single async lock.
//!
//! The blocking methods (`add_pv`, `del_pv`, `set_mdel`) wait without a
//! timeout for the loop to serve them, and must not be called from inside an
//! async runtime or from a result listener.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;
use std::time::Duration;

use pvcalc_protocol::PvValue;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::client::{MonitorSink, PvClient, SubscriptionState};
use crate::config::WorkerConfig;
use crate::error::{BridgeError, Result};
use crate::name::is_valid_pv;
use crate::registry::Registry;
use crate::result::ResultCell;

static WORKER_COUNTER: AtomicUsize = AtomicUsize::new(1);

/// Lifecycle status of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Not started yet.
    Created,
    Running,
    /// Running, flagged as paused. Scheduling is not affected.
    Paused,
    /// The event loop has exited, cleanly or not.
    Stopped,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerStatus::Created => "Created",
            WorkerStatus::Running => "Running",
            WorkerStatus::Paused => "Paused",
            WorkerStatus::Stopped => "Stopped",
        };
        f.write_str(s)
    }
}

type Reply = oneshot::Sender<Result<()>>;

enum Request {
    Add { name: String, mdel: f64, reply: Reply },
    Remove { name: String, reply: Reply },
    SetMdel { name: String, mdel: f64, reply: Reply },
    Stop,
}

/// State shared between the controlling handle and the loop thread.
struct Shared {
    registry: RwLock<Registry>,
    update_lock: Mutex<()>,
    started: AtomicBool,
    paused: AtomicBool,
    exited: AtomicBool,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Marks the worker as exited when the loop thread ends, including by panic.
struct ExitGuard(Arc<Shared>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.exited.store(true, Ordering::SeqCst);
    }
}

/// Handle to a PV bridge worker.
///
/// The worker owns every subscription. Callers drive it through blocking
/// methods that are marshaled onto its event loop, and read result cells
/// through [`PvDataWorker::get_result`].
pub struct PvDataWorker {
    name: String,
    heartbeat_interval: Duration,
    client: Arc<dyn PvClient>,
    shared: Arc<Shared>,
    requests: Option<mpsc::UnboundedSender<Request>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl PvDataWorker {
    /// Create a worker that will subscribe through `client`. Call
    /// [`PvDataWorker::start`] to run it.
    pub fn new(client: Arc<dyn PvClient>, config: WorkerConfig) -> Self {
        let name = config.name.unwrap_or_else(|| {
            format!("pv-worker-{}", WORKER_COUNTER.fetch_add(1, Ordering::Relaxed))
        });
        tracing::info!("Get worker ({name}) ready");
        Self {
            name,
            heartbeat_interval: config.heartbeat_interval,
            client,
            shared: Arc::new(Shared {
                registry: RwLock::new(Registry::default()),
                update_lock: Mutex::new(()),
                started: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                exited: AtomicBool::new(false),
            }),
            requests: None,
            thread: None,
        }
    }

    /// Create and start a worker in one step.
    pub fn spawn(client: Arc<dyn PvClient>, config: WorkerConfig) -> Result<Self> {
        let mut worker = Self::new(client, config);
        worker.start()?;
        Ok(worker)
    }

    /// Spawn the loop thread and wait until its event loop is ready.
    pub fn start(&mut self) -> Result<()> {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::AlreadyStarted);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
        let ctx = LoopContext {
            name: self.name.clone(),
            client: Arc::clone(&self.client),
            shared: Arc::clone(&self.shared),
        };
        let heartbeat = self.heartbeat_interval;

        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run_loop(ctx, heartbeat, rx, ready_tx))
            .map_err(|e| {
                self.shared.exited.store(true, Ordering::SeqCst);
                BridgeError::SpawnFailed(e)
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.requests = Some(tx);
                self.thread = Some(handle);
                tracing::info!("Worker ({}) started", self.name);
                Ok(())
            }
            Ok(Err(reason)) => {
                let _ = handle.join();
                Err(BridgeError::EventLoop(reason))
            }
            Err(_) => {
                let _ = handle.join();
                Err(BridgeError::WorkerPanicked)
            }
        }
    }

    /// Subscribe `name` with deadband `mdel`, blocking until the loop has
    /// handled the request.
    ///
    /// An invalid name is logged and ignored. Adding a name that is already
    /// subscribed only updates its deadband.
    pub fn add_pv(&self, name: &str, mdel: f64) -> Result<()> {
        self.request(|reply| Request::Add {
            name: name.to_string(),
            mdel,
            reply,
        })
    }

    /// Close the subscription for `name` and drop its result cell. Unknown
    /// names are logged and ignored.
    pub fn del_pv(&self, name: &str) -> Result<()> {
        self.request(|reply| Request::Remove {
            name: name.to_string(),
            reply,
        })
    }

    /// Set the deadband for `name` without touching its subscription.
    pub fn set_mdel(&self, name: &str, mdel: f64) -> Result<()> {
        self.request(|reply| Request::SetMdel {
            name: name.to_string(),
            mdel,
            reply,
        })
    }

    /// Result cell for a subscribed name.
    pub fn get_result(&self, name: &str) -> Option<Arc<ResultCell>> {
        self.shared.read().get_result(name)
    }

    /// Deadband recorded for `name`, including names no longer subscribed.
    pub fn mdel(&self, name: &str) -> Option<f64> {
        self.shared.read().mdel(name)
    }

    /// Every live subscription with its state, ordered by name.
    pub fn list(&self) -> Vec<(String, SubscriptionState)> {
        self.shared.read().list()
    }

    /// Log the state of every live subscription.
    pub fn show_all_pvs(&self) {
        for (name, state) in self.list() {
            tracing::info!("{name} is {state}");
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::SeqCst)
    }

    /// Whether the event loop thread has exited.
    pub fn is_stopped(&self) -> bool {
        self.shared.exited.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> WorkerStatus {
        if self.is_stopped() {
            WorkerStatus::Stopped
        } else if !self.is_started() {
            WorkerStatus::Created
        } else if self.shared.paused.load(Ordering::SeqCst) {
            WorkerStatus::Paused
        } else {
            WorkerStatus::Running
        }
    }

    /// Flag the worker as paused. Only the reported status changes.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
    }

    /// Stop the event loop and wait for the worker thread to finish.
    ///
    /// Requests already queued are served before the loop exits; remaining
    /// subscriptions are then closed. Calling `stop` on a worker that is not
    /// running returns [`BridgeError::NotRunning`].
    pub fn stop(&mut self) -> Result<()> {
        let handle = self.thread.take().ok_or(BridgeError::NotRunning)?;
        tracing::info!("Stop and close loop of worker ({})", self.name);
        if let Some(requests) = self.requests.take() {
            let _ = requests.send(Request::Stop);
        }
        let joined = handle.join();
        tracing::info!("Worker ({}) is stopped? {}", self.name, self.is_stopped());
        joined.map_err(|_| BridgeError::WorkerPanicked)
    }

    fn request(&self, build: impl FnOnce(Reply) -> Request) -> Result<()> {
        let requests = self.requests.as_ref().ok_or(BridgeError::NotRunning)?;
        let (reply, outcome) = oneshot::channel();
        requests
            .send(build(reply))
            .map_err(|_| BridgeError::NotRunning)?;
        outcome.blocking_recv().map_err(|_| BridgeError::NotRunning)?
    }
}

impl Drop for PvDataWorker {
    fn drop(&mut self) {
        if self.thread.is_some() {
            if let Err(e) = self.stop() {
                tracing::warn!("Worker ({}) did not stop cleanly: {e}", self.name);
            }
        }
    }
}

impl fmt::Display for PvDataWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[PvDataWorker]({}): {}", self.name, self.status())
    }
}

impl fmt::Debug for PvDataWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PvDataWorker")
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

/// Run `task` once on a new detached thread.
pub fn execute_task<F>(task: F) -> std::io::Result<()>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name("pv-task".to_string())
        .spawn(task)
        .map(drop)
}

// ============================================================================
// Loop thread
// ============================================================================

/// Everything the loop thread needs to serve requests.
struct LoopContext {
    name: String,
    client: Arc<dyn PvClient>,
    shared: Arc<Shared>,
}

fn run_loop(
    ctx: LoopContext,
    heartbeat: Duration,
    mut requests: mpsc::UnboundedReceiver<Request>,
    ready: std_mpsc::SyncSender<std::result::Result<(), String>>,
) {
    let _exit = ExitGuard(Arc::clone(&ctx.shared));

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::warn!("Worker ({}) could not build its event loop: {e}", ctx.name);
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };

    let name = ctx.name.clone();
    runtime.block_on(async move {
        let beat = tokio::spawn(liveness(ctx.name.clone(), heartbeat));
        let _ = ready.send(Ok(()));

        while let Some(request) = requests.recv().await {
            match request {
                Request::Add { name, mdel, reply } => {
                    let _ = reply.send(ctx.add(&name, mdel).await);
                }
                Request::Remove { name, reply } => {
                    let _ = reply.send(ctx.remove(&name).await);
                }
                Request::SetMdel { name, mdel, reply } => {
                    ctx.set_mdel(&name, mdel);
                    let _ = reply.send(Ok(()));
                }
                Request::Stop => break,
            }
        }

        beat.abort();
        ctx.close_all().await;
    });
    tracing::debug!("Worker ({name}) event loop closed");
}

/// Periodically prove the event loop is still turning.
async fn liveness(name: String, period: Duration) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        tracing::info!("Worker ({name}): event loop is running ...");
    }
}

impl LoopContext {
    async fn add(&self, name: &str, mdel: f64) -> Result<()> {
        if !is_valid_pv(name) {
            tracing::warn!("Not adding an invalid PV: {name:?}");
            return Ok(());
        }
        let mdel = checked_mdel(name, mdel);

        {
            let mut registry = self.shared.write();
            if registry.contains(name) {
                tracing::info!("Already added {name}, deadband set to {mdel}");
                registry.set_mdel(name, mdel);
                return Ok(());
            }
        }

        tracing::info!("Add {name}");
        let (sink, values) = MonitorSink::channel();
        let subscription = self.client.monitor(name, sink).await.map_err(|e| {
            tracing::warn!("Failed to subscribe {name}: {e}");
            e
        })?;

        // The pump cannot run before this task yields, so the result cell is
        // registered before the first value is applied.
        let pump = tokio::spawn(pump_values(
            Arc::clone(&self.shared),
            name.to_string(),
            values,
        ));
        let live = {
            let mut registry = self.shared.write();
            registry.insert(name, subscription, pump, mdel);
            registry.len()
        };
        tracing::debug!("{live} live subscriptions");
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let detached = self.shared.write().detach(name);
        let Some(mut subscription) = detached else {
            tracing::info!("{name} is not found.");
            return Ok(());
        };

        tracing::info!("Remove {name}");
        // The result cell stays registered until the close succeeds, so values
        // delivered meanwhile are still applied.
        let closed = subscription.close().await;
        if let Err(e) = closed {
            tracing::warn!("Failed to close subscription for {name}: {e}");
            self.shared.write().reattach(name, subscription);
            return Err(e.into());
        }
        let taken = self.shared.write().take(name);
        if let Some((entry, _cell)) = taken {
            entry.pump.abort();
        }
        Ok(())
    }

    fn set_mdel(&self, name: &str, mdel: f64) {
        let mdel = checked_mdel(name, mdel);
        tracing::info!("Set deadband of {name} to {mdel}");
        self.shared.write().set_mdel(name, mdel);
    }

    async fn close_all(&self) {
        let entries = self.shared.write().drain();
        if !entries.is_empty() {
            tracing::info!("Closing {} remaining subscriptions", entries.len());
        }
        for (name, mut entry) in entries {
            entry.pump.abort();
            if let Err(e) = entry.subscription.close().await {
                tracing::warn!("Failed to close subscription for {name}: {e}");
            }
        }
    }
}

/// Apply every value delivered for `name`, in arrival order.
async fn pump_values(
    shared: Arc<Shared>,
    name: String,
    mut values: mpsc::UnboundedReceiver<PvValue>,
) {
    while let Some(value) = values.recv().await {
        on_value(&shared, &name, value).await;
    }
    tracing::debug!("Value stream for {name} ended");
}

/// Apply one incoming value under the global update lock.
async fn on_value(shared: &Shared, name: &str, value: PvValue) -> bool {
    let _update = shared.update_lock.lock().await;
    let (cell, mdel) = {
        let registry = shared.read();
        let cell = registry.get_result(name);
        let mdel = registry.mdel(name).unwrap_or(0.0);
        (cell, mdel)
    };
    let Some(cell) = cell else {
        tracing::debug!("Dropping value for unsubscribed {name}");
        return false;
    };
    let accepted = cell.update_value(value, mdel);
    tracing::trace!("{name}: update accepted={accepted}");
    accepted
}

/// Deadbands must be non-negative numbers; anything else falls back to 0.
fn checked_mdel(name: &str, mdel: f64) -> f64 {
    if mdel >= 0.0 {
        mdel
    } else {
        tracing::warn!("Invalid deadband {mdel} for {name}, using 0");
        0.0
    }
}
