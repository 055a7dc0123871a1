//! Log output of the worker, captured through a process-wide subscriber.
//!
//! The worker logs from its own thread, so the capture must be global. This
//! file holds a single test to keep the captured output to itself.

use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use pvcalc::{PvDataWorker, SoftIoc, WorkerConfig};

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn test_worker_logs_rejections_and_heartbeat() {
    let capture = Capture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    tracing::subscriber::set_global_default(subscriber).unwrap();

    let ioc = SoftIoc::new();
    let config = WorkerConfig::default()
        .with_name("logged")
        .with_heartbeat_interval(Duration::from_millis(10));
    let mut worker = PvDataWorker::spawn(Arc::new(ioc.clone()), config).unwrap();

    worker.add_pv("bad name!", 0.0).unwrap();
    assert!(worker.list().is_empty());
    let logs = capture.contents();
    assert!(logs.contains("WARN"), "{logs}");
    assert!(logs.contains("bad name!"), "{logs}");

    // The liveness message shows at the default CLI level.
    assert!(wait_until(|| capture
        .contents()
        .contains("Worker (logged): event loop is running")));

    worker.stop().unwrap();
}
