//! Background conversion worker.
//!
//! One dedicated thread drains the shared [`ConversionQueue`], one region per
//! step, and only while the [`IdleDetector`] agrees. The scheduling step is
//! exposed as [`ConversionWorker::tick`] so tests can drive conversion
//! deterministically without a thread or a clock.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::convert::{ConversionManager, ConversionQueue, IdleDetector};

#[derive(Debug, Clone, Copy)]
pub struct ConverterConfig {
    /// How long the worker sleeps when there is nothing to do.
    pub poll_interval: Duration,
    /// Attempts per region before it is parked as failed.
    pub max_retries: u32,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_retries: 3,
        }
    }
}

/// The scheduling core: one `tick` converts at most one region.
pub struct ConversionWorker {
    manager: Arc<ConversionManager>,
    queue: Arc<ConversionQueue>,
    idle: Arc<IdleDetector>,
    max_retries: u32,
}

impl ConversionWorker {
    pub fn new(
        manager: Arc<ConversionManager>,
        idle: Arc<IdleDetector>,
        max_retries: u32,
    ) -> Self {
        let queue = manager.queue();
        Self {
            manager,
            queue,
            idle,
            max_retries,
        }
    }

    /// Attempt one region. Returns `true` if a conversion was attempted,
    /// `false` when the host is busy or the queue is empty. Work never spans
    /// a tick, so shutdown waits for at most one region.
    pub fn tick(&self) -> bool {
        if !self.idle.is_idle() {
            return false;
        }
        let Some(region) = self.queue.next() else {
            return false;
        };
        match self.manager.migrate_region(region) {
            Ok(outcome) => {
                self.queue.note_success(region);
                log::debug!(
                    "background conversion finished region {region} ({} chunks)",
                    outcome.converted
                );
            }
            Err(e) => {
                let requeued = self.queue.note_failure(region, self.max_retries);
                if requeued {
                    log::warn!("conversion of region {region} failed, will retry: {e}");
                } else {
                    log::error!(
                        "conversion of region {region} failed {} times, giving up: {e}",
                        self.max_retries
                    );
                }
            }
        }
        true
    }
}

/// Owns the converter thread. Dropping (or calling [`stop`]) signals the
/// thread and joins it.
///
/// [`stop`]: BackgroundConverter::stop
pub struct BackgroundConverter {
    stop_tx: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundConverter {
    pub fn spawn(
        manager: Arc<ConversionManager>,
        idle: Arc<IdleDetector>,
        config: ConverterConfig,
    ) -> std::io::Result<Self> {
        let worker = ConversionWorker::new(manager, idle, config.max_retries);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let poll = config.poll_interval;
        let handle = std::thread::Builder::new()
            .name("strata-converter".into())
            .spawn(move || run_loop(worker, stop_rx, poll))?;
        Ok(Self {
            stop_tx: Mutex::new(Some(stop_tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Signal the worker and wait for it to finish its current region.
    pub fn stop(&self) {
        if let Some(tx) = self.stop_tx.lock().take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                log::error!("background converter thread panicked");
            }
        }
    }
}

impl Drop for BackgroundConverter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(worker: ConversionWorker, stop_rx: Receiver<()>, poll: Duration) {
    log::debug!("background converter started");
    loop {
        if worker.tick() {
            // Keep draining while there is work, but stay interruptible.
            match stop_rx.try_recv() {
                Ok(_) | Err(crossbeam_channel::TryRecvError::Disconnected) => break,
                Err(crossbeam_channel::TryRecvError::Empty) => continue,
            }
        }
        match stop_rx.recv_timeout(poll) {
            Ok(_) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
    log::debug!("background converter stopped");
}
