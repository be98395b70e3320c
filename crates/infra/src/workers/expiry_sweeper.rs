//! Background thread that releases expired reservations.

use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use stockledger_core::Clock;

use crate::error::{LedgerError, LedgerResult};
use crate::reservations::ReservationManager;

/// Sweeper runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SweeperStats {
    pub sweeps: u64,
    pub reservations_released: u64,
    pub failed_sweeps: u64,
    pub uptime_secs: u64,
}

/// Handle to a running sweeper. Dropping it without `shutdown` leaves the
/// thread running until the sender side disconnects.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<SweeperStats>>,
}

impl SweeperHandle {
    /// Stop the loop and wait for the current sweep to finish.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    pub fn stats(&self) -> SweeperStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

pub struct ExpirySweeper {
    reservations: Arc<ReservationManager>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(reservations: Arc<ReservationManager>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            reservations,
            clock,
            interval,
        }
    }

    /// Run one sweep now.
    pub fn sweep_once(&self) -> LedgerResult<usize> {
        Ok(self.reservations.sweep_expired(self.clock.now())?.len())
    }

    pub fn spawn(self) -> LedgerResult<SweeperHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(SweeperStats::default()));
        let stats_clone = stats.clone();

        let join = thread::Builder::new()
            .name("reservation-sweeper".to_string())
            .spawn(move || sweeper_loop(self, shutdown_rx, stats_clone))
            .map_err(|e| LedgerError::Store(format!("failed to spawn reservation sweeper: {e}")))?;

        Ok(SweeperHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

fn sweeper_loop(sweeper: ExpirySweeper, shutdown: mpsc::Receiver<()>, stats: Arc<Mutex<SweeperStats>>) {
    let started = Instant::now();
    info!(interval_ms = sweeper.interval.as_millis() as u64, "reservation sweeper started");

    loop {
        match shutdown.recv_timeout(sweeper.interval) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        let outcome = sweeper.sweep_once();
        if let Ok(mut s) = stats.lock() {
            s.sweeps += 1;
            s.uptime_secs = started.elapsed().as_secs();
            match &outcome {
                Ok(n) => s.reservations_released += *n as u64,
                Err(_) => s.failed_sweeps += 1,
            }
        }
        match outcome {
            Ok(0) => debug!("sweep found nothing to release"),
            Ok(n) => debug!(released = n, "sweep complete"),
            Err(e) => error!(error = %e, "reservation sweep failed"),
        }
    }

    info!("reservation sweeper stopped");
}
