//! Repeating read tasks.
//!
//! Two independent cancellable tasks: characteristic polling for the
//! selected device, and signal-strength refresh for every connected device.
//! The tasks only emit ticks into the manager's command channel; the reads
//! themselves are issued by the manager so that all state stays on its
//! owning task. No task may outlive its governing condition: starting,
//! stopping, selection changes, disconnects, and radio loss all cancel
//! through the stored [`CancellationToken`]s.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::commands::Command;

/// Owner of the polling and signal-strength refresh tasks.
#[derive(Debug, Default)]
pub struct PollingScheduler {
    poll: Option<CancellationToken>,
    rssi: Option<CancellationToken>,
}

impl PollingScheduler {
    /// Create a scheduler with no tasks running.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start characteristic polling, cancelling any existing polling task
    /// first. Each tick sends [`Command::PollTick`].
    pub fn start_polling(&mut self, every: Duration, tx: UnboundedSender<Command>) {
        self.stop_polling();
        self.poll = Some(spawn_ticker(every, tx, || Command::PollTick));
    }

    /// Cancel the polling task; idempotent.
    pub fn stop_polling(&mut self) {
        if let Some(token) = self.poll.take() {
            debug!("Cancelling characteristic polling task");
            token.cancel();
        }
    }

    /// Whether characteristic polling is currently active.
    pub fn is_polling(&self) -> bool {
        self.poll.is_some()
    }

    /// Start the signal-strength refresh task, cancelling any existing one
    /// first. Each tick sends [`Command::RssiTick`].
    pub fn start_rssi_updates(&mut self, every: Duration, tx: UnboundedSender<Command>) {
        self.stop_rssi_updates();
        self.rssi = Some(spawn_ticker(every, tx, || Command::RssiTick));
    }

    /// Cancel the signal-strength task; idempotent.
    pub fn stop_rssi_updates(&mut self) {
        if let Some(token) = self.rssi.take() {
            debug!("Cancelling signal-strength refresh task");
            token.cancel();
        }
    }

    /// Cancel both tasks (explicit stop, shutdown, or radio loss).
    pub fn stop_all(&mut self) {
        self.stop_polling();
        self.stop_rssi_updates();
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}

fn spawn_ticker(
    every: Duration,
    tx: UnboundedSender<Command>,
    make: impl Fn() -> Command + Send + 'static,
) -> CancellationToken {
    let token = CancellationToken::new();
    let task_token = token.clone();
    tokio::spawn(async move {
        let mut ticker = interval(every);
        loop {
            tokio::select! {
                _ = task_token.cancelled() => break,
                _ = ticker.tick() => {
                    if tx.send(make()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    token
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn polling_ticks_until_cancelled() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = PollingScheduler::new();
        scheduler.start_polling(Duration::from_secs(1), tx);
        assert!(scheduler.is_polling());

        // First tick is immediate, the next arrives an interval later
        assert!(matches!(rx.recv().await, Some(Command::PollTick)));
        assert!(matches!(rx.recv().await, Some(Command::PollTick)));

        scheduler.stop_polling();
        assert!(!scheduler.is_polling());
        // Sender side of the ticker is gone once the task observes the cancel
        tokio::time::sleep(Duration::from_secs(5)).await;
        while let Ok(cmd) = rx.try_recv() {
            assert!(matches!(cmd, Command::PollTick));
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_previous_task() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = PollingScheduler::new();
        scheduler.start_polling(Duration::from_secs(10), tx.clone());
        scheduler.start_polling(Duration::from_secs(10), tx);

        // Two immediate ticks (one per start) is acceptable; afterwards only
        // one task keeps ticking
        tokio::time::sleep(Duration::from_secs(25)).await;
        let mut ticks = 0;
        while rx.try_recv().is_ok() {
            ticks += 1;
        }
        assert!(ticks <= 5, "old task kept running: {ticks} ticks");
        scheduler.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn rssi_task_is_independent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = PollingScheduler::new();
        scheduler.start_rssi_updates(Duration::from_secs(2), tx);
        assert!(!scheduler.is_polling());

        assert!(matches!(rx.recv().await, Some(Command::RssiTick)));
        scheduler.stop_rssi_updates();
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let mut scheduler = PollingScheduler::new();
        scheduler.stop_polling();
        scheduler.stop_rssi_updates();
        scheduler.stop_all();
    }
}
