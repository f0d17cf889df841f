// SPDX-License-Identifier: GPL-3.0-only

//! Fixed-rate refresh driver
//!
//! Ticks that fall behind are skipped, never queued, so a slow render drops
//! display frames instead of bursting to catch up.

use super::RenderTick;
use crate::constants::display::DEFAULT_REFRESH_HZ;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Handle to a running refresh task
pub struct DisplayLink {
    rate_hz: u32,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<u64>>,
}

impl DisplayLink {
    /// Start calling `tick` at `rate_hz` on the current tokio runtime.
    ///
    /// A rate of zero falls back to the default refresh rate.
    pub fn start(rate_hz: u32, tick: Arc<dyn RenderTick>) -> Self {
        let rate_hz = if rate_hz == 0 {
            DEFAULT_REFRESH_HZ
        } else {
            rate_hz
        };
        let period = Duration::from_secs_f64(1.0 / rate_hz as f64);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut ticks = 0u64;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = interval.tick() => {
                        tick.tick();
                        ticks += 1;
                    }
                }
            }

            debug!(ticks, "Display link finished");
            ticks
        });

        info!(rate_hz, "Display link started");

        Self {
            rate_hz,
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }

    pub fn rate_hz(&self) -> u32 {
        self.rate_hz
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop ticking and wait for the task; returns the number of ticks delivered
    pub async fn stop(mut self) -> u64 {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        match self.task.take() {
            Some(task) => task.await.unwrap_or(0),
            None => 0,
        }
    }
}

impl Drop for DisplayLink {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct CountingTick(AtomicU64);

    impl RenderTick for CountingTick {
        fn tick(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_ticks_until_stopped() {
        let counter = Arc::new(CountingTick::default());
        let link = DisplayLink::start(200, counter.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;

        let reported = link.stop().await;
        let observed = counter.0.load(Ordering::SeqCst);
        assert!(observed > 0);
        assert_eq!(reported, observed);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), observed);
    }

    #[tokio::test]
    async fn test_zero_rate_uses_default() {
        let link = DisplayLink::start(0, Arc::new(CountingTick::default()));
        assert_eq!(link.rate_hz(), DEFAULT_REFRESH_HZ);
        link.stop().await;
    }
}
