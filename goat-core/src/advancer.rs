//! Pacing between requests.
use async_trait::async_trait;
use std::time::Duration;
use tokio::{
    sync::{mpsc, Mutex},
    time::{Instant, Interval, MissedTickBehavior},
};

/// Blocks until the next request may be sent.
#[async_trait]
pub trait Waiter: Send + Sync {
    async fn wait(&self);
}

/// Releases one pending or future [`Waiter::wait`] call.
#[async_trait]
pub trait Advancer: Send + Sync {
    async fn advance(&self);
}

/// Proceeds without waiting.
#[derive(Debug, Default, Clone, Copy)]
pub struct Immediate;

#[async_trait]
impl Waiter for Immediate {
    async fn wait(&self) {}
}

/// Releases one wait per elapsed period.
pub struct Ticker {
    interval: Mutex<Interval>,
}

impl Ticker {
    pub fn new(period: Duration) -> Ticker {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Ticker {
            interval: Mutex::new(interval),
        }
    }
}

#[async_trait]
impl Waiter for Ticker {
    async fn wait(&self) {
        self.interval.lock().await.tick().await;
    }
}

/// Hand-off between one advancing and one waiting side. One advance releases exactly one wait.
/// A single advance issued before anybody waits is kept until the next wait.
pub struct Manual {
    tx: mpsc::Sender<()>,
    rx: Mutex<mpsc::Receiver<()>>,
}

impl Default for Manual {
    fn default() -> Self {
        Self::new()
    }
}

impl Manual {
    pub fn new() -> Manual {
        let (tx, rx) = mpsc::channel(1);
        Manual {
            tx,
            rx: Mutex::new(rx),
        }
    }
}

#[async_trait]
impl Waiter for Manual {
    async fn wait(&self) {
        // the sender lives in self, the channel can not close while waiting
        self.rx.lock().await.recv().await;
    }
}

#[async_trait]
impl Advancer for Manual {
    async fn advance(&self) {
        let _ = self.tx.send(()).await;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use tokio::time::timeout;

    #[tokio::test]
    async fn immediate_does_not_block() {
        timeout(Duration::from_millis(50), Immediate.wait())
            .await
            .expect("immediate waiter blocked");
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_waits_for_period() {
        let ticker = Ticker::new(Duration::from_secs(1));
        let start = Instant::now();
        ticker.wait().await;
        ticker.wait().await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn manual_advance_before_wait_is_kept() {
        let manual = Manual::new();
        manual.advance().await;
        timeout(Duration::from_millis(100), manual.wait())
            .await
            .expect("queued advance was lost");
    }

    #[tokio::test]
    async fn manual_wait_blocks_until_advanced() {
        let manual = Arc::new(Manual::new());
        assert!(timeout(Duration::from_millis(50), manual.wait())
            .await
            .is_err());

        let advancer = manual.clone();
        tokio::spawn(async move { advancer.advance().await });

        timeout(Duration::from_secs(1), manual.wait())
            .await
            .expect("advance did not release the waiter");
    }
}
