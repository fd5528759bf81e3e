//! Wall-clock aligned tick source
//!
//! A cadence `c` fires whenever the second of the hour is a multiple of `c`,
//! so groups whose cadences divide each other always fire together.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::clock::Clock;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Pause after firing so the same boundary second is not seen twice
const SETTLE: Duration = Duration::from_secs(1);

/// Whether `now` falls on a boundary of `cadence_seconds`
pub fn is_aligned(now: DateTime<Utc>, cadence_seconds: u32) -> bool {
    if cadence_seconds == 0 {
        return false;
    }
    let second_of_hour = now.minute() * 60 + now.second();
    second_of_hour % cadence_seconds == 0
}

/// Fires at most once per aligned second
#[derive(Debug, Clone)]
pub struct TickGate {
    cadence_seconds: u32,
    last_fired: Option<i64>,
}

impl TickGate {
    pub fn new(cadence_seconds: u32) -> Self {
        Self {
            cadence_seconds,
            last_fired: None,
        }
    }

    pub fn poll(&mut self, now: DateTime<Utc>) -> bool {
        if !is_aligned(now, self.cadence_seconds) {
            return false;
        }
        let second = now.timestamp();
        if self.last_fired == Some(second) {
            return false;
        }
        self.last_fired = Some(second);
        true
    }
}

/// Polls a [`Clock`] and sends one message per aligned boundary
pub struct Ticker {
    gate: TickGate,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
}

impl Ticker {
    pub fn new(cadence_seconds: u32, clock: Arc<dyn Clock>, poll_interval: Duration) -> Self {
        Self {
            gate: TickGate::new(cadence_seconds),
            clock,
            poll_interval,
        }
    }

    /// Run until the receiving side is dropped
    ///
    /// Ticks are offered with `try_send`; when the receiver is still busy
    /// with an earlier tick the new one is dropped and alignment is kept.
    pub fn spawn(mut self, tx: mpsc::Sender<DateTime<Utc>>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let cadence = self.gate.cadence_seconds;
            loop {
                let now = self.clock.now();
                if !self.gate.poll(now) {
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }

                match tx.try_send(now) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(cadence, tick = %now, "interval group still busy, dropping tick");
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(cadence, "tick receiver closed, stopping ticker");
                        return;
                    }
                }
                tokio::time::sleep(SETTLE).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn at(minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, second).unwrap()
    }

    #[test]
    fn test_alignment_by_second_of_hour() {
        assert!(is_aligned(at(0, 0), 30));
        assert!(is_aligned(at(0, 30), 30));
        assert!(is_aligned(at(7, 0), 30));
        assert!(!is_aligned(at(7, 10), 30));
        assert!(is_aligned(at(7, 10), 10));
        // 420 + 10 = 430, not a multiple of 60
        assert!(!is_aligned(at(7, 10), 60));
        assert!(!is_aligned(at(0, 0), 0));
    }

    #[test]
    fn test_divisor_cadences_fire_together() {
        for minute in 0..60 {
            for second in 0..60 {
                let now = at(minute, second);
                if is_aligned(now, 60) {
                    assert!(is_aligned(now, 30) && is_aligned(now, 10));
                }
            }
        }
    }

    #[test]
    fn test_gate_fires_once_per_boundary() {
        let mut gate = TickGate::new(30);
        let boundary = at(3, 30);

        assert!(gate.poll(boundary));
        assert!(!gate.poll(boundary));
        assert!(!gate.poll(boundary + chrono::Duration::milliseconds(400)));
        assert!(!gate.poll(at(3, 31)));
        assert!(gate.poll(at(4, 0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_sends_once_per_boundary() {
        let clock = Arc::new(ManualClock::new(at(12, 30)));
        let (tx, mut rx) = mpsc::channel(1);
        let handle = Ticker::new(30, clock.clone(), DEFAULT_POLL_INTERVAL).spawn(tx);

        assert_eq!(rx.recv().await, Some(at(12, 30)));

        // the clock is frozen on the boundary, nothing more may arrive
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(second.is_err());

        clock.set(at(13, 0));
        assert_eq!(rx.recv().await, Some(at(13, 0)));

        drop(rx);
        clock.set(at(13, 30));
        handle.await.unwrap();
    }
}
