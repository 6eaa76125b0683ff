//! Session clock: one tick per second while recording
//!
//! The counter itself lives in the `Recording` state; the clock only
//! delivers `ClockTick` events tagged with the session id.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::state_machine::Event;

const TICK_PERIOD: Duration = Duration::from_secs(1);

struct ActiveTimer {
    session_id: Uuid,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
pub struct SessionClock {
    active: Option<ActiveTimer>,
}

impl SessionClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ticking for `session_id`. The first tick arrives one period
    /// after this call. The recorder's state check guarantees the clock is
    /// not already running.
    pub fn begin(&mut self, session_id: Uuid, tx: mpsc::UnboundedSender<Event>) {
        debug_assert!(self.active.is_none(), "session clock already running");
        self.end();

        // Phase is fixed here, not when the task first runs.
        let start = tokio::time::Instant::now() + TICK_PERIOD;
        let cancel = CancellationToken::new();
        let cancelled = cancel.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(start, TICK_PERIOD);
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = interval.tick() => {
                        if tx.send(Event::ClockTick { id: session_id }).is_err() {
                            log::debug!("Session clock stopping - channel closed");
                            break;
                        }
                    }
                }
            }
        });

        log::debug!("Session clock started for {}", session_id);
        self.active = Some(ActiveTimer {
            session_id,
            cancel,
            task,
        });
    }

    /// Halt the clock. Returns false if it was not running.
    pub fn end(&mut self) -> bool {
        match self.active.take() {
            Some(timer) => {
                timer.cancel.cancel();
                timer.task.abort();
                log::debug!("Session clock stopped for {}", timer.session_id);
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }
}

impl Drop for SessionClock {
    fn drop(&mut self) {
        self.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_second_until_ended() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut clock = SessionClock::new();
        let id = Uuid::new_v4();
        clock.begin(id, tx);
        settle().await;
        assert!(rx.try_recv().is_err(), "no tick at t=0");

        for _ in 0..3 {
            tokio::time::advance(TICK_PERIOD).await;
            settle().await;
        }
        let mut ticks = 0;
        while let Ok(Event::ClockTick { id: got }) = rx.try_recv() {
            assert_eq!(got, id);
            ticks += 1;
        }
        assert_eq!(ticks, 3);

        assert!(clock.end());
        assert!(!clock.is_running());
        tokio::time::advance(TICK_PERIOD * 3).await;
        settle().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_is_one_period_after_begin() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut clock = SessionClock::new();
        let id = Uuid::new_v4();
        clock.begin(id, tx);

        // Time moves before the task is ever polled
        tokio::time::advance(TICK_PERIOD).await;
        settle().await;
        assert!(matches!(rx.try_recv(), Ok(Event::ClockTick { id: got }) if got == id));

        tokio::time::advance(TICK_PERIOD).await;
        settle().await;
        assert!(matches!(rx.try_recv(), Ok(Event::ClockTick { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn end_without_begin_is_noop() {
        let mut clock = SessionClock::new();
        assert!(!clock.end());
        assert!(!clock.end());
    }
}
