use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Instant, interval_at},
};

use crate::token::ProofOfPresenceToken;

/// How often the remaining validity is recomputed
pub const TICK_INTERVAL: Duration = Duration::from_secs(10);

/// Wall clock used to anchor a token's absolute expiry.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    pub remaining_minutes: u64,
    pub expired: bool,
}

impl SessionState {
    fn at(deadline: Instant, now: Instant) -> Self {
        let remaining_minutes = deadline.saturating_duration_since(now).as_secs() / 60;
        Self {
            remaining_minutes,
            expired: remaining_minutes == 0,
        }
    }
}

struct ActiveSession {
    token: ProofOfPresenceToken,
    state: watch::Receiver<SessionState>,
    ticker: Option<JoinHandle<()>>,
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

/// Tracks the validity window of the single live token.
///
/// The tick task belongs to the active session and is aborted when that
/// session is dropped, so stopping, restarting and dropping the timer all
/// release it.
pub struct SessionTimer {
    clock: Arc<dyn Clock>,
    tick: Duration,
    active: Option<ActiveSession>,
}

impl SessionTimer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            tick: TICK_INTERVAL,
            active: None,
        }
    }

    /// Begin a session for `token`, discarding any previous one.
    pub fn start(&mut self, token: ProofOfPresenceToken) -> watch::Receiver<SessionState> {
        self.stop();

        // Wall clock is read once; ticks run on the monotonic clock.
        let remaining = token
            .expires_at()
            .and_then(|exp| (exp - self.clock.now()).to_std().ok())
            .unwrap_or(Duration::ZERO);
        let started = Instant::now();
        let deadline = started + remaining;
        let initial = SessionState::at(deadline, started);

        let (tx, rx) = watch::channel(initial);
        let ticker = if initial.expired {
            None
        } else {
            let tick = self.tick;
            Some(tokio::spawn(async move {
                let mut ticker = interval_at(started + tick, tick);
                loop {
                    ticker.tick().await;
                    let state = SessionState::at(deadline, Instant::now());
                    tracing::debug!(remaining_minutes = state.remaining_minutes, "Session tick");
                    tx.send_replace(state);
                    if state.expired || tx.is_closed() {
                        break;
                    }
                }
            }))
        };

        tracing::info!(
            card_id = %token.card_ref,
            remaining_minutes = initial.remaining_minutes,
            "Token session started"
        );

        self.active = Some(ActiveSession {
            token,
            state: rx.clone(),
            ticker,
        });
        rx
    }

    /// Cancel the running session. Returns whether one was active.
    pub fn stop(&mut self) -> bool {
        match self.active.take() {
            Some(session) => {
                tracing::debug!(card_id = %session.token.card_ref, "Token session stopped");
                true
            }
            None => false,
        }
    }

    pub fn token(&self) -> Option<&ProofOfPresenceToken> {
        self.active.as_ref().map(|s| &s.token)
    }

    pub fn state(&self) -> Option<SessionState> {
        self.active.as_ref().map(|s| *s.state.borrow())
    }

    #[cfg(test)]
    pub(crate) fn is_ticking(&self) -> bool {
        self.active
            .as_ref()
            .and_then(|s| s.ticker.as_ref())
            .is_some_and(|t| !t.is_finished())
    }
}
