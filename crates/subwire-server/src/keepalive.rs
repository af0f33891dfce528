//! Transport-level keep-alive: periodic ping frames with pong-timeout
//! termination.
//!
//! Distinct from protocol `ping`/`pong` messages: the driver uses the
//! transport's native ping/pong frames and never emits protocol messages,
//! so user `on_ping` hooks do not fire for heartbeats.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::socket::Socket;

/// Records transport pong arrivals between keep-alive ticks.
#[derive(Debug, Default)]
pub struct PongTracker {
    alive: AtomicBool,
}

impl PongTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark that a transport pong arrived.
    pub fn mark(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Check and reset the flag. `true` when a pong arrived since the last
    /// check.
    pub fn check_and_reset(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }
}

/// Outcome of the keep-alive loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeepAliveResult {
    /// No transport pong arrived within the window; the caller must
    /// terminate the socket abruptly (no close frame).
    TimedOut,
    /// The driver was cancelled externally (normal teardown) or the socket
    /// refused the ping (teardown already under way).
    Cancelled,
}

/// Run keep-alive pings on a socket.
///
/// Every `interval` tick the driver sends a transport ping; the following
/// tick doubles as the pong deadline. A pong observed in between (via
/// [`PongTracker::mark`]) keeps the connection alive.
///
/// A zero `interval` disables the driver: it waits for cancellation.
pub async fn run_keep_alive(
    socket: Arc<dyn Socket>,
    tracker: Arc<PongTracker>,
    interval: Duration,
    cancel: CancellationToken,
) -> KeepAliveResult {
    if interval.is_zero() {
        cancel.cancelled().await;
        return KeepAliveResult::Cancelled;
    }

    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    // The first tick fires immediately; consume it so the first ping goes
    // out a full interval after the connection opened.
    let _ = ticker.tick().await;

    let mut awaiting_pong = false;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if awaiting_pong && !tracker.check_and_reset() {
                    return KeepAliveResult::TimedOut;
                }
                if socket.ping().await.is_err() {
                    return KeepAliveResult::Cancelled;
                }
                awaiting_pong = true;
            }
            () = cancel.cancelled() => return KeepAliveResult::Cancelled,
        }
    }
}
