//! Time-based message identifiers.
//!
//! Ids are derived from the *server's* notion of time, so the client keeps a
//! [`ServerClock`] that is resynchronized from the ids the server sends.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─── ServerClock ─────────────────────────────────────────────────────────────

struct ClockState {
    server_time: f64,
    synced_at: Instant,
}

/// Estimated server time.
///
/// Server time is `last_sync + (monotonic_now - monotonic_at_sync)`, so wall
/// clock jumps on the local machine never move it backwards. One clock is
/// shared (`Arc`) by every session of a client.
pub struct ServerClock {
    state: Mutex<ClockState>,
    ticking: bool,
}

impl ServerClock {
    /// A clock starting at the local wall time.
    pub fn new() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        Self::starting_at(now)
    }

    /// A clock starting at `server_time` seconds.
    pub fn starting_at(server_time: f64) -> Self {
        Self {
            state: Mutex::new(ClockState { server_time, synced_at: Instant::now() }),
            ticking: true,
        }
    }

    /// A clock that never advances on its own; only [`ServerClock::sync`]
    /// moves it.
    pub fn frozen(server_time: f64) -> Self {
        Self { ticking: false, ..Self::starting_at(server_time) }
    }

    /// Current server time, in seconds since the epoch.
    pub fn now(&self) -> f64 {
        let s = lock(&self.state);
        if self.ticking {
            s.server_time + s.synced_at.elapsed().as_secs_f64()
        } else {
            s.server_time
        }
    }

    /// Adopt the time encoded in a server `msg_id`.
    pub fn sync(&self, msg_id: i64) {
        let server_time = msg_id as f64 / 2f64.powi(32);
        let mut s = lock(&self.state);
        log::debug!("server time synced: {:.3} (drift {:+.3}s)", server_time, server_time - s.server_time);
        s.server_time = server_time;
        s.synced_at = Instant::now();
    }
}

impl Default for ServerClock {
    fn default() -> Self { Self::new() }
}

impl std::fmt::Debug for ServerClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerClock").field("now", &self.now()).field("ticking", &self.ticking).finish()
    }
}

// ─── MsgIdGenerator ──────────────────────────────────────────────────────────

/// Allocates strictly increasing client message ids.
///
/// The candidate is `floor(server_time * 2^32)` with the two low bits cleared;
/// when it does not exceed the previous id the previous id plus 4 is used
/// instead. Safe to share between tasks.
#[derive(Debug)]
pub struct MsgIdGenerator {
    clock: Arc<ServerClock>,
    last: Mutex<i64>,
}

impl MsgIdGenerator {
    /// A generator reading time from `clock`.
    pub fn new(clock: Arc<ServerClock>) -> Self {
        Self { clock, last: Mutex::new(0) }
    }

    /// Stand-alone generator bound to the local system clock.
    ///
    /// For code that needs a well-formed id with no session at hand; prefer
    /// the session's own generator wherever one exists.
    pub fn system() -> Self {
        Self::new(Arc::new(ServerClock::new()))
    }

    /// The clock this generator reads.
    pub fn clock(&self) -> &Arc<ServerClock> {
        &self.clock
    }

    /// Allocate the next id.
    pub fn next_id(&self) -> i64 {
        let mut last = lock(&self.last);
        let candidate = ((self.clock.now() * 2f64.powi(32)) as i64) & !3;
        let id = if candidate > *last { candidate } else { *last + 4 };
        *last = id;
        id
    }

    /// The most recently allocated id, `0` before the first allocation.
    pub fn last(&self) -> i64 {
        *lock(&self.last)
    }
}
