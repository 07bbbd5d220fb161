//! Admission of inbound message ids.
//!
//! Every message the server sends carries a fresh, odd, time-based id. The
//! validator remembers a bounded, sorted history of accepted ids and rejects
//! replays, ids left over from the previous connection, and ids whose time
//! is too far from ours.

/// Accepted ids kept before the oldest half is dropped.
pub const STORED_MSG_IDS_MAX_SIZE: usize = 2000;
/// Consecutive rejections after which the connection should be replaced.
pub const MAX_CONSECUTIVE_IGNORED: u32 = 30;
/// Ids carried over from a closed connection into the next one.
pub const RECENT_MSG_IDS: usize = 30;

const MAX_FUTURE_SKEW: f64 = 30.0;
const MAX_PAST_SKEW: f64 = -300.0;

/// Why an id was refused.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Rejection {
    /// The id belongs to the most recently closed connection.
    RecentlyClosed,
    /// The id is lower than every stored id.
    BelowWindow,
    /// The id was already accepted.
    Duplicate,
    /// The id is more than 30 seconds ahead of us.
    TooNew {
        /// Distance in seconds.
        skew: f64,
    },
    /// The id is more than 300 seconds behind us.
    TooOld {
        /// Distance in seconds.
        skew: f64,
    },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RecentlyClosed => write!(f, "msg_id belongs to the most recently closed connection"),
            Self::BelowWindow => write!(f, "msg_id is lower than all the stored values"),
            Self::Duplicate => write!(f, "msg_id is equal to one of the stored values"),
            Self::TooNew { skew } => write!(f, "msg_id is {skew:.1}s in the future"),
            Self::TooOld { skew } => write!(f, "msg_id is {:.1}s in the past", -skew),
        }
    }
}

/// Outcome of [`MsgIdValidator::admit`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Admission {
    /// Process the message.
    Accepted,
    /// Skip the message.
    Rejected {
        /// The reason.
        reason: Rejection,
        /// The consecutive-rejection budget is spent; the connection should
        /// be restarted.
        escalate: bool,
    },
}

/// Replay and clock-skew filter for one session.
#[derive(Debug, Default)]
pub struct MsgIdValidator {
    stored: Vec<i64>,
    recent: Vec<i64>,
    ignored: u32,
}

impl MsgIdValidator {
    /// An empty validator.
    pub fn new() -> Self { Self::default() }

    /// Decide whether `msg_id` may be processed.
    ///
    /// `fresh_id` produces a newly allocated client id used as the time
    /// reference; it is only called when a skew check is performed.
    pub fn admit(&mut self, msg_id: i64, fresh_id: impl FnOnce() -> i64) -> Admission {
        if self.stored.len() > STORED_MSG_IDS_MAX_SIZE {
            self.stored.drain(..STORED_MSG_IDS_MAX_SIZE / 2);
        }

        match self.check(msg_id, fresh_id) {
            Ok(at) => {
                self.ignored = 0;
                self.stored.insert(at, msg_id);
                Admission::Accepted
            }
            Err(reason) => {
                self.ignored += 1;
                Admission::Rejected { reason, escalate: self.ignored >= MAX_CONSECUTIVE_IGNORED }
            }
        }
    }

    /// Returns the insertion index of an acceptable id.
    fn check(&mut self, msg_id: i64, fresh_id: impl FnOnce() -> i64) -> Result<usize, Rejection> {
        if let Some(pos) = self.recent.iter().position(|&id| id == msg_id) {
            self.recent.remove(pos);
            return Err(Rejection::RecentlyClosed);
        }

        let Some(&min) = self.stored.first() else {
            return Ok(0);
        };
        if msg_id < min {
            return Err(Rejection::BelowWindow);
        }
        let at = match self.stored.binary_search(&msg_id) {
            Ok(_) => return Err(Rejection::Duplicate),
            Err(at) => at,
        };

        let skew = (msg_id - fresh_id()) as f64 / 2f64.powi(32);
        if skew > MAX_FUTURE_SKEW {
            return Err(Rejection::TooNew { skew });
        }
        if skew < MAX_PAST_SKEW {
            return Err(Rejection::TooOld { skew });
        }
        Ok(at)
    }

    /// Forget the consecutive-rejection count.
    pub fn reset_ignored(&mut self) {
        self.ignored = 0;
    }

    /// Consecutive rejections so far.
    pub fn ignored(&self) -> u32 {
        self.ignored
    }

    /// Remember the newest stored ids as belonging to the closing connection.
    pub fn carry_over(&mut self) {
        let from = self.stored.len().saturating_sub(RECENT_MSG_IDS);
        self.recent = self.stored[from..].to_vec();
    }

    /// Drop the accepted-id history.
    pub fn clear_stored(&mut self) {
        self.stored.clear();
    }

    /// Accepted ids, ascending.
    pub fn stored(&self) -> &[i64] {
        &self.stored
    }

    /// Ids of the most recently closed connection still awaiting rejection.
    pub fn recent(&self) -> &[i64] {
        &self.recent
    }
}
