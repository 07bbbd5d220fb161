//! Turning serialized bodies into sequenced [`Message`]s.

use std::sync::{Arc, Mutex, PoisonError};

use crate::message::{Message, MessageId, is_content_related};
use crate::msg_id::{MsgIdGenerator, ServerClock};

/// Allocates `seq_no`s.
///
/// `seq_no = content_counter * 2 + 1` for content-related messages, which
/// then bump the counter; other messages get `content_counter * 2`.
#[derive(Debug, Default)]
pub struct SeqNoAllocator {
    content_counter: Mutex<i32>,
}

impl SeqNoAllocator {
    /// A fresh allocator at counter zero.
    pub fn new() -> Self { Self::default() }

    /// Allocate the next sequence number.
    pub fn next_seq_no(&self, content_related: bool) -> i32 {
        let mut counter = self.content_counter.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = *counter * 2 + i32::from(content_related);
        if content_related {
            *counter += 1;
        }
        seq
    }
}

/// Creates outbound messages for one session.
///
/// Both counters live as long as the factory, which lives as long as the
/// session: they survive reconnects.
#[derive(Debug)]
pub struct MsgFactory {
    ids: MsgIdGenerator,
    seq: SeqNoAllocator,
}

impl MsgFactory {
    /// A factory reading server time from `clock`.
    pub fn new(clock: Arc<ServerClock>) -> Self {
        Self { ids: MsgIdGenerator::new(clock), seq: SeqNoAllocator::new() }
    }

    /// Wrap `body` into a message with a fresh id and sequence number.
    pub fn create(&self, body: Vec<u8>) -> Message {
        let msg_id = MessageId(self.ids.next_id());
        let seq_no = self.seq.next_seq_no(is_content_related(&body));
        Message { msg_id, seq_no, body }
    }

    /// Allocate an id without creating a message (ping ids, admission checks).
    pub fn next_msg_id(&self) -> i64 {
        self.ids.next_id()
    }

    /// The shared server clock.
    pub fn clock(&self) -> &Arc<ServerClock> {
        self.ids.clock()
    }
}
