//! Bounded accumulator of recent conversation turns.

use crate::model::Turn;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::fmt::Write as _;

const TRANSCRIPT_HEADER: &str = "Conversation log:\n\n";

/// Capacity limits for a [`ConversationBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLimits {
    pub max_messages: usize,
    pub max_size_bytes: usize,
}

impl Default for BufferLimits {
    fn default() -> Self {
        Self {
            max_messages: 20,
            max_size_bytes: 10 * 1024,
        }
    }
}

/// Oldest-first buffer that evicts from the front to stay within its limits.
///
/// After every [`add`](Self::add), `len() <= max_messages` and
/// `size_bytes() <= max_size_bytes`.
#[derive(Debug, Clone)]
pub struct ConversationBuffer {
    limits: BufferLimits,
    turns: VecDeque<Turn>,
    size_bytes: usize,
}

impl Default for ConversationBuffer {
    fn default() -> Self {
        Self::new(BufferLimits::default())
    }
}

impl ConversationBuffer {
    pub fn new(limits: BufferLimits) -> Self {
        Self {
            limits,
            turns: VecDeque::with_capacity(limits.max_messages),
            size_bytes: 0,
        }
    }

    /// Append a turn, evicting the oldest turns until both limits hold.
    ///
    /// Returns the number of evicted turns. A single turn larger than
    /// `max_size_bytes` evicts everything, itself included.
    pub fn add(&mut self, turn: Turn) -> usize {
        self.size_bytes += turn.estimated_bytes();
        debug!(
            "buffered turn (role={}, content_len={}, size={}/{})",
            turn.role(),
            turn.content().len(),
            self.size_bytes,
            self.limits.max_size_bytes
        );
        self.turns.push_back(turn);

        let mut evicted = 0;
        while self.turns.len() > self.limits.max_messages
            || self.size_bytes > self.limits.max_size_bytes
        {
            let Some(oldest) = self.turns.pop_front() else {
                break;
            };
            self.size_bytes = self.size_bytes.saturating_sub(oldest.estimated_bytes());
            evicted += 1;
        }
        if evicted > 0 {
            warn!(
                "buffer trimmed (evicted={}, messages={}, bytes={})",
                evicted,
                self.turns.len(),
                self.size_bytes
            );
        }
        evicted
    }

    /// Render all turns as a transcript, or an empty string when empty.
    pub fn render(&self) -> String {
        if self.turns.is_empty() {
            return String::new();
        }
        render_turns(TRANSCRIPT_HEADER, self.turns.iter())
    }

    /// Render the trailing `n` turns; `n` is clamped to the buffer length.
    pub fn render_last_n(&self, n: usize) -> String {
        if self.turns.is_empty() {
            return String::new();
        }
        let n = n.min(self.turns.len());
        let header = format!("Last {n} turns:\n\n");
        render_turns(&header, self.turns.iter().skip(self.turns.len() - n))
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.size_bytes = 0;
        info!("conversation buffer cleared");
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Running byte estimate of the buffered turns.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Buffered turns, oldest first.
    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }
}

fn render_turns<'a>(header: &str, turns: impl Iterator<Item = &'a Turn>) -> String {
    let mut out = String::from(header);
    for turn in turns {
        let _ = writeln!(out, "{}: {}", turn.role().label(), turn.content());
    }
    out
}
