//! Folds delta-bearing events into growing messages.
//!
//! Each turn carries two independent streams, the answer and the reasoning
//! summary, with separate message ids and buffers. Arrival order is
//! authoritative: deltas append verbatim, and an authoritative full-text
//! snapshot on the terminal event supersedes whatever was accumulated.

use crate::conversation::Conversation;
use crate::fault::EngineFault;
use crate::message::{Message, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Answer,
    Reasoning,
}

impl StreamKind {
    fn label(self) -> &'static str {
        match self {
            Self::Answer => "answer-stream",
            Self::Reasoning => "reasoning-stream",
        }
    }
}

/// Per-conversation aggregation state. Holds only transient stream ids; the
/// messages themselves live in the conversation.
#[derive(Debug, Default)]
pub struct StreamingAggregator {
    turn_seq: u64,
    answer_count: u64,
    reasoning_count: u64,
    answer_id: Option<String>,
    reasoning_id: Option<String>,
    answer_finalized: bool,
    turn_closed: bool,
}

impl StreamingAggregator {
    /// Starts a fresh turn: new stream ids, deltas accepted again.
    pub fn begin_turn(&mut self) {
        self.turn_seq += 1;
        self.answer_id = None;
        self.reasoning_id = None;
        self.answer_finalized = false;
        self.turn_closed = false;
    }

    /// Appends one delta to the stream's open message, opening it on the
    /// first delta. Deltas for a closed turn are dropped with a fault.
    pub fn append_delta(
        &mut self,
        kind: StreamKind,
        delta: &str,
        conversation: &mut Conversation,
    ) -> Option<EngineFault> {
        if self.turn_closed {
            return Some(EngineFault::StaleDelta {
                stream_id: format!("turn-{}-{}", self.turn_seq, kind.label()),
            });
        }

        let id = match self.open_id(kind) {
            Some(id) => id.to_owned(),
            None => self.open_stream(kind, conversation),
        };

        if let Some(message) = conversation.message_mut(&id) {
            message.content.push_str(delta);
        }

        None
    }

    /// Terminates the stream's open message. A `snapshot` replaces the
    /// accumulated content (the backend may send a corrected final value);
    /// without one the buffer freezes as-is. A snapshot with no open stream
    /// still yields a finalized message.
    pub fn finalize_stream(
        &mut self,
        kind: StreamKind,
        snapshot: Option<&str>,
        conversation: &mut Conversation,
    ) {
        match self.take_open_id(kind) {
            Some(id) => {
                if let Some(message) = conversation.message_mut(&id) {
                    if let Some(snapshot) = snapshot {
                        message.content = snapshot.to_owned();
                    }
                    message.freeze();
                }
                if kind == StreamKind::Answer {
                    self.answer_finalized = true;
                }
            }
            None => {
                // The final answer arrives twice in a normal turn: once on
                // `agent_message`, again on the turn terminator. Only the
                // first emits.
                if kind == StreamKind::Answer && self.answer_finalized {
                    return;
                }
                if let Some(snapshot) = snapshot {
                    if !self.turn_closed {
                        let id = self.open_stream(kind, conversation);
                        if let Some(message) = conversation.message_mut(&id) {
                            message.content = snapshot.to_owned();
                            message.freeze();
                        }
                        self.take_open_id(kind);
                        if kind == StreamKind::Answer {
                            self.answer_finalized = true;
                        }
                    }
                }
            }
        }
    }

    /// Closes the current reasoning message; the next reasoning delta opens
    /// a new one with a fresh id. The only path to multiple reasoning
    /// messages within one turn.
    pub fn section_break(&mut self, conversation: &mut Conversation) {
        self.finalize_stream(StreamKind::Reasoning, None, conversation);
    }

    /// Ends the turn: finalizes both streams (the answer with an optional
    /// snapshot) and drops any deltas that straggle in afterwards.
    pub fn end_turn(&mut self, final_answer: Option<&str>, conversation: &mut Conversation) {
        self.finalize_stream(StreamKind::Answer, final_answer, conversation);
        self.finalize_stream(StreamKind::Reasoning, None, conversation);
        self.turn_closed = true;
    }

    /// Freezes all open buffers exactly as they stand. Used on abort, stream
    /// error, and conversation teardown.
    pub fn freeze_all(&mut self, conversation: &mut Conversation) {
        self.end_turn(None, conversation);
    }

    #[must_use]
    pub fn turn_seq(&self) -> u64 {
        self.turn_seq
    }

    fn open_id(&self, kind: StreamKind) -> Option<&str> {
        match kind {
            StreamKind::Answer => self.answer_id.as_deref(),
            StreamKind::Reasoning => self.reasoning_id.as_deref(),
        }
    }

    fn take_open_id(&mut self, kind: StreamKind) -> Option<String> {
        match kind {
            StreamKind::Answer => self.answer_id.take(),
            StreamKind::Reasoning => self.reasoning_id.take(),
        }
    }

    fn open_stream(&mut self, kind: StreamKind, conversation: &mut Conversation) -> String {
        let count = match kind {
            StreamKind::Answer => {
                self.answer_count += 1;
                self.answer_count
            }
            StreamKind::Reasoning => {
                self.reasoning_count += 1;
                self.reasoning_count
            }
        };

        let id = format!("turn-{}-{}-{count}", self.turn_seq, kind.label());
        conversation.push_message(Message::streaming(&id, Role::Assistant));

        match kind {
            StreamKind::Answer => self.answer_id = Some(id.clone()),
            StreamKind::Reasoning => self.reasoning_id = Some(id.clone()),
        }

        id
    }
}

#[cfg(test)]
mod tests {
    use super::{StreamKind, StreamingAggregator};
    use crate::conversation::Conversation;
    use crate::fault::EngineFault;

    fn setup() -> (StreamingAggregator, Conversation) {
        let mut aggregator = StreamingAggregator::default();
        aggregator.begin_turn();
        (aggregator, Conversation::new("c1", "/work"))
    }

    #[test]
    fn deltas_accumulate_in_arrival_order() {
        let (mut aggregator, mut conversation) = setup();

        aggregator.append_delta(StreamKind::Answer, "Hel", &mut conversation);
        aggregator.append_delta(StreamKind::Answer, "lo", &mut conversation);

        assert_eq!(conversation.messages().len(), 1);
        let message = &conversation.messages()[0];
        assert_eq!(message.content, "Hello");
        assert!(message.is_streaming);
    }

    #[test]
    fn snapshot_supersedes_accumulated_deltas() {
        let (mut aggregator, mut conversation) = setup();

        aggregator.append_delta(StreamKind::Answer, "Hel", &mut conversation);
        aggregator.append_delta(StreamKind::Answer, "lo", &mut conversation);
        aggregator.finalize_stream(StreamKind::Answer, Some("Hello!"), &mut conversation);

        let message = &conversation.messages()[0];
        assert_eq!(message.content, "Hello!");
        assert!(!message.is_streaming);
    }

    #[test]
    fn missing_snapshot_freezes_the_buffer_as_is() {
        let (mut aggregator, mut conversation) = setup();

        aggregator.append_delta(StreamKind::Answer, "partial ", &mut conversation);
        aggregator.append_delta(StreamKind::Answer, "answer", &mut conversation);
        aggregator.freeze_all(&mut conversation);

        let message = &conversation.messages()[0];
        assert_eq!(message.content, "partial answer");
        assert!(!message.is_streaming);
    }

    #[test]
    fn snapshot_without_prior_deltas_still_emits_a_message() {
        let (mut aggregator, mut conversation) = setup();

        aggregator.finalize_stream(StreamKind::Answer, Some("one-shot"), &mut conversation);

        assert_eq!(conversation.messages().len(), 1);
        assert_eq!(conversation.messages()[0].content, "one-shot");
        assert!(!conversation.messages()[0].is_streaming);
    }

    #[test]
    fn answer_and_reasoning_streams_are_independent() {
        let (mut aggregator, mut conversation) = setup();

        aggregator.append_delta(StreamKind::Reasoning, "thinking", &mut conversation);
        aggregator.append_delta(StreamKind::Answer, "answering", &mut conversation);
        aggregator.append_delta(StreamKind::Reasoning, " more", &mut conversation);

        assert_eq!(conversation.messages().len(), 2);
        assert_eq!(conversation.messages()[0].content, "thinking more");
        assert_eq!(conversation.messages()[1].content, "answering");
        assert!(conversation.messages()[0].id.contains("reasoning-stream"));
    }

    #[test]
    fn section_break_opens_a_fresh_reasoning_id() {
        let (mut aggregator, mut conversation) = setup();

        aggregator.append_delta(StreamKind::Reasoning, "part one", &mut conversation);
        aggregator.section_break(&mut conversation);
        aggregator.append_delta(StreamKind::Reasoning, "part two", &mut conversation);

        assert_eq!(conversation.messages().len(), 2);
        assert_ne!(conversation.messages()[0].id, conversation.messages()[1].id);
        assert!(!conversation.messages()[0].is_streaming);
        assert!(conversation.messages()[1].is_streaming);
    }

    #[test]
    fn turn_end_snapshot_after_finalized_answer_is_not_duplicated() {
        let (mut aggregator, mut conversation) = setup();

        aggregator.append_delta(StreamKind::Answer, "Hel", &mut conversation);
        aggregator.append_delta(StreamKind::Answer, "lo", &mut conversation);
        aggregator.finalize_stream(StreamKind::Answer, Some("Hello!"), &mut conversation);
        aggregator.end_turn(Some("Hello!"), &mut conversation);

        assert_eq!(conversation.messages().len(), 1);
        assert_eq!(conversation.messages()[0].content, "Hello!");

        // The next turn's answer is unaffected.
        aggregator.begin_turn();
        aggregator.finalize_stream(StreamKind::Answer, Some("again"), &mut conversation);
        assert_eq!(conversation.messages().len(), 2);
        assert_eq!(conversation.messages()[1].content, "again");
    }

    #[test]
    fn late_deltas_after_turn_close_are_dropped() {
        let (mut aggregator, mut conversation) = setup();

        aggregator.append_delta(StreamKind::Answer, "done", &mut conversation);
        aggregator.end_turn(None, &mut conversation);

        let fault = aggregator
            .append_delta(StreamKind::Answer, "late", &mut conversation)
            .expect("late delta must fault");
        assert!(matches!(fault, EngineFault::StaleDelta { .. }));
        assert_eq!(conversation.messages()[0].content, "done");
        assert_eq!(conversation.messages().len(), 1);
    }

    #[test]
    fn next_turn_reopens_the_streams() {
        let (mut aggregator, mut conversation) = setup();

        aggregator.append_delta(StreamKind::Answer, "first", &mut conversation);
        aggregator.end_turn(None, &mut conversation);

        aggregator.begin_turn();
        assert!(aggregator
            .append_delta(StreamKind::Answer, "second", &mut conversation)
            .is_none());
        assert_eq!(conversation.messages().len(), 2);
    }
}
