//! Append-only JSONL transcript persistence for agent conversations.
//!
//! One file per backend session: a validated header line followed by
//! parent-chained entry records. Supports create, append, full-validation
//! open, leaf replay for resume, listing, and deletion.

mod error;
mod paths;
mod replay;
mod schema;
mod store;

pub use error::TranscriptError;
pub use paths::{session_root, transcript_file_name};
pub use schema::{
    EntryRecordType, SessionRecordType, TranscriptEntry, TranscriptEntryKind, TranscriptHeader,
};
pub use store::{delete_transcript, list_transcripts, TranscriptStore};
