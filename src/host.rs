//! Collaborator seam for workspace and transcript operations.
//!
//! The engine and manager call these contracts; implementations live with
//! the host shell (filesystem, VCS, settings storage) and are out of scope
//! here.

use std::path::{Path, PathBuf};

use session_store::TranscriptEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustLevel {
    Trusted,
    Untrusted,
}

/// A browsable project root and its trust level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRoot {
    pub path: PathBuf,
    pub trust: TrustLevel,
}

/// Host-mediated operations the conversation manager depends on.
pub trait WorkspaceHost {
    /// Project roots available for browsing, with their trust level.
    fn project_roots(&self) -> Vec<ProjectRoot>;

    /// Whether the path is under version control.
    fn is_version_controlled(&self, path: &Path) -> bool;

    /// Sets a path's trust level.
    fn set_trust(&mut self, path: &Path, trust: TrustLevel) -> Result<(), String>;

    /// Deletes a persisted session transcript file.
    fn delete_transcript(&mut self, path: &Path) -> Result<(), String>;

    /// Reads a persisted session transcript for resume.
    fn read_transcript(&self, path: &Path) -> Result<Vec<TranscriptEntry>, String>;
}
