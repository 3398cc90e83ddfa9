use std::path::{Path, PathBuf};

pub const SESSION_DIR: [&str; 2] = [".agent", "sessions"];

#[must_use]
pub fn session_root(cwd: &Path) -> PathBuf {
    cwd.join(SESSION_DIR[0]).join(SESSION_DIR[1])
}

#[must_use]
pub fn sanitize_timestamp_for_filename(timestamp: &str) -> String {
    timestamp
        .chars()
        .map(|c| match c {
            ':' | '/' | '\\' | ' ' => '-',
            _ => c,
        })
        .collect()
}

#[must_use]
pub fn transcript_file_name(created_at: &str, session_id: &str) -> String {
    format!(
        "{}_{}.jsonl",
        sanitize_timestamp_for_filename(created_at),
        session_id
    )
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{sanitize_timestamp_for_filename, session_root, transcript_file_name};

    #[test]
    fn session_root_nests_under_agent_dir() {
        let root = session_root(Path::new("/work/project"));
        assert_eq!(root, Path::new("/work/project/.agent/sessions"));
    }

    #[test]
    fn timestamps_become_filesystem_safe() {
        assert_eq!(
            sanitize_timestamp_for_filename("2026-08-30T10:15:00Z"),
            "2026-08-30T10-15-00Z"
        );
    }

    #[test]
    fn transcript_file_name_joins_timestamp_and_session() {
        assert_eq!(
            transcript_file_name("2026-08-30T10:15:00Z", "sess-1"),
            "2026-08-30T10-15-00Z_sess-1.jsonl"
        );
    }
}
