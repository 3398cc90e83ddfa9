use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::TranscriptError;
use crate::paths::{session_root, transcript_file_name};
use crate::schema::{JsonLine, TranscriptEntry, TranscriptEntryKind, TranscriptHeader};

#[derive(Debug)]
pub struct TranscriptStore {
    pub(crate) path: PathBuf,
    pub(crate) file: File,
    pub(crate) header: TranscriptHeader,
    pub(crate) entries: Vec<TranscriptEntry>,
    pub(crate) index_by_id: HashMap<String, usize>,
    pub(crate) current_leaf_id: Option<String>,
}

impl TranscriptStore {
    /// Creates a fresh transcript file under `<cwd>/.agent/sessions/` with a
    /// v1 header and no entries.
    pub fn create_new(cwd: &Path) -> Result<Self, TranscriptError> {
        if !cwd.is_absolute() {
            return Err(TranscriptError::NonAbsoluteCreateCwd {
                path: cwd.to_path_buf(),
            });
        }

        let session_id = Uuid::new_v4().to_string();
        let created_at = now_rfc3339()?;
        let root = session_root(cwd);
        fs::create_dir_all(&root)
            .map_err(|source| TranscriptError::io("creating session directory", &root, source))?;

        let path = root.join(transcript_file_name(&created_at, &session_id));
        let header = TranscriptHeader::v1(session_id, created_at, cwd.display().to_string());

        let mut file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)
            .map_err(|source| TranscriptError::io("creating transcript file", &path, source))?;
        write_json_line(&mut file, &path, &header)?;

        Ok(Self {
            path,
            file,
            header,
            entries: Vec::new(),
            index_by_id: HashMap::new(),
            current_leaf_id: None,
        })
    }

    /// Opens and fully validates an existing transcript file.
    pub fn open(path: &Path) -> Result<Self, TranscriptError> {
        let path = path.to_path_buf();
        let read_file = File::open(&path)
            .map_err(|source| TranscriptError::io("opening transcript file", &path, source))?;
        let reader = BufReader::new(read_file);

        let mut header: Option<TranscriptHeader> = None;
        let mut entries_with_lines: Vec<(usize, TranscriptEntry)> = Vec::new();
        let mut index_by_id = HashMap::new();

        for (line_index, line_result) in reader.lines().enumerate() {
            let line_number = line_index + 1;
            let line = line_result
                .map_err(|source| TranscriptError::io_line(&path, line_number, source))?;
            let parsed = parse_json_line(&path, line_number, &line)?;

            if line_number == 1 {
                match parsed {
                    JsonLine::Session(parsed_header) => {
                        validate_header_line(&path, line_number, &parsed_header)?;
                        header = Some(parsed_header);
                    }
                    JsonLine::Entry(_) => {
                        return Err(TranscriptError::InvalidHeaderRecord {
                            path,
                            line: line_number,
                        });
                    }
                }

                continue;
            }

            match parsed {
                JsonLine::Session(_) => {
                    return Err(TranscriptError::InvalidEntryRecord {
                        path,
                        line: line_number,
                    });
                }
                JsonLine::Entry(entry) => {
                    validate_entry_line(&path, line_number, &entry)?;
                    if index_by_id.contains_key(&entry.id) {
                        return Err(TranscriptError::DuplicateEntryId {
                            path,
                            line: line_number,
                            id: entry.id,
                        });
                    }

                    let next_index = entries_with_lines.len();
                    index_by_id.insert(entry.id.clone(), next_index);
                    entries_with_lines.push((line_number, entry));
                }
            }
        }

        let header =
            header.ok_or_else(|| TranscriptError::MissingHeader { path: path.clone() })?;
        validate_entry_graph(&path, &entries_with_lines, &index_by_id)?;

        let entries = entries_with_lines
            .into_iter()
            .map(|(_, entry)| entry)
            .collect::<Vec<_>>();
        let current_leaf_id = entries.last().map(|entry| entry.id.clone());

        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|source| {
                TranscriptError::io("opening transcript file for append", &path, source)
            })?;

        Ok(Self {
            path,
            file,
            header,
            entries,
            index_by_id,
            current_leaf_id,
        })
    }

    /// Appends one entry chained to the current leaf, assigning a fresh id
    /// and timestamp, and advances the leaf to it.
    pub fn append(&mut self, kind: TranscriptEntryKind) -> Result<TranscriptEntry, TranscriptError> {
        let entry = TranscriptEntry::new(
            Uuid::new_v4().to_string(),
            self.current_leaf_id.as_deref(),
            now_rfc3339()?,
            kind,
        );
        self.append_entry(entry.clone())?;
        Ok(entry)
    }

    /// Appends a caller-constructed entry, keeping the in-memory index and
    /// leaf consistent with the file. The entry must pass the same id and
    /// parent checks `open` applies; nothing is written otherwise.
    pub fn append_entry(&mut self, entry: TranscriptEntry) -> Result<(), TranscriptError> {
        let line = self.entries.len() + 2;
        if self.index_by_id.contains_key(&entry.id) {
            return Err(TranscriptError::DuplicateEntryId {
                path: self.path.clone(),
                line,
                id: entry.id,
            });
        }
        if let Some(parent_id) = &entry.parent_id {
            if !self.index_by_id.contains_key(parent_id) {
                return Err(TranscriptError::DanglingParentId {
                    path: self.path.clone(),
                    line,
                    entry_id: entry.id.clone(),
                    parent_id: parent_id.clone(),
                });
            }
        }

        write_json_line(&mut self.file, &self.path, &entry)?;

        let next_index = self.entries.len();
        self.index_by_id.insert(entry.id.clone(), next_index);
        self.current_leaf_id = Some(entry.id.clone());
        self.entries.push(entry);
        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn header(&self) -> &TranscriptHeader {
        &self.header
    }

    #[must_use]
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    #[must_use]
    pub fn current_leaf_id(&self) -> Option<&str> {
        self.current_leaf_id.as_deref()
    }

    #[must_use]
    pub fn contains_entry(&self, id: &str) -> bool {
        self.index_by_id.contains_key(id)
    }
}

/// Lists transcript files under a session root, newest modification first.
/// A missing root is an empty listing, not an error.
pub fn list_transcripts(root: &Path) -> Result<Vec<PathBuf>, TranscriptError> {
    let read_dir = match fs::read_dir(root) {
        Ok(read_dir) => read_dir,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(TranscriptError::io("listing session directory", root, source)),
    };

    let mut found: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
    for dir_entry in read_dir {
        let dir_entry = dir_entry
            .map_err(|source| TranscriptError::io("listing session directory", root, source))?;
        let path = dir_entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("jsonl") {
            continue;
        }

        let modified = dir_entry
            .metadata()
            .and_then(|metadata| metadata.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        found.push((modified, path));
    }

    found.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

/// Removes a persisted transcript file.
pub fn delete_transcript(path: &Path) -> Result<(), TranscriptError> {
    fs::remove_file(path)
        .map_err(|source| TranscriptError::io("deleting transcript file", path, source))
}

pub(crate) fn now_rfc3339() -> Result<String, TranscriptError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(TranscriptError::ClockFormat)
}

fn write_json_line<T: serde::Serialize>(
    file: &mut File,
    path: &Path,
    record: &T,
) -> Result<(), TranscriptError> {
    let line = serde_json::to_string(record)
        .map_err(|source| TranscriptError::json_serialize(path, source))?;
    writeln!(file, "{line}")
        .map_err(|source| TranscriptError::io("appending transcript line", path, source))
}

pub(crate) fn parse_json_line(
    path: &Path,
    line_number: usize,
    line: &str,
) -> Result<JsonLine, TranscriptError> {
    serde_json::from_str::<JsonLine>(line)
        .map_err(|source| TranscriptError::json_line(path, line_number, source))
}

pub(crate) fn validate_header_line(
    path: &Path,
    line_number: usize,
    header: &TranscriptHeader,
) -> Result<(), TranscriptError> {
    if header.version != 1 {
        return Err(TranscriptError::UnsupportedVersion {
            path: path.to_path_buf(),
            line: line_number,
            found: header.version,
        });
    }

    validate_rfc3339(path, line_number, "created_at", &header.created_at)?;

    if !Path::new(&header.cwd).is_absolute() {
        return Err(TranscriptError::NonAbsoluteCwd {
            path: path.to_path_buf(),
            line: line_number,
            cwd: header.cwd.clone(),
        });
    }

    Ok(())
}

pub(crate) fn validate_entry_line(
    path: &Path,
    line_number: usize,
    entry: &TranscriptEntry,
) -> Result<(), TranscriptError> {
    validate_rfc3339(path, line_number, "ts", &entry.ts)
}

pub(crate) fn validate_entry_graph(
    path: &Path,
    entries_with_lines: &[(usize, TranscriptEntry)],
    index_by_id: &HashMap<String, usize>,
) -> Result<(), TranscriptError> {
    for (line_number, entry) in entries_with_lines {
        if let Some(parent_id) = &entry.parent_id {
            if !index_by_id.contains_key(parent_id) {
                return Err(TranscriptError::DanglingParentId {
                    path: path.to_path_buf(),
                    line: *line_number,
                    entry_id: entry.id.clone(),
                    parent_id: parent_id.clone(),
                });
            }
        }
    }

    Ok(())
}

pub(crate) fn validate_rfc3339(
    path: &Path,
    line_number: usize,
    field: &'static str,
    value: &str,
) -> Result<(), TranscriptError> {
    if OffsetDateTime::parse(value, &Rfc3339).is_err() {
        return Err(TranscriptError::InvalidTimestamp {
            path: path.to_path_buf(),
            line: line_number,
            field,
            value: value.to_string(),
        });
    }

    Ok(())
}
