use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::{debug, warn};

/// Last-processed sequence id per database. Missing databases start at 0.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SequenceCursor {
    entries: HashMap<String, i64>,
}

impl SequenceCursor {
    pub fn get(&self, database: &str) -> i64 {
        self.entries.get(database).copied().unwrap_or(0)
    }

    /// Advance a database's cursor. Regressions are ignored: the cursor is
    /// non-decreasing for the lifetime of the store.
    pub fn advance_to(&mut self, database: &str, sequence: i64) {
        let entry = self.entries.entry(database.to_owned()).or_insert(0);
        if sequence < *entry {
            debug!(database, sequence, current = *entry, "ignoring cursor regression");
            return;
        }
        *entry = sequence;
    }

    pub fn forget(&mut self, database: &str) {
        self.entries.remove(database);
    }
}

/// Durable backing for the sequence cursor: one JSON object mapping database
/// name to sequence id.
pub struct SequenceStore {
    path: PathBuf,
}

impl SequenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the cursor. A missing file means nothing has been processed yet;
    /// an unreadable or unparsable file is logged and treated the same way,
    /// never as a fatal condition.
    pub fn load(&self) -> SequenceCursor {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return SequenceCursor::default()
            }
            Err(error) => {
                warn!(path = %self.path.display(), %error, "problem with sequence id file");
                return SequenceCursor::default();
            }
        };
        parse_cursor(&raw).unwrap_or_else(|| {
            warn!(path = %self.path.display(), "unparsable sequence id file, starting over");
            SequenceCursor::default()
        })
    }

    /// Best-effort overwrite of the backing file.
    pub fn save(&self, cursor: &SequenceCursor) -> io::Result<()> {
        let body = serde_json::to_string(&cursor.entries)?;
        fs::write(&self.path, body)
    }
}

fn parse_cursor(raw: &str) -> Option<SequenceCursor> {
    if let Ok(entries) = serde_json::from_str::<HashMap<String, i64>>(raw) {
        return Some(SequenceCursor { entries });
    }
    // The earliest deployments wrote one bare integer for a single implicit
    // database; keep reading those under the empty name.
    raw.trim().parse::<i64>().ok().map(|sequence| {
        let mut entries = HashMap::new();
        entries.insert(String::new(), sequence);
        SequenceCursor { entries }
    })
}
