use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use bridge_common::messages::UpdateMessage;
use bridge_common::sink::{PublishError, UpdateSink};

use crate::couch::{ChangeRow, ChangeSource, Document};
use crate::error::SourceError;

/// Unique scratch path per test; tests clean up after themselves.
pub fn temp_file(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("bridge-test-{}-{tag}", std::process::id()))
}

/// Scripted change source backed by in-memory rows and documents.
#[derive(Default)]
pub struct MemorySource {
    pub rows: Vec<ChangeRow>,
    pub docs: HashMap<String, Document>,
    pub fail_changes: bool,
}

impl MemorySource {
    pub fn with_rows(rows: Vec<ChangeRow>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    pub fn put_doc(&mut self, doc_id: &str, doc: Value) {
        let doc = doc.as_object().cloned().expect("document literal");
        self.docs.insert(doc_id.to_owned(), doc);
    }
}

#[async_trait]
impl ChangeSource for MemorySource {
    async fn query_changes(
        &self,
        _database: &str,
        start_after: i64,
        limit: usize,
    ) -> Result<Vec<ChangeRow>, SourceError> {
        if self.fail_changes {
            return Err(SourceError::Unavailable("scripted failure".to_owned()));
        }
        Ok(self
            .rows
            .iter()
            .filter(|row| row.sequence_key > start_after)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_document(
        &self,
        _database: &str,
        doc_id: &str,
    ) -> Result<Option<Document>, SourceError> {
        Ok(self.docs.get(doc_id).cloned())
    }
}

/// Sink that records published messages, or fails every publish.
#[derive(Default)]
pub struct MemorySink {
    pub messages: Mutex<Vec<UpdateMessage>>,
    fail: bool,
}

impl MemorySink {
    pub fn failing() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            fail: true,
        }
    }
}

#[async_trait]
impl UpdateSink for MemorySink {
    async fn publish(&self, message: &UpdateMessage) -> Result<(), PublishError> {
        if self.fail {
            return Err(PublishError::Cancelled);
        }
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }
}
