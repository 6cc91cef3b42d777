use serde_json::Value;
use tracing::{debug, info, warn};

use bridge_common::messages::{DocumentFields, IndexableField, UpdateMessage};
use bridge_common::sink::UpdateSink;

use crate::couch::{ChangeFeed, ChangeSource};
use crate::error::AnnounceError;
use crate::normalize::normalize;
use crate::seqstore::SequenceStore;

/// Document attribute naming its type.
const TYPE_ATTR: &str = "type";
/// Document attribute listing which of its fields to index.
const FIELDS_ATTR: &str = "solr_fields";

/// Watches a database's change backlog and announces it on the bus.
pub struct UpdateAnnouncer<S, K> {
    source: S,
    sink: K,
    store: SequenceStore,
    batch_size: usize,
}

impl<S: ChangeSource, K: UpdateSink> UpdateAnnouncer<S, K> {
    pub fn new(source: S, sink: K, store: SequenceStore, batch_size: usize) -> Self {
        Self {
            source,
            sink,
            store,
            batch_size,
        }
    }

    /// Drain a database's pending changes onto the bus.
    ///
    /// Deletions and updates are announced per batch; the sequence cursor is
    /// persisted once, after the whole backlog drained. An error anywhere
    /// leaves the persisted cursor untouched, so the next notification
    /// re-drains from the last durable point and re-applies are harmless.
    pub async fn update_index(&self, database: &str) -> Result<(), AnnounceError> {
        let mut cursor = self.store.load();
        let mut feed = ChangeFeed::new(&self.source, database, cursor.get(database), self.batch_size);

        while let Some(batch) = feed.next_batch().await {
            debug!(database, rows = batch.rows.len(), "processing updates");

            let (deleted, candidates): (Vec<_>, Vec<_>) =
                batch.rows.into_iter().partition(|row| row.deleted);

            if !deleted.is_empty() {
                let ids = deleted.into_iter().map(|row| row.doc_id).collect();
                self.sink.publish(&UpdateMessage::Deleted(ids)).await?;
                metrics::counter!("announcer_messages_published_total", "kind" => "deleted")
                    .increment(1);
            }

            let mut updates = Vec::new();
            for row in candidates {
                if let Some(mut fields) = self.index_doc(database, &row.doc_id).await? {
                    fields.push(IndexableField::new("_db", database));
                    updates.push(fields);
                }
            }

            if updates.is_empty() {
                info!(database, "no updates to announce");
            } else {
                metrics::counter!("announcer_documents_indexed_total")
                    .increment(updates.len() as u64);
                self.sink.publish(&UpdateMessage::Updated(updates)).await?;
                metrics::counter!("announcer_messages_published_total", "kind" => "updated")
                    .increment(1);
            }

            cursor.advance_to(database, batch.new_sequence);
        }

        self.store.save(&cursor)?;
        Ok(())
    }

    /// Announce a whole-database deletion and drop its cursor entry.
    pub async fn delete_database(&self, database: &str) -> Result<(), AnnounceError> {
        let mut cursor = self.store.load();
        cursor.forget(database);
        self.store.save(&cursor)?;

        self.sink
            .publish(&UpdateMessage::DeletedDb(database.to_owned()))
            .await?;
        metrics::counter!("announcer_messages_published_total", "kind" => "deleted_db")
            .increment(1);
        Ok(())
    }

    /// Collect the indexable fields of one document: its declared fields
    /// flattened, plus the synthetic `type` and `_id` entries.
    ///
    /// Returns `None` for documents that should not be indexed; only a
    /// transport failure is an error.
    async fn index_doc(
        &self,
        database: &str,
        doc_id: &str,
    ) -> Result<Option<DocumentFields>, AnnounceError> {
        let Some(doc) = self.source.get_document(database, doc_id).await? else {
            warn!(database, doc_id, "attempt to index nonexistent document");
            return Ok(None);
        };

        let declared = match doc.get(FIELDS_ATTR).and_then(Value::as_array) {
            Some(declared) if !declared.is_empty() => declared,
            _ => {
                debug!(database, doc_id, "document does not define solr_fields");
                return Ok(None);
            }
        };

        let Some(doctype) = doc.get(TYPE_ATTR).and_then(Value::as_str) else {
            warn!(database, doc_id, "document has no usable type attribute");
            return Ok(None);
        };

        let mut fields = Vec::new();
        for name in declared {
            let Some(name) = name.as_str() else {
                warn!(database, doc_id, "ignoring non-string solr_fields entry");
                continue;
            };
            if let Some(value) = doc.get(name) {
                fields.extend(normalize(name, value));
            }
        }
        fields.push(IndexableField::new(TYPE_ATTR, doctype));
        fields.push(IndexableField::new("_id", doc_id));
        Ok(Some(fields))
    }
}
