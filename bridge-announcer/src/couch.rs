use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error};
use url::Url;

use crate::error::SourceError;

/// A document as stored in the source database.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// One row of a database's change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRow {
    pub doc_id: String,
    pub sequence_key: i64,
    pub deleted: bool,
}

/// Narrow view of the source database the announcer depends on.
#[async_trait]
pub trait ChangeSource {
    /// Changed rows with sequence keys strictly greater than `start_after`,
    /// oldest first, at most `limit` of them.
    async fn query_changes(
        &self,
        database: &str,
        start_after: i64,
        limit: usize,
    ) -> Result<Vec<ChangeRow>, SourceError>;

    /// Fetch a document by id; `None` when it does not exist.
    async fn get_document(
        &self,
        database: &str,
        doc_id: &str,
    ) -> Result<Option<Document>, SourceError>;
}

#[derive(Clone)]
pub struct CouchClient {
    client: reqwest::Client,
    base: Url,
}

#[derive(Deserialize)]
struct ChangesPage {
    results: Vec<ChangeEntry>,
}

#[derive(Deserialize)]
struct ChangeEntry {
    seq: i64,
    id: String,
    #[serde(default)]
    deleted: bool,
}

impl CouchClient {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, SourceError> {
        let mut base = Url::parse(base)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .user_agent("couchdb-solr-bridge")
            .timeout(timeout)
            .build()?;

        Ok(Self { client, base })
    }

    fn database_url(&self, database: &str) -> Result<Url, SourceError> {
        Ok(self.base.join(&format!("{database}/"))?)
    }
}

#[async_trait]
impl ChangeSource for CouchClient {
    async fn query_changes(
        &self,
        database: &str,
        start_after: i64,
        limit: usize,
    ) -> Result<Vec<ChangeRow>, SourceError> {
        // `since` is exclusive: the feed yields rows strictly after it.
        let url = self.database_url(database)?.join("_changes")?;
        let response = self
            .client
            .get(url)
            .query(&[
                ("since", start_after.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SourceError::Unavailable(format!(
                "change feed for '{database}' returned {}",
                response.status()
            )));
        }

        let page: ChangesPage = response.json().await?;
        Ok(page
            .results
            .into_iter()
            .map(|entry| ChangeRow {
                doc_id: entry.id,
                sequence_key: entry.seq,
                deleted: entry.deleted,
            })
            .collect())
    }

    async fn get_document(
        &self,
        database: &str,
        doc_id: &str,
    ) -> Result<Option<Document>, SourceError> {
        let url = self.database_url(database)?.join(doc_id)?;
        let response = self.client.get(url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        Ok(Some(response.json().await?))
    }
}

/// Batched iteration over a database's pending changes.
pub struct ChangeFeed<'a, S> {
    source: &'a S,
    database: &'a str,
    seq: i64,
    batch_size: usize,
    done: bool,
}

/// One drained batch and the sequence key to resume after.
#[derive(Debug)]
pub struct ChangeBatch {
    pub rows: Vec<ChangeRow>,
    pub new_sequence: i64,
}

impl<'a, S: ChangeSource> ChangeFeed<'a, S> {
    pub fn new(source: &'a S, database: &'a str, start_after: i64, batch_size: usize) -> Self {
        Self {
            source,
            database,
            seq: start_after,
            batch_size,
            done: false,
        }
    }

    /// Next non-empty batch, or `None` once the backlog is drained.
    ///
    /// A transport failure ends the feed early; the caller picks the
    /// database up again on a later notification.
    pub async fn next_batch(&mut self) -> Option<ChangeBatch> {
        if self.done {
            return None;
        }

        debug!(database = self.database, sequence = self.seq, "querying change feed");
        let rows = match self
            .source
            .query_changes(self.database, self.seq, self.batch_size)
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                error!(database = self.database, error = %err, "problem connecting to database");
                self.done = true;
                return None;
            }
        };

        let new_sequence = match rows.last() {
            Some(last) => last.sequence_key,
            None => {
                self.done = true;
                return None;
            }
        };
        self.seq = new_sequence;
        Some(ChangeBatch { rows, new_sequence })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemorySource;

    fn row(doc_id: &str, sequence_key: i64, deleted: bool) -> ChangeRow {
        ChangeRow {
            doc_id: doc_id.to_owned(),
            sequence_key,
            deleted,
        }
    }

    #[tokio::test]
    async fn drains_in_capped_batches_without_redelivery() {
        let source = MemorySource::with_rows(vec![
            row("a", 1, false),
            row("b", 2, true),
            row("c", 3, false),
            row("d", 4, false),
            row("e", 5, false),
        ]);
        let mut feed = ChangeFeed::new(&source, "mydb", 0, 2);

        let mut seen = Vec::new();
        let mut sequences = Vec::new();
        while let Some(batch) = feed.next_batch().await {
            assert!(batch.rows.len() <= 2);
            sequences.push(batch.new_sequence);
            seen.extend(batch.rows.into_iter().map(|r| r.doc_id));
        }

        // Every row exactly once: the boundary row of a batch is not
        // re-delivered at the start of the next one.
        assert_eq!(seen, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(sequences, vec![2, 4, 5]);
    }

    #[tokio::test]
    async fn resuming_after_the_last_sequence_yields_nothing() {
        let source = MemorySource::with_rows(vec![row("a", 1, false), row("b", 2, false)]);

        let mut feed = ChangeFeed::new(&source, "mydb", 2, 100);
        assert!(feed.next_batch().await.is_none());
    }

    #[tokio::test]
    async fn transport_failure_ends_the_feed() {
        let mut source = MemorySource::with_rows(vec![row("a", 1, false)]);
        source.fail_changes = true;

        let mut feed = ChangeFeed::new(&source, "mydb", 0, 100);
        assert!(feed.next_batch().await.is_none());
        assert!(feed.next_batch().await.is_none());
    }
}
