use std::time::Duration;

use async_trait::async_trait;
use reqwest::header;
use thiserror::Error;
use url::Url;

use crate::messages::DocumentFields;

#[derive(Error, Debug)]
pub enum SolrError {
    #[error("solr request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("solr rejected the request with status {status}: {detail}")]
    Rejected {
        status: http::StatusCode,
        detail: String,
    },
    #[error("solr base url is invalid: {0}")]
    BadBaseUrl(#[from] url::ParseError),
}

/// The mutations the consumer issues against the search engine. The updater
/// and its tests depend on this seam rather than on a concrete client.
#[async_trait]
pub trait SearchBackend {
    /// Add (or replace) a batch of documents in one request, without a commit.
    async fn add_documents(&self, docs: &[DocumentFields]) -> Result<(), SolrError>;
    async fn delete_by_id(&self, id: &str) -> Result<(), SolrError>;
    async fn delete_by_query(&self, query: &str) -> Result<(), SolrError>;
    async fn commit(&self) -> Result<(), SolrError>;
}

#[async_trait]
impl<T: SearchBackend + Send + Sync> SearchBackend for std::sync::Arc<T> {
    async fn add_documents(&self, docs: &[DocumentFields]) -> Result<(), SolrError> {
        (**self).add_documents(docs).await
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), SolrError> {
        (**self).delete_by_id(id).await
    }

    async fn delete_by_query(&self, query: &str) -> Result<(), SolrError> {
        (**self).delete_by_query(query).await
    }

    async fn commit(&self) -> Result<(), SolrError> {
        (**self).commit().await
    }
}

#[derive(Clone)]
pub struct SolrClient {
    client: reqwest::Client,
    update_url: Url,
    select_url: Url,
}

impl SolrClient {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, SolrError> {
        let mut base = Url::parse(base)?;
        // Url::join replaces the last path segment unless the base ends in '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .user_agent("couchdb-solr-bridge")
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            update_url: base.join("update")?,
            select_url: base.join("select")?,
        })
    }

    async fn post_update(&self, body: String) -> Result<(), SolrError> {
        let response = self
            .client
            .post(self.update_url.clone())
            .header(header::CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = response.text().await.unwrap_or_default();
        Err(SolrError::Rejected { status, detail })
    }

    /// Run a `/select` query and return the engine's JSON response.
    pub async fn search(
        &self,
        params: &[(String, String)],
    ) -> Result<serde_json::Value, SolrError> {
        let response = self
            .client
            .post(self.select_url.clone())
            .form(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SolrError::Rejected { status, detail });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl SearchBackend for SolrClient {
    async fn add_documents(&self, docs: &[DocumentFields]) -> Result<(), SolrError> {
        self.post_update(add_request(docs)).await
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), SolrError> {
        self.post_update(delete_id_request(id)).await
    }

    async fn delete_by_query(&self, query: &str) -> Result<(), SolrError> {
        self.post_update(delete_query_request(query)).await
    }

    async fn commit(&self) -> Result<(), SolrError> {
        self.post_update(commit_request().to_string()).await
    }
}

/// `<add>` body with one `<doc>` per document, keys and values escaped for
/// the engine's XML update format.
pub fn add_request(docs: &[DocumentFields]) -> String {
    let mut xml = String::from("<add>");
    for doc in docs {
        xml.push_str("<doc>");
        for field in doc {
            xml.push_str("<field name=\"");
            xml.push_str(&escape_attr(&field.path));
            xml.push_str("\">");
            xml.push_str(&escape_text(&field.value.to_string()));
            xml.push_str("</field>");
        }
        xml.push_str("</doc>");
    }
    xml.push_str("</add>");
    xml
}

pub fn delete_id_request(id: &str) -> String {
    format!("<delete><id>{}</id></delete>", escape_text(id))
}

pub fn delete_query_request(query: &str) -> String {
    format!("<delete><query>{}</query></delete>", escape_text(query))
}

pub fn commit_request() -> &'static str {
    "<commit/>"
}

fn escape_text(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

// Field names additionally land in an XML attribute, so quotes must go too.
fn escape_attr(raw: &str) -> String {
    escape_text(raw).replace('"', "&quot;")
}
