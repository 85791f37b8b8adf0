use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use rand::Rng;
use reqwest::{Client, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value, from_value};
use tokio::{sync::broadcast, time::sleep};
use tracing::{debug, info, warn};

use crate::dao::{
    storage::StorageResult,
    store::{KvStore, StoreChange, tree},
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, ChangesResponse, CouchTreeDocument, DocLocation, END_SUFFIX, doc_path,
        locate, seq_param,
    },
};

const MAX_CONFLICT_ATTEMPTS: u32 = 16;
const CONFLICT_BASE_DELAY: Duration = Duration::from_millis(10);
const CONFLICT_MAX_DELAY: Duration = Duration::from_millis(1_000);
const CHANGE_CAPACITY: usize = 256;
const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);

/// [`KvStore`] persisting one CouchDB document per `{root}/{phase}` subtree.
///
/// Writes are read-modify-write cycles on the owning document, retried after a
/// jittered exponential wait on revision conflicts. Batches touching several
/// documents are applied one document at a time and may be left partially
/// applied on failure.
#[derive(Clone)]
pub struct CouchKvStore {
    inner: Arc<CouchInner>,
}

struct CouchInner {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
    changes: broadcast::Sender<StoreChange>,
    changes_timeout: Duration,
}

impl CouchKvStore {
    /// Establish a connection to CouchDB, ensure the database exists and start
    /// following its `_changes` feed.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));
        let (changes, _rx) = broadcast::channel(CHANGE_CAPACITY);

        let inner = Arc::new(CouchInner {
            client,
            base_url,
            database,
            auth,
            changes,
            changes_timeout: config.changes_timeout,
        });

        inner.ensure_database().await?;
        tokio::spawn(follow_changes(Arc::downgrade(&inner)));
        info!(database = %inner.database, "CouchDB store ready");

        Ok(Self { inner })
    }
}

impl CouchInner {
    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, self.database, path);
        let builder = self.client.request(method, url);
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = self.database_url();
        let mut builder = self.client.get(&url);
        if let Some((ref user, ref pass)) = self.auth {
            builder = builder.basic_auth(user.as_ref(), Some(pass.as_ref()));
        }

        let response = builder
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let mut builder = self.client.put(&url);
                if let Some((ref user, ref pass)) = self.auth {
                    builder = builder.basic_auth(user.as_ref(), Some(pass.as_ref()));
                }
                let create =
                    builder
                        .send()
                        .await
                        .map_err(|source| CouchDaoError::DatabaseCreate {
                            database: database.clone(),
                            source,
                        })?;
                if create.status().is_success() {
                    info!(database, "created CouchDB database");
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_string(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    /// PUT a document; `Ok(false)` signals a revision conflict.
    async fn put_document<T>(&self, doc_id: &str, document: &T) -> CouchResult<bool>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::CONFLICT => Ok(false),
            status if status.is_success() => Ok(true),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn list_documents<T>(&self, prefix: &str) -> CouchResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        const ALL_DOCS: &str = "_all_docs";
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", format!("\"{}\"", prefix)),
            ("endkey", format!("\"{}{}\"", prefix, END_SUFFIX)),
        ];

        let response = self
            .request(Method::GET, ALL_DOCS)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: ALL_DOCS.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_string(),
                status: response.status(),
            });
        }

        let payload = response.json::<AllDocsResponse>().await.map_err(|source| {
            CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_string(),
                source,
            }
        })?;

        let mut documents = Vec::new();
        for row in payload.rows {
            if row.id.starts_with('_') {
                continue;
            }
            if let Some(doc) = row.doc {
                let parsed = from_value(doc).map_err(|source| CouchDaoError::DeserializeValue {
                    path: row.id.clone(),
                    source,
                })?;
                documents.push(parsed);
            }
        }

        Ok(documents)
    }

    async fn read_path(&self, path: &str) -> CouchResult<Option<Value>> {
        match locate(path) {
            DocLocation::Document { doc_id, inner } => {
                let Some(doc) = self.get_document::<CouchTreeDocument>(&doc_id).await? else {
                    return Ok(None);
                };
                Ok(tree::get(&doc.value, &inner).cloned())
            }
            DocLocation::Prefix { prefix } => {
                let docs = self.list_documents::<CouchTreeDocument>(&prefix).await?;
                let mut root = Value::Object(Map::new());
                for doc in docs {
                    if let Some(doc_path) = doc_path(&doc.id) {
                        tree::set(&mut root, &tree::segments(&doc_path), doc.value);
                    }
                }
                Ok(tree::get(&root, &tree::segments(path)).cloned())
            }
        }
    }

    /// Apply `writes` (paths relative to the document tree) to one document.
    async fn write_document(&self, doc_id: &str, writes: &[(Vec<String>, Value)]) -> CouchResult<()> {
        for attempt in 1..=MAX_CONFLICT_ATTEMPTS {
            let existing = self.get_document::<CouchTreeDocument>(doc_id).await?;
            let (rev, mut value) = match existing {
                Some(doc) => (doc.rev, doc.value),
                None => (None, Value::Object(Map::new())),
            };

            for (inner, new_value) in writes {
                let inner = inner.iter().map(String::as_str).collect::<Vec<_>>();
                tree::set(&mut value, &inner, new_value.clone());
            }

            let document = CouchTreeDocument {
                id: doc_id.to_string(),
                rev,
                value,
            };
            if self.put_document(doc_id, &document).await? {
                return Ok(());
            }
            if attempt < MAX_CONFLICT_ATTEMPTS {
                let delay = conflict_backoff(attempt);
                debug!(doc_id, attempt, ?delay, "CouchDB revision conflict; retrying");
                sleep(delay).await;
            }
        }

        Err(CouchDaoError::Conflict {
            doc_id: doc_id.to_string(),
            attempts: MAX_CONFLICT_ATTEMPTS,
        })
    }

    async fn write_paths(&self, writes: Vec<(String, Value)>) -> CouchResult<()> {
        let mut per_document: IndexMap<String, Vec<(Vec<String>, Value)>> = IndexMap::new();
        for (path, value) in writes {
            match locate(&path) {
                DocLocation::Document { doc_id, inner } => {
                    let inner = inner.into_iter().map(str::to_string).collect();
                    per_document.entry(doc_id).or_default().push((inner, value));
                }
                DocLocation::Prefix { .. } => {
                    return Err(CouchDaoError::ShallowPath { path });
                }
            }
        }

        for (doc_id, writes) in per_document {
            self.write_document(&doc_id, &writes).await?;
        }
        Ok(())
    }

    async fn poll_changes(&self, since: &str) -> CouchResult<ChangesResponse> {
        const CHANGES: &str = "_changes";
        let query = [
            ("feed", "longpoll".to_string()),
            ("since", since.to_string()),
            ("timeout", self.changes_timeout.as_millis().to_string()),
        ];

        let response = self
            .request(Method::GET, CHANGES)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: CHANGES.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: CHANGES.to_string(),
                status: response.status(),
            });
        }

        response
            .json::<ChangesResponse>()
            .await
            .map_err(|source| CouchDaoError::DecodeResponse {
                path: CHANGES.to_string(),
                source,
            })
    }
}

/// Relay the CouchDB `_changes` feed to local subscribers until the store is dropped.
async fn follow_changes(inner: Weak<CouchInner>) {
    let mut since = "now".to_string();
    let mut delay = INITIAL_DELAY;

    loop {
        let Some(store) = inner.upgrade() else {
            debug!("CouchDB store dropped; stopping changes feed");
            return;
        };

        match store.poll_changes(&since).await {
            Ok(feed) => {
                for row in feed.results {
                    if let Some(path) = doc_path(&row.id) {
                        let _ = store.changes.send(StoreChange { path });
                    }
                }
                since = seq_param(&feed.last_seq);
                delay = INITIAL_DELAY;
            }
            Err(err) => {
                warn!(error = %err, "CouchDB changes feed failed; retrying");
                drop(store);
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

impl KvStore for CouchKvStore {
    fn name(&self) -> &'static str {
        "couchdb"
    }

    fn read(&self, path: &str) -> BoxFuture<'static, StorageResult<Option<Value>>> {
        let inner = self.inner.clone();
        let path = path.to_string();
        Box::pin(async move { inner.read_path(&path).await.map_err(Into::into) })
    }

    fn write(&self, path: &str, value: Value) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        let path = path.to_string();
        Box::pin(async move {
            inner
                .write_paths(vec![(path, value)])
                .await
                .map_err(Into::into)
        })
    }

    fn update(&self, writes: Vec<(String, Value)>) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.write_paths(writes).await.map_err(Into::into) })
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.changes.subscribe()
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let url = inner.database_url();
            let mut builder = inner.client.get(&url);
            if let Some((ref user, ref pass)) = inner.auth {
                builder = builder.basic_auth(user.as_ref(), Some(pass.as_ref()));
            }

            let response = builder
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: url.clone(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path: url,
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.ensure_database().await.map_err(Into::into) })
    }
}

/// Upper bound of the wait after the `attempt`-th conflict: doubles from
/// [`CONFLICT_BASE_DELAY`] and stops at [`CONFLICT_MAX_DELAY`].
fn conflict_backoff_ceiling(attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    CONFLICT_BASE_DELAY
        .saturating_mul(factor)
        .min(CONFLICT_MAX_DELAY)
}

/// Random wait in `[0, ceiling]` so writers that lost the same round spread out.
fn conflict_backoff(attempt: u32) -> Duration {
    let ceiling = conflict_backoff_ceiling(attempt);
    let millis = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(rand::rng().random_range(0..=millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_ceiling_doubles_then_caps() {
        assert_eq!(conflict_backoff_ceiling(1), Duration::from_millis(10));
        assert_eq!(conflict_backoff_ceiling(2), Duration::from_millis(20));
        assert_eq!(conflict_backoff_ceiling(5), Duration::from_millis(160));
        assert_eq!(conflict_backoff_ceiling(8), CONFLICT_MAX_DELAY);
        assert_eq!(conflict_backoff_ceiling(40), CONFLICT_MAX_DELAY);
    }

    #[test]
    fn jittered_waits_stay_under_the_ceiling() {
        for attempt in 1..=MAX_CONFLICT_ATTEMPTS {
            for _ in 0..32 {
                assert!(conflict_backoff(attempt) <= conflict_backoff_ceiling(attempt));
            }
        }
    }

    #[test]
    fn retry_budget_outlasts_a_full_grid() {
        let total: Duration = (1..MAX_CONFLICT_ATTEMPTS).map(conflict_backoff_ceiling).sum();
        assert!(total >= Duration::from_secs(5));
    }
}
