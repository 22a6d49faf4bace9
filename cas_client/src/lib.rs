// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
// Enable all clippy lints except for many of the pedantic ones. It's a shame this needs to be copied and pasted across crates, but there doesn't appear to be a way to include inner attributes from a common source.
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
// It is often more clear to show that nothing is being moved.
#![allow(clippy::match_ref_pats)]
// Subjective style.
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
// Default isn't as big a deal as people seem to think it is.
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]
// Arc<Mutex> can be more clear than needing to grok Orderings:
#![allow(clippy::mutex_atomic)]

mod cache;

pub use hashing::Cid;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use hashing::Digest;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio_retry2::strategy::ExponentialFactorBackoff;
use tokio_retry2::{Retry, RetryError};
use url::Url;
use workunit_store::{in_workunit, Level, Metric};

use cache::Cache;

const DEFAULT_MAX_CACHE_BYTES: u64 = 100 * 1024 * 1024;
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30 * 60);
const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 16;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);
const RETRY_FACTOR: f64 = 2.0;
const MAX_ATTEMPTS: usize = 3;

///
/// Construction-time configuration for a `CasClient`. Mirrors the shape of the other
/// `*Options` structs in this workspace: a plain struct with a constructor seeded with sane
/// defaults, rather than a builder with many chained optional setters.
///
#[derive(Clone, Debug)]
pub struct CasClientOptions {
    pub base_url: Url,
    pub bearer_token: Option<String>,
    pub max_cache_bytes: u64,
    pub cache_ttl: Duration,
    pub max_concurrent_fetches: usize,
    pub request_timeout: Duration,
}

impl CasClientOptions {
    pub fn new(base_url: Url) -> CasClientOptions {
        CasClientOptions {
            base_url,
            bearer_token: None,
            max_cache_bytes: DEFAULT_MAX_CACHE_BYTES,
            cache_ttl: DEFAULT_CACHE_TTL,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> CasClientOptions {
        self.bearer_token = Some(token.into());
        self
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CasError {
    /// The CAS does not recognize the given CID. Never retried.
    NotFound(String),
    /// A connection, timeout, or server-side (5xx) failure. Retried with backoff before
    /// surfacing to the caller.
    Transport(String),
    /// The CAS rejected the request for a reason other than "not found" (e.g. a malformed
    /// body). Never retried: retrying a semantically-rejected request wastes attempts.
    Rejected(String),
    Serialization(String),
}

impl fmt::Display for CasError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CasError::NotFound(cid) => write!(f, "CID not found in CAS: {cid}"),
            CasError::Transport(msg) => write!(f, "CAS transport error: {msg}"),
            CasError::Rejected(msg) => write!(f, "CAS rejected request: {msg}"),
            CasError::Serialization(msg) => write!(f, "CAS (de)serialization error: {msg}"),
        }
    }
}

impl std::error::Error for CasError {}

/// The outcome of a single HTTP attempt, before backoff decides whether to try again.
#[derive(Clone, Debug)]
enum FetchError {
    Retryable(String),
    NotFound,
    Permanent(String),
}

fn fetch_error_to_cas_error(err: FetchError, context: &str) -> CasError {
    match err {
        FetchError::NotFound => CasError::NotFound(context.to_owned()),
        FetchError::Retryable(msg) => CasError::Transport(msg),
        FetchError::Permanent(msg) => CasError::Rejected(msg),
    }
}

fn jitter(duration: Duration) -> Duration {
    duration.mul_f64(rand::random::<f64>())
}

/// Runs `attempt` up to `MAX_ATTEMPTS` times with exponentially-increasing, jittered backoff,
/// retrying only `FetchError::Retryable` failures. `retries` is incremented once per retried
/// attempt so the caller can report it as a metric.
async fn retry_attempt<T, F, Fut>(mut attempt: F, retries: &AtomicU64) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, FetchError>>,
{
    let retry_strategy = ExponentialFactorBackoff::from_millis(RETRY_BASE_DELAY.as_millis() as u64, RETRY_FACTOR)
        .map(jitter)
        .take(MAX_ATTEMPTS - 1);

    Retry::spawn(retry_strategy, || {
        let fut = attempt();
        async {
            fut.await.map_err(|err| match err {
                FetchError::Retryable(msg) => {
                    retries.fetch_add(1, Ordering::Relaxed);
                    log::debug!("cas_client: transient error, retrying: {msg}");
                    RetryError::transient(FetchError::Retryable(msg))
                }
                other => RetryError::permanent(other),
            })
        }
    })
    .await
}

#[derive(Deserialize)]
struct CidResponse {
    cid: String,
}

///
/// A cached client for a remote, HTTP-addressable content-addressed store.
///
/// `put`/`get` address opaque blobs via `POST /ipfs/add` and `GET /ipfs/cat`; `put_graph`/
/// `get_graph` address canonical reasoning-graph documents via `POST /ipld/store` and
/// `GET /ipld/load`. Both pairs share the same in-memory cache and retry policy; they differ
/// only in the wire paths and in what's serialized into the blob.
///
pub struct CasClient {
    http: reqwest::Client,
    base_url: Url,
    bearer_token: Option<String>,
    cache: Mutex<Cache>,
    fetch_semaphore: Arc<Semaphore>,
}

impl CasClient {
    pub fn new(options: CasClientOptions) -> Result<CasClient, CasError> {
        let http = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|err| CasError::Transport(err.to_string()))?;
        Ok(CasClient {
            http,
            base_url: options.base_url,
            bearer_token: options.bearer_token,
            cache: Mutex::new(Cache::new(options.max_cache_bytes, options.cache_ttl)),
            fetch_semaphore: Arc::new(Semaphore::new(options.max_concurrent_fetches.max(1))),
        })
    }

    pub fn cached_entry_count(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn cached_bytes(&self) -> u64 {
        self.cache.lock().total_bytes()
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn parse_cid_response(&self, response: reqwest::Response) -> Result<Cid, FetchError> {
        let status = response.status();
        if status.is_server_error() {
            return Err(FetchError::Retryable(format!("server error ({status})")));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound);
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Permanent(format!("rejected ({status}): {body}")));
        }
        let parsed: CidResponse = response
            .json()
            .await
            .map_err(|err| FetchError::Retryable(format!("malformed CAS response: {err}")))?;
        Cid::from_str(&parsed.cid).map_err(|err: std::convert::Infallible| match err {})
    }

    async fn fetch_bytes(&self, response_result: Result<reqwest::Response, reqwest::Error>) -> Result<Bytes, FetchError> {
        let response = response_result.map_err(|err| FetchError::Retryable(err.to_string()))?;
        let status = response.status();
        if status.is_server_error() {
            return Err(FetchError::Retryable(format!("server error ({status})")));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound);
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Permanent(format!("rejected ({status}): {body}")));
        }
        response
            .bytes()
            .await
            .map_err(|err| FetchError::Retryable(format!("error reading CAS response body: {err}")))
    }

    async fn attempt_upload_blob(&self, bytes: Bytes) -> Result<Cid, FetchError> {
        let url = self
            .base_url
            .join("ipfs/add")
            .map_err(|err| FetchError::Permanent(err.to_string()))?;
        let part = reqwest::multipart::Part::bytes(bytes.to_vec()).file_name("blob");
        let form = reqwest::multipart::Form::new().part("file", part);
        let response = self
            .authed(self.http.post(url))
            .multipart(form)
            .send()
            .await
            .map_err(|err| FetchError::Retryable(format!("error uploading to CAS: {err}")))?;
        self.parse_cid_response(response).await
    }

    async fn attempt_download_blob(&self, cid: &Cid) -> Result<Bytes, FetchError> {
        let mut url = self
            .base_url
            .join("ipfs/cat")
            .map_err(|err| FetchError::Permanent(err.to_string()))?;
        url.query_pairs_mut().append_pair("cid", cid.as_str());
        let result = self.authed(self.http.get(url)).send().await;
        self.fetch_bytes(result).await
    }

    async fn attempt_upload_graph(&self, bytes: Bytes) -> Result<Cid, FetchError> {
        let url = self
            .base_url
            .join("ipld/store")
            .map_err(|err| FetchError::Permanent(err.to_string()))?;
        let response = self
            .authed(self.http.post(url))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|err| FetchError::Retryable(format!("error storing graph in CAS: {err}")))?;
        self.parse_cid_response(response).await
    }

    async fn attempt_download_graph(&self, cid: &Cid) -> Result<Bytes, FetchError> {
        let mut url = self
            .base_url
            .join("ipld/load")
            .map_err(|err| FetchError::Permanent(err.to_string()))?;
        url.query_pairs_mut().append_pair("cid", cid.as_str());
        let result = self.authed(self.http.get(url)).send().await;
        self.fetch_bytes(result).await
    }

    ///
    /// Stores an opaque blob, deduplicating on content hash: two calls with equal bytes always
    /// produce the same `Cid` and only the first ever reaches the network.
    ///
    pub async fn put(&self, bytes: Bytes) -> Result<Cid, CasError> {
        let digest = Digest::of_bytes(&bytes);
        in_workunit!(
            "cas_put",
            Level::Debug,
            desc = Some(format!("cas put ({} bytes)", bytes.len())),
            |workunit| async move {
                workunit.increment_counter(Metric::CasCacheRequests, 1);
                if let Some((_, cid)) = self.cache.lock().get_by_hash(&digest.hash) {
                    workunit.increment_counter(Metric::CasCacheHits, 1);
                    return Ok(cid);
                }
                workunit.increment_counter(Metric::CasCacheMisses, 1);
                workunit.increment_counter(Metric::CasPutRequests, 1);

                let retries = AtomicU64::new(0);
                let result = retry_attempt(|| self.attempt_upload_blob(bytes.clone()), &retries).await;
                workunit.increment_counter(Metric::CasTransportRetries, retries.load(Ordering::Relaxed));

                let cid = result.map_err(|err| fetch_error_to_cas_error(err, "<new blob>"))?;
                self.cache.lock().insert(digest.hash, bytes, cid.clone());
                Ok(cid)
            }
        )
        .await
    }

    /// Fetches a blob by CID, serving from the local cache when present.
    pub async fn get(&self, cid: &Cid) -> Result<Bytes, CasError> {
        in_workunit!(
            "cas_get",
            Level::Debug,
            desc = Some(format!("cas get {cid}")),
            |workunit| async move {
                workunit.increment_counter(Metric::CasCacheRequests, 1);
                if let Some(bytes) = self.cache.lock().get_by_cid(cid) {
                    workunit.increment_counter(Metric::CasCacheHits, 1);
                    return Ok(bytes);
                }
                workunit.increment_counter(Metric::CasCacheMisses, 1);
                workunit.increment_counter(Metric::CasGetRequests, 1);

                let _permit = self
                    .fetch_semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("fetch semaphore is never closed");

                let retries = AtomicU64::new(0);
                let result = retry_attempt(|| self.attempt_download_blob(cid), &retries).await;
                workunit.increment_counter(Metric::CasTransportRetries, retries.load(Ordering::Relaxed));

                let bytes = result.map_err(|err| fetch_error_to_cas_error(err, cid.as_str()))?;
                let digest = Digest::of_bytes(&bytes);
                self.cache.lock().insert(digest.hash, bytes.clone(), cid.clone());
                Ok(bytes)
            }
        )
        .await
    }

    ///
    /// Serializes a reasoning graph document into canonical, sorted-key JSON and stores it.
    /// Canonicalization happens by round-tripping through `serde_json::Value`, whose map is a
    /// `BTreeMap` in this workspace (see `graph::Graph::to_canonical_document`).
    ///
    pub async fn put_graph(&self, document: &graph::GraphDocument) -> Result<Cid, CasError> {
        let value = serde_json::to_value(document).map_err(|err| CasError::Serialization(err.to_string()))?;
        let bytes = Bytes::from(serde_json::to_vec(&value).map_err(|err| CasError::Serialization(err.to_string()))?);
        let digest = Digest::of_bytes(&bytes);

        in_workunit!(
            "cas_put_graph",
            Level::Debug,
            desc = Some(format!("cas put_graph ({} bytes)", bytes.len())),
            |workunit| async move {
                workunit.increment_counter(Metric::CasCacheRequests, 1);
                if let Some((_, cid)) = self.cache.lock().get_by_hash(&digest.hash) {
                    workunit.increment_counter(Metric::CasCacheHits, 1);
                    return Ok(cid);
                }
                workunit.increment_counter(Metric::CasCacheMisses, 1);
                workunit.increment_counter(Metric::CasPutRequests, 1);

                let retries = AtomicU64::new(0);
                let result = retry_attempt(|| self.attempt_upload_graph(bytes.clone()), &retries).await;
                workunit.increment_counter(Metric::CasTransportRetries, retries.load(Ordering::Relaxed));

                let cid = result.map_err(|err| fetch_error_to_cas_error(err, "<new graph>"))?;
                self.cache.lock().insert(digest.hash, bytes, cid.clone());
                Ok(cid)
            }
        )
        .await
    }

    /// Fetches and deserializes a reasoning graph document by CID.
    pub async fn get_graph(&self, cid: &Cid) -> Result<graph::GraphDocument, CasError> {
        let bytes = in_workunit!(
            "cas_get_graph",
            Level::Debug,
            desc = Some(format!("cas get_graph {cid}")),
            |workunit| async move {
                workunit.increment_counter(Metric::CasCacheRequests, 1);
                if let Some(bytes) = self.cache.lock().get_by_cid(cid) {
                    workunit.increment_counter(Metric::CasCacheHits, 1);
                    return Ok(bytes);
                }
                workunit.increment_counter(Metric::CasCacheMisses, 1);
                workunit.increment_counter(Metric::CasGetRequests, 1);

                let _permit = self
                    .fetch_semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("fetch semaphore is never closed");

                let retries = AtomicU64::new(0);
                let result = retry_attempt(|| self.attempt_download_graph(cid), &retries).await;
                workunit.increment_counter(Metric::CasTransportRetries, retries.load(Ordering::Relaxed));

                let bytes = result.map_err(|err| fetch_error_to_cas_error(err, cid.as_str()))?;
                self.cache.lock().insert(Digest::of_bytes(&bytes).hash, bytes.clone(), cid.clone());
                Ok(bytes)
            }
        )
        .await?;

        serde_json::from_slice(&bytes).map_err(|err| CasError::Serialization(err.to_string()))
    }
}

#[cfg(test)]
mod tests;
