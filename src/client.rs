use anyhow::{Context, Result, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::{StatusCode, Url};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, ETAG, HeaderMap, HeaderValue, IF_MATCH, USER_AGENT};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chunk::{ChunkError, process_in_chunks};
use crate::collect::OffsetCollector;
use crate::config::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_WORKERS, load_config};
use crate::contract::{Fetched, Flow};
use crate::error::{Error, format_api_error};
use crate::fingerprint::process_in_consistent_batches;
use crate::orchestrator::process_in_concurrent_batches;
use crate::util::{backoff, retriable_status};

const FLORENCE_TOKEN_HEADER: &str = "X-Florence-Token";
const COLLECTION_ID_HEADER: &str = "Collection-Id";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base API URL, e.g. `http://localhost:22000`.
    pub url: String,
    /// Service auth token, sent as `Authorization: Bearer <token>`.
    pub service_token: Option<String>,
    /// User auth token, sent as `X-Florence-Token`.
    pub user_token: Option<String>,
    /// Collection id, sent as `Collection-Id`.
    pub collection_id: Option<String>,
    /// Whether to verify TLS certificates.
    pub verify: bool,
    /// Page size for batched listings.
    pub batch_size: usize,
    /// Upper bound on concurrent page fetches.
    pub max_workers: usize,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            service_token: None,
            user_token: None,
            collection_id: None,
            verify: true,
            batch_size: DEFAULT_BATCH_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

/// One page of a paged API listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub count: usize,
    /// Position of the first item in the whole collection: the offset that was requested.
    pub offset: usize,
    pub limit: usize,
    pub total_count: usize,
}

/// A [`Client::patch_in_chunks`] call that stopped part way.
#[derive(Debug, thiserror::Error)]
#[error("{chunk}")]
pub struct PatchError {
    /// The failing chunk's error and how many chunks were accepted before it.
    pub chunk: ChunkError<anyhow::Error>,
    /// `ETag` after the last accepted chunk, or the initial `If-Match` if none was accepted.
    pub etag: Option<String>,
}

// Missing fields come back as `None`. `#[serde(default)]` would add a `T: Default` bound.
#[derive(Debug, serde::Deserialize)]
struct RawPage<T> {
    items: Option<Vec<T>>,
    count: Option<usize>,
    offset: Option<u64>,
    limit: Option<usize>,
    total_count: Option<usize>,
}

impl<T> RawPage<T> {
    fn into_page(self, requested_offset: usize, requested_limit: usize) -> Page<T> {
        let items = self.items.unwrap_or_default();
        match self.offset {
            Some(echoed) if echoed != requested_offset as u64 => warn!(
                requested = requested_offset,
                echoed, "server echoed a different page offset, keeping the requested one"
            ),
            _ => {}
        }
        Page {
            count: self.count.unwrap_or(items.len()),
            offset: requested_offset,
            limit: self.limit.unwrap_or(requested_limit),
            total_count: self.total_count.unwrap_or(0),
            items,
        }
    }
}

/// Blocking client for paged REST APIs.
///
/// Large collections are read with the batch engine: [`Client::get_all_in_batches`] for
/// concurrent paging and [`Client::get_all_consistent`] for resources that must not change
/// while they are being read.
#[derive(Debug, Clone)]
pub struct Client {
    base: Url,
    service_token: Option<String>,
    user_token: Option<String>,
    collection_id: Option<String>,

    timeout: Duration,
    retry_max: usize,
    sleep_max: Duration,
    batch_size: usize,
    max_workers: usize,
    progress: bool,

    http: HttpClient,
}

impl Client {
    /// Creates a client using environment variables and/or `.dpapirc`.
    ///
    /// This is equivalent to `Client::new(None, None, None)`.
    pub fn from_env() -> Result<Self> {
        Self::new(None, None, None)
    }

    /// Creates a client using (in order of precedence):
    /// - explicit `url`/`service_token` arguments
    /// - environment variables `DP_API_URL` / `DP_SERVICE_AUTH_TOKEN`
    /// - config file from `DP_API_RC` or `.dpapirc`
    pub fn new(
        url: Option<String>,
        service_token: Option<String>,
        verify: Option<bool>,
    ) -> Result<Self> {
        let cfg = load_config(url, service_token, verify)?;
        Self::from_config(cfg)
    }

    pub fn from_config(cfg: ClientConfig) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("dp-api-clients-rs/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("dp-api-clients-rs")),
        );

        let mut builder = HttpClient::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(60));

        if !cfg.verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder.build().context("failed to build HTTP client")?;
        let base = Url::parse(cfg.url.trim())
            .with_context(|| format!("invalid API url: {:?}", cfg.url))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("invalid API url: {:?} cannot carry a path", cfg.url);
        }

        Ok(Self {
            base,
            service_token: cfg.service_token,
            user_token: cfg.user_token,
            collection_id: cfg.collection_id,
            timeout: Duration::from_secs(60),
            retry_max: 5,
            sleep_max: Duration::from_secs(10),
            batch_size: cfg.batch_size,
            max_workers: cfg.max_workers,
            progress: false,
            http,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_max(mut self, retry_max: usize) -> Self {
        self.retry_max = retry_max;
        self
    }

    pub fn with_sleep_max(mut self, sleep_max: Duration) -> Self {
        self.sleep_max = sleep_max;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_user_token(mut self, token: impl Into<String>) -> Self {
        self.user_token = Some(token.into());
        self
    }

    pub fn with_collection_id(mut self, collection_id: impl Into<String>) -> Self {
        self.collection_id = Some(collection_id.into());
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Reads one page of `path` starting at `offset`.
    ///
    /// `path` is a `/`-separated list of plain segments below the base URL; each segment is
    /// percent-encoded on its own. The response `ETag` becomes the page fingerprint. With
    /// `if_match` set, the request carries it as `If-Match`, and a 412 answer is reported as
    /// [`Error::PreconditionFailed`].
    pub fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        offset: usize,
        limit: usize,
        if_match: Option<&str>,
    ) -> Result<Fetched<Page<T>>> {
        self.fetch_page(&self.path_url(path)?, offset, limit, if_match)
    }

    /// Reads every item of `path`, fetching pages concurrently.
    ///
    /// Items come back in collection order regardless of which page finished first.
    pub fn get_all_in_batches<T>(&self, path: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.list_in_batches(self.path_url(path)?)
    }

    /// Reads every item of `path` page by page, pinned to the fingerprint of the first page.
    ///
    /// Fails with [`Error::Consistency`] or [`Error::PreconditionFailed`] (both downcastable
    /// from the returned error) if the resource changes mid-read; the caller should then start
    /// over. Returns the items and the fingerprint they were read at.
    pub fn get_all_consistent<T>(&self, path: &str) -> Result<(Vec<T>, Option<String>)>
    where
        T: DeserializeOwned,
    {
        self.list_consistent(self.path_url(path)?)
    }

    pub fn get_datasets_in_batches<T>(&self) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.list_in_batches(self.endpoint(&["datasets"])?)
    }

    pub fn get_versions_in_batches<T>(&self, dataset_id: &str, edition: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.list_in_batches(self.endpoint(&[
            "datasets", dataset_id, "editions", edition, "versions",
        ])?)
    }

    /// Lists instances, optionally filtered (e.g. `[("state", "completed")]`).
    pub fn get_instances_in_batches<T>(&self, filters: &[(&str, &str)]) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        let mut url = self.endpoint(&["instances"])?;
        if !filters.is_empty() {
            url.query_pairs_mut().extend_pairs(filters);
        }
        self.list_in_batches(url)
    }

    pub fn get_options_in_batches<T>(
        &self,
        dataset_id: &str,
        edition: &str,
        version: &str,
        dimension: &str,
    ) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.list_in_batches(self.endpoint(&[
            "datasets", dataset_id, "editions", edition, "versions", version, "dimensions",
            dimension, "options",
        ])?)
    }

    /// Instance dimensions are edited while imports run, so they are read with fingerprint
    /// checks. Returns the dimensions and the `ETag` they were read at.
    pub fn get_instance_dimensions_in_batches<T>(
        &self,
        instance_id: &str,
    ) -> Result<(Vec<T>, Option<String>)>
    where
        T: DeserializeOwned,
    {
        self.list_consistent(self.endpoint(&["instances", instance_id, "dimensions"])?)
    }

    /// PATCHes `items` to `path` as JSON arrays of at most `chunk_size` elements, in order.
    ///
    /// Each request carries the latest known `ETag` as `If-Match`, starting from `if_match`.
    /// Returns the number of chunks sent and the final `ETag`. On failure the [`PatchError`]
    /// holds the `ETag` of the last accepted chunk, so the remaining chunks can be resent.
    pub fn patch_in_chunks<T: Serialize>(
        &self,
        path: &str,
        items: &[T],
        chunk_size: usize,
        if_match: Option<String>,
    ) -> std::result::Result<(usize, Option<String>), PatchError> {
        let url = match self.path_url(path) {
            Ok(url) => url,
            Err(source) => {
                return Err(PatchError {
                    chunk: ChunkError {
                        processed: 0,
                        source,
                    },
                    etag: if_match,
                });
            }
        };
        let mut fingerprint = if_match;

        let result = process_in_chunks::<_, anyhow::Error, _>(items, chunk_size, |chunk| {
            debug!(url = %url, items = chunk.len(), "patching chunk");
            let resp = self.robust_request(url.as_str(), || {
                self.apply_headers(self.http.patch(url.clone()), fingerprint.as_deref())
                    .json(chunk)
                    .send()
            })?;
            let (etag, _) = self.read_response(resp, fingerprint.as_deref())?;
            if etag.is_some() {
                fingerprint = etag;
            }
            Ok(())
        });

        match result {
            Ok(chunks) => Ok((chunks, fingerprint)),
            Err(chunk) => Err(PatchError {
                chunk,
                etag: fingerprint,
            }),
        }
    }

    fn fetch_page<T: DeserializeOwned>(
        &self,
        url: &Url,
        offset: usize,
        limit: usize,
        if_match: Option<&str>,
    ) -> Result<Fetched<Page<T>>> {
        debug!(url = %url, offset, limit, "fetching page");

        let resp = self.robust_request(url.as_str(), || {
            self.apply_headers(self.http.get(url.clone()), if_match)
                .query(&[("offset", offset), ("limit", limit)])
                .send()
        })?;
        let page_url = resp.url().to_string();
        let (fingerprint, text) = self.read_response(resp, if_match)?;

        let raw: RawPage<T> = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse page JSON (url={})", page_url))?;
        let page = raw.into_page(offset, limit);
        let total_count = page.total_count;

        let fetched = Fetched::new(page, total_count);
        Ok(match fingerprint {
            Some(etag) => fetched.with_fingerprint(etag),
            None => fetched,
        })
    }

    fn list_in_batches<T>(&self, url: Url) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        let collector = OffsetCollector::new();
        let progress = self.progress_bar();

        process_in_concurrent_batches(
            |offset| self.fetch_page::<T>(&url, offset, self.batch_size, None),
            |page: Page<T>, _| {
                if let Some(pb) = &progress {
                    if page.offset == 0 {
                        pb.set_length(page.total_count as u64);
                    }
                    pb.inc(page.items.len() as u64);
                }
                collector.place(page.offset, page.items)?;
                Ok(Flow::Continue(()))
            },
            self.batch_size,
            self.max_workers,
        )?;

        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        let items = collector.into_items();
        info!(url = %url, items = items.len(), "listed collection in batches");
        Ok(items)
    }

    fn list_consistent<T>(&self, url: Url) -> Result<(Vec<T>, Option<String>)>
    where
        T: DeserializeOwned,
    {
        let mut items = Vec::new();

        let fingerprint = process_in_consistent_batches(
            |offset, if_match| self.fetch_page::<T>(&url, offset, self.batch_size, if_match),
            |page: Page<T>, _| {
                items.extend(page.items);
                Ok(Flow::Continue(()))
            },
            self.batch_size,
        )?;

        info!(
            url = %url,
            items = items.len(),
            fingerprint = fingerprint.as_deref().unwrap_or_default(),
            "listed collection with fingerprint checks"
        );
        Ok((items, fingerprint))
    }

    /// The base URL with `segments` appended, each percent-encoded as one path segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("API url {} cannot carry a path", self.base))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn path_url(&self, path: &str) -> Result<Url> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        self.endpoint(&segments)
    }

    fn progress_bar(&self) -> Option<ProgressBar> {
        if !self.progress {
            return None;
        }
        let pb = ProgressBar::new(0);
        if let Ok(style) =
            ProgressStyle::with_template("{spinner:.green} {pos}/{len} items {wide_bar} {eta}")
        {
            pb.set_style(style.progress_chars("=>-"));
        }
        Some(pb)
    }

    fn apply_headers(&self, req: RequestBuilder, if_match: Option<&str>) -> RequestBuilder {
        let mut req = req.timeout(self.timeout);
        if let Some(token) = &self.service_token {
            let token = token.trim();
            req = if token.starts_with("Bearer ") {
                req.header(AUTHORIZATION, token)
            } else {
                req.header(AUTHORIZATION, format!("Bearer {}", token))
            };
        }
        if let Some(token) = &self.user_token {
            req = req.header(FLORENCE_TOKEN_HEADER, token.trim());
        }
        if let Some(collection_id) = &self.collection_id {
            req = req.header(COLLECTION_ID_HEADER, collection_id.trim());
        }
        if let Some(etag) = if_match {
            req = req.header(IF_MATCH, etag);
        }
        req
    }

    /// Splits a response into its `ETag` and body, mapping failures to errors.
    fn read_response(
        &self,
        resp: Response,
        if_match: Option<&str>,
    ) -> Result<(Option<String>, String)> {
        let status = resp.status();
        let url = resp.url().to_string();
        let etag = resp
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = resp
            .text()
            .with_context(|| format!("failed to read response body (url={})", url))?;

        if status == StatusCode::PRECONDITION_FAILED {
            return Err(Error::PreconditionFailed {
                url,
                if_match: if_match.unwrap_or_default().to_string(),
            }
            .into());
        }
        if !status.is_success() {
            return Err(format_api_error(status, &url, &text));
        }
        Ok((etag, text))
    }

    fn robust_request<F>(&self, url: &str, mut f: F) -> Result<Response>
    where
        F: FnMut() -> reqwest::Result<Response>,
    {
        let mut tries = 0usize;
        let mut sleep = Duration::from_millis(100).min(self.sleep_max);
        loop {
            match f() {
                Ok(resp) if retriable_status(resp.status().as_u16()) => {
                    tries += 1;
                    if tries >= self.retry_max {
                        return Ok(resp);
                    }
                    warn!(url, status = resp.status().as_u16(), attempt = tries, "retrying request");
                }
                Ok(resp) => return Ok(resp),
                Err(err) => {
                    tries += 1;
                    if tries >= self.retry_max {
                        return Err(err).with_context(|| format!("could not connect ({})", url));
                    }
                    // timeouts / transient connection errors
                    warn!(url, error = %err, attempt = tries, "request failed, retrying");
                }
            }
            thread::sleep(sleep);
            sleep = backoff(sleep, self.sleep_max);
        }
    }
}
