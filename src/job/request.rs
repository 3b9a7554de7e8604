//! Request job: build, execute, demultiplex
//!
//! Construction order is fixed: node placeholders are resolved, the URL and
//! query are rewritten, and only then is the final path signed. Headers are
//! rewritten last.
//!
//! ```text
//! Built ──execute()──▶ Executing ──▶ Succeeded
//!                          │
//!                          ├──transport / status──▶ Cancelled  (cancel() called)
//!                          └──copy / encode───────▶ Failed     (cancel() called)
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use reqwest::{Method, Request, Response, Url};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::node::ResolvedNode;
use super::replacer::Replacer;
use super::route::{Chunk, ChunkHandler, Finalizer, OutputRoute, RouteHandler, BODY_KEY};
use super::sink::{DownstreamSink, Encoder};
use super::upstream::Upstream;
use crate::pipe::{extract_json, keys, ContextStore, EXTRACTION_TIMEOUT};
use crate::types::{CourierError, Result};
use crate::worker::Job;

/// Error callback invoked when a job fails
pub type CancelFn = Box<dyn FnOnce() + Send>;

/// What to request and which part of the response to deliver
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// Target URL template, absolute or relative to `base_url`
    pub url: String,
    /// Base for relative targets
    pub base_url: Option<String>,
    pub method: Method,
    /// Header name and value template pairs
    pub headers: Vec<(String, String)>,
    /// Cookies forwarded as-is; when present no signed auth is attached
    pub cookies: Vec<(String, String)>,
    pub out: OutputRoute,
    /// How long to wait for the resolved node in the context
    pub node_timeout: Duration,
}

impl JobSpec {
    pub fn new(url: impl Into<String>, out: OutputRoute) -> Self {
        Self {
            url: url.into(),
            base_url: None,
            method: Method::GET,
            headers: Vec::new(),
            cookies: Vec::new(),
            out,
            node_timeout: EXTRACTION_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.headers.push((name.into(), template.into()));
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = timeout;
        self
    }
}

/// Downstream collaborators of one job
pub struct Delivery {
    pub sink: Box<dyn DownstreamSink>,
    pub encoder: Box<dyn Encoder>,
    /// Runs once, after the body chunk
    pub close: Finalizer,
    /// Runs once, on failure
    pub cancel: CancelFn,
}

/// Lifecycle of a request job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Built,
    Executing,
    Succeeded,
    Failed,
    Cancelled,
}

/// One authenticated upstream request and the routing of its response
pub struct RequestJob {
    id: Uuid,
    request: Option<Request>,
    upstream: Arc<dyn Upstream>,
    handler: Box<dyn ChunkHandler>,
    cancel: Option<CancelFn>,
    state: JobState,
}

impl RequestJob {
    /// Build a job with the standard [`RouteHandler`]
    ///
    /// Sends nothing upstream. Waits on the context for the resolved node
    /// for at most `spec.node_timeout`.
    pub async fn build(
        ctx: &ContextStore,
        spec: JobSpec,
        replacer: &mut dyn Replacer,
        delivery: Delivery,
        upstream: Arc<dyn Upstream>,
    ) -> Result<Self> {
        let request = prepare_request(ctx, &spec, replacer).await?;
        let handler = RouteHandler::new(spec.out, delivery.sink, delivery.encoder, delivery.close);
        Ok(Self::with_handler(
            request,
            Box::new(handler),
            delivery.cancel,
            upstream,
        ))
    }

    /// Wrap an assembled request with a custom handler
    pub fn with_handler(
        request: Request,
        handler: Box<dyn ChunkHandler>,
        cancel: CancelFn,
        upstream: Arc<dyn Upstream>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            request: Some(request),
            upstream,
            handler,
            cancel: Some(cancel),
            state: JobState::Built,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// The outbound request, until the job has been executed
    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    /// Send the request and route the response. Single use.
    pub async fn execute(&mut self) -> Result<()> {
        let Some(request) = self.request.take() else {
            return Err(CourierError::Internal(format!(
                "job {} has already been executed",
                self.id
            )));
        };
        self.state = JobState::Executing;
        info!(job_id = %self.id, method = %request.method(), url = %request.url(), "Request job start");

        let mut response = match self.upstream.send(request).await {
            Ok(response) => response,
            Err(e) => {
                error!(job_id = %self.id, "Upstream request failed: {}", e);
                self.abort(JobState::Cancelled);
                return Err(e);
            }
        };

        let status = response.status();
        if !status.is_success() {
            error!(
                job_id = %self.id,
                status = %status,
                url = %response.url(),
                headers = ?response.headers(),
                "Upstream rejected request"
            );
            self.abort(JobState::Cancelled);
            return Err(CourierError::UpstreamRejected { status });
        }

        match self.deliver(&mut response).await {
            Ok(()) => {
                self.state = JobState::Succeeded;
                info!(job_id = %self.id, status = %status, "Request job done");
                Ok(())
            }
            Err(e) => {
                error!(job_id = %self.id, "Delivering upstream response failed: {}", e);
                self.abort(JobState::Failed);
                Err(e)
            }
        }
    }

    /// Header values first, then the body with the full header set. A header
    /// literally named `body` is not delivered as a header chunk.
    async fn deliver(&mut self, response: &mut Response) -> Result<()> {
        let headers = response.headers().clone();
        for (name, value) in headers.iter() {
            if name.as_str() == BODY_KEY {
                // Reserved for the body chunk; routing it would close the sink early
                debug!(job_id = %self.id, "Skipping upstream header named '{}'", BODY_KEY);
                continue;
            }
            let chunk = Chunk::value(Bytes::copy_from_slice(value.as_bytes()));
            self.handler.handle(name.as_str(), chunk, None).await?;
        }
        self.handler
            .handle(BODY_KEY, Chunk::Body(response), Some(&headers))
            .await
    }

    fn abort(&mut self, state: JobState) {
        self.state = state;
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

#[async_trait]
impl Job for RequestJob {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn run(self: Box<Self>) -> Result<()> {
        let mut job = self;
        job.execute().await
    }
}

/// Assemble the outbound request for `spec`
pub async fn prepare_request(
    ctx: &ContextStore,
    spec: &JobSpec,
    replacer: &mut dyn Replacer,
) -> Result<Request> {
    debug!("Preparing request for {} ({:?})", spec.url, spec.out);

    match extract_json::<ResolvedNode>(ctx, keys::NODE, spec.node_timeout).await {
        Ok(node) => {
            debug!("Retrieved node {}:{}/{}", node.repo, node.dir, node.basename);
            node.apply(replacer);
        }
        Err(e) => {
            let e = CourierError::NodeResolution(e.to_string());
            warn!("{}; continuing without node placeholders", e);
        }
    }

    let mut url = rewrite_url(spec, replacer)?;

    if spec.cookies.is_empty() {
        match ctx.auth_params() {
            Ok(params) => {
                let auth = params.for_path(url.path());
                append_query_pairs(&mut url, auth.query_pairs())?;
            }
            Err(e) => warn!("{}; sending request without signed auth", e),
        }
    } else {
        debug!("Forwarding {} cookie(s), no signed auth", spec.cookies.len());
    }

    let headers = build_headers(spec, replacer)?;

    debug!("URL is {} - headers {:?}", url, headers);

    let mut request = Request::new(spec.method.clone(), url);
    *request.headers_mut() = headers;
    Ok(request)
}

/// Split the template into location and query, then replace placeholders
/// in the decoded path and in each query key and value separately
///
/// Substituted values never change the URL structure: a `?`, `#` or `%` in
/// a node name ends up percent-encoded in the path it belongs to.
fn rewrite_url(spec: &JobSpec, replacer: &dyn Replacer) -> Result<Url> {
    let (location, query) = match spec.url.split_once('?') {
        Some((location, query)) => (location, Some(query)),
        None => (spec.url.as_str(), None),
    };

    let mut url = parse_target(location, spec.base_url.as_deref())?;

    let path = urlencoding::decode(url.path())
        .map(|decoded| replacer.replace(&decoded))
        .map_err(|e| CourierError::InvalidRequest(format!("path of '{}': {}", location, e)))?;
    url.set_path(&path.replace('%', "%25"));

    let mut pairs: Vec<(String, String)> = match query {
        Some(query) => serde_urlencoded::from_str(query)
            .map_err(|e| CourierError::InvalidRequest(format!("invalid query '{}': {}", query, e)))?,
        None => Vec::new(),
    };
    for (name, value) in pairs.iter_mut() {
        *name = replacer.replace(name);
        *value = replacer.replace(value);
    }

    url.set_query(None);
    url.set_fragment(None);
    append_query_pairs(&mut url, pairs)?;
    Ok(url)
}

fn parse_target(location: &str, base_url: Option<&str>) -> Result<Url> {
    match Url::parse(location) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = base_url.ok_or_else(|| {
                CourierError::InvalidRequest(format!(
                    "relative target '{}' needs a base URL",
                    location
                ))
            })?;
            Url::parse(base)
                .and_then(|base| base.join(location))
                .map_err(|e| CourierError::InvalidRequest(format!("invalid target '{}': {}", location, e)))
        }
        Err(e) => Err(CourierError::InvalidRequest(format!(
            "invalid target '{}': {}",
            location, e
        ))),
    }
}

/// Append `pairs` after any query already on `url`
fn append_query_pairs(url: &mut Url, pairs: Vec<(String, String)>) -> Result<()> {
    if pairs.is_empty() {
        return Ok(());
    }
    let encoded = serde_urlencoded::to_string(&pairs)
        .map_err(|e| CourierError::InvalidRequest(format!("cannot encode query: {}", e)))?;
    let query = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{}&{}", existing, encoded),
        _ => encoded,
    };
    url.set_query(Some(&query));
    Ok(())
}

fn build_headers(spec: &JobSpec, replacer: &dyn Replacer) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, template) in &spec.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| CourierError::InvalidRequest(format!("header name '{}': {}", name, e)))?;
        let value = replacer.replace(template);
        let value = HeaderValue::from_str(&value)
            .map_err(|e| CourierError::InvalidRequest(format!("header '{}': {}", name, e)))?;
        headers.append(name, value);
    }

    if !spec.cookies.is_empty() {
        let cookie = spec
            .cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ");
        let value = HeaderValue::from_str(&cookie)
            .map_err(|e| CourierError::InvalidRequest(format!("cookie: {}", e)))?;
        headers.append(COOKIE, value);
    }

    Ok(headers)
}
