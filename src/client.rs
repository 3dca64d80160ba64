use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use reqwest::Method;

use crate::cache::{CacheStore, DEFAULT_CACHE_TTL};
use crate::context::{RequestContext, RequestContextStore};
use crate::interceptor::{Interceptor, InterceptorPipeline};
use crate::logger::Logger;
use crate::normalize::ErrorNormalizer;
use crate::request::{MultipartForm, ProgressCallback};
use crate::retry::RetryPolicy;
use crate::transport::{ReqwestTransport, Transport};
use crate::{
    ClientConfig, ClientOptions, ConfigError, ConfigManager, ErrorContext, ErrorKind, HttpError,
    HttpResponse, Progress, RequestBody, RequestDescriptor, RequestId, RequestOptions, Response,
    Result, TransportError, UploadFile,
};

/// Header carrying the request id on every attempt.
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// HTTP client that adds retries, cancellation, caching and interceptors on
/// top of a [`Transport`].
///
/// Cloning is cheap and clones share all state. Independent clients share
/// nothing.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    config: RwLock<ConfigManager>,
    pipeline: InterceptorPipeline,
    contexts: RequestContextStore,
    cache: CacheStore,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("config", &self.config())
            .field("interceptors", &self.inner.pipeline.len())
            .field("pending", &self.inner.contexts.len())
            .field("cached", &self.inner.cache.len())
            .finish()
    }
}

/// Builder for [`HttpClient`].
pub struct HttpClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    pipeline: InterceptorPipeline,
}

impl HttpClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            pipeline: InterceptorPipeline::new(),
        }
    }

    /// Replaces the default [`ReqwestTransport`].
    pub fn transport(self, transport: impl Transport + 'static) -> Self {
        self.transport_arc(Arc::new(transport))
    }

    pub fn transport_arc(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Appends an interceptor. Interceptors run in the order they are added.
    pub fn interceptor(self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptor_arc(Arc::new(interceptor))
    }

    pub fn interceptor_arc(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.pipeline.push(interceptor);
        self
    }

    /// Validates the configuration and builds the client.
    pub fn build(self) -> std::result::Result<HttpClient, ConfigError> {
        let manager = ConfigManager::new(self.config);
        manager.ensure_valid()?;
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(ReqwestTransport::new()));
        Ok(HttpClient {
            inner: Arc::new(ClientInner {
                transport,
                config: RwLock::new(manager),
                pipeline: self.pipeline,
                contexts: RequestContextStore::new(),
                cache: CacheStore::new(),
            }),
        })
    }
}

/// Options for [`HttpClient::upload`].
#[derive(Clone)]
pub struct UploadOptions {
    /// Form field holding the file. Defaults to `"file"`.
    pub field_name: String,
    /// Extra text fields sent with the file.
    pub data: Vec<(String, String)>,
    pub on_progress: Option<ProgressCallback>,
    pub request: RequestOptions,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            field_name: "file".to_owned(),
            data: Vec::new(),
            on_progress: None,
            request: RequestOptions::default(),
        }
    }
}

impl UploadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field_name(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = field_name.into();
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.push((name.into(), value.into()));
        self
    }

    pub fn on_progress(mut self, callback: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    pub fn request(mut self, request: RequestOptions) -> Self {
        self.request = request;
        self
    }
}

/// Options for [`HttpClient::download`].
#[derive(Clone, Default)]
pub struct DownloadOptions {
    pub on_progress: Option<ProgressCallback>,
    /// When set, the downloaded body is also written to this path.
    pub filename: Option<PathBuf>,
    pub request: RequestOptions,
}

impl DownloadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress(mut self, callback: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    pub fn filename(mut self, path: impl Into<PathBuf>) -> Self {
        self.filename = Some(path.into());
        self
    }

    pub fn request(mut self, request: RequestOptions) -> Self {
        self.request = request;
        self
    }
}

/// What [`HttpClient::cancel_request`] cancels.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CancelTarget {
    Id(RequestId),
    /// Every in-flight request registered with this cancel key.
    Key(String),
    /// A descriptor with neither a request id nor a cancel key.
    Untracked,
}

impl From<RequestId> for CancelTarget {
    fn from(id: RequestId) -> Self {
        Self::Id(id)
    }
}

impl From<&RequestId> for CancelTarget {
    fn from(id: &RequestId) -> Self {
        Self::Id(id.clone())
    }
}

impl From<&RequestDescriptor> for CancelTarget {
    /// Prefers the descriptor's request id, then its cancel key.
    fn from(request: &RequestDescriptor) -> Self {
        match (&request.options.request_id, &request.options.cancel_key) {
            (Some(id), _) => Self::Id(id.clone()),
            (None, Some(key)) => Self::Key(key.clone()),
            (None, None) => Self::Untracked,
        }
    }
}

impl HttpClient {
    /// Starts a builder for a client with a custom transport or interceptors.
    pub fn builder(config: ClientConfig) -> HttpClientBuilder {
        HttpClientBuilder::new(config)
    }

    /// Creates a client with the default transport and no interceptors.
    pub fn new(config: ClientConfig) -> std::result::Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    fn config_manager(&self) -> std::sync::RwLockReadGuard<'_, ConfigManager> {
        self.inner.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current typed options.
    pub fn config(&self) -> ClientOptions {
        self.config_manager().options()
    }

    /// Current normalized configuration, in its raw form.
    pub fn raw_config(&self) -> ClientConfig {
        self.config_manager().get()
    }

    /// Deep-merges `patch` into the configuration. Nothing changes if the
    /// result is invalid. In-flight requests keep the options they started
    /// with.
    pub fn update_config(&self, patch: ClientConfig) -> std::result::Result<(), ConfigError> {
        let mut manager = self.inner.config.write().unwrap_or_else(PoisonError::into_inner);
        let next = manager.merged(patch);
        next.ensure_valid()?;
        *manager = next;
        Ok(())
    }

    pub fn reset_config(&self) {
        self.inner
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
    }

    /// Sends a GET request to `url`, resolved against the configured base URL.
    ///
    /// GET responses are served from the cache when `options` enables it.
    ///
    /// ```no_run
    /// use reqflow::{ClientConfig, HttpClient, RequestOptions};
    ///
    /// # async fn run() -> reqflow::Result<()> {
    /// let client = HttpClient::new(ClientConfig::new().base_url("https://api.example.com"))
    ///     .expect("valid config");
    /// let users = client
    ///     .get("/users", RequestOptions::new().query("page", "1").enable_cache(true))
    ///     .await?;
    /// println!("{}", users.text());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get(
        &self,
        url: impl Into<String>,
        options: impl Into<RequestOptions>,
    ) -> Result<HttpResponse> {
        self.request(RequestDescriptor::get(url).with_options(options))
            .await
    }

    /// Sends a POST request with `body`.
    ///
    /// ```no_run
    /// use reqflow::{ClientConfig, HttpClient};
    /// use serde_json::json;
    ///
    /// # async fn run() -> reqflow::Result<()> {
    /// let client = HttpClient::new(ClientConfig::new().base_url("https://api.example.com"))
    ///     .expect("valid config");
    /// let created = client.post("/users", json!({"name": "ada"}), ()).await?;
    /// assert_eq!(created.status, 201);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn post(
        &self,
        url: impl Into<String>,
        body: impl Into<RequestBody>,
        options: impl Into<RequestOptions>,
    ) -> Result<HttpResponse> {
        self.send_with_body(Method::POST, url, body, options).await
    }

    /// Sends a PUT request with `body`.
    pub async fn put(
        &self,
        url: impl Into<String>,
        body: impl Into<RequestBody>,
        options: impl Into<RequestOptions>,
    ) -> Result<HttpResponse> {
        self.send_with_body(Method::PUT, url, body, options).await
    }

    /// Sends a PATCH request with `body`.
    pub async fn patch(
        &self,
        url: impl Into<String>,
        body: impl Into<RequestBody>,
        options: impl Into<RequestOptions>,
    ) -> Result<HttpResponse> {
        self.send_with_body(Method::PATCH, url, body, options).await
    }

    /// Sends a DELETE request.
    pub async fn delete(
        &self,
        url: impl Into<String>,
        options: impl Into<RequestOptions>,
    ) -> Result<HttpResponse> {
        self.request(RequestDescriptor::new(Method::DELETE, url).with_options(options))
            .await
    }

    /// Sends a HEAD request. Cacheable like GET.
    pub async fn head(
        &self,
        url: impl Into<String>,
        options: impl Into<RequestOptions>,
    ) -> Result<HttpResponse> {
        self.request(RequestDescriptor::new(Method::HEAD, url).with_options(options))
            .await
    }

    /// Sends an OPTIONS request.
    pub async fn options(
        &self,
        url: impl Into<String>,
        options: impl Into<RequestOptions>,
    ) -> Result<HttpResponse> {
        self.request(RequestDescriptor::new(Method::OPTIONS, url).with_options(options))
            .await
    }

    async fn send_with_body(
        &self,
        method: Method,
        url: impl Into<String>,
        body: impl Into<RequestBody>,
        options: impl Into<RequestOptions>,
    ) -> Result<HttpResponse> {
        self.request(
            RequestDescriptor::new(method, url)
                .with_body(body)
                .with_options(options),
        )
        .await
    }

    /// Sends `file` as `multipart/form-data` with a POST request.
    pub async fn upload(
        &self,
        url: impl Into<String>,
        file: UploadFile,
        options: UploadOptions,
    ) -> Result<HttpResponse> {
        let mut form = MultipartForm::new().file(options.field_name, file);
        form.fields = options.data;
        let mut request = RequestDescriptor::post(url)
            .with_body(RequestBody::Multipart(form))
            .with_options(options.request);
        request.upload_progress = options.on_progress;
        self.request(request).await
    }

    /// Fetches `url` with a GET request and returns the body, writing it to
    /// `options.filename` as well when one is given.
    pub async fn download(&self, url: impl Into<String>, options: DownloadOptions) -> Result<Bytes> {
        let mut request = RequestDescriptor::get(url).with_options(options.request);
        request.download_progress = options.on_progress;
        let response = self.request(request).await?;

        if let Some(path) = &options.filename {
            tokio::fs::write(path, &response.body).await.map_err(|err| {
                HttpError::new(
                    ErrorKind::Unknown,
                    format!("failed to write {}: {err}", path.display()),
                )
                .with_code("io")
                .with_source(err)
            })?;
        }
        Ok(response.body)
    }

    /// Runs one logical request through cache, interceptors, transport and
    /// retries.
    pub async fn request(&self, request: RequestDescriptor) -> Result<HttpResponse> {
        let options = self.config();
        let retry = request
            .options
            .retry
            .clone()
            .unwrap_or_else(|| options.retry.clone());
        let normalizer = ErrorNormalizer::new(RetryPolicy::new(&retry));
        let logger = Logger::new(options.enable_logging);
        let mut request = resolve(request, &options);

        let cache_key = request.is_cacheable().then(|| request.fingerprint());
        if let Some(key) = &cache_key {
            if let Some(cached) = self.inner.cache.get(key) {
                logger.cache_hit(key);
                return Ok(HttpResponse::from_cache(cached));
            }
        }

        let id = request
            .options
            .request_id
            .clone()
            .unwrap_or_else(RequestId::generate);
        let Some(context) = self
            .inner
            .contexts
            .register(&id, request.options.cancel_key.clone())
        else {
            let context = ErrorContext::new(
                Some(id.clone()),
                0,
                request.method.as_str(),
                request.url.as_str(),
            );
            return Err(HttpError::new(
                ErrorKind::Unknown,
                format!("request id {id} is already in flight"),
            )
            .with_code("duplicate_request_id")
            .with_context(context));
        };
        request.options.request_id = Some(id.clone());
        set_header(&mut request.options.headers, REQUEST_ID_HEADER, id.to_string());

        let outcome = self
            .run_attempts(&request, &context, &normalizer, &options, logger)
            .await;
        self.inner.contexts.release(&id, &context.cancel);

        match outcome {
            Ok((response, retry_count)) => {
                if let Some(key) = cache_key {
                    let ttl = request.options.cache_time.unwrap_or(DEFAULT_CACHE_TTL);
                    self.inner.cache.set(key, response.clone(), ttl);
                }
                Ok(HttpResponse::completed(
                    response,
                    context.elapsed(),
                    retry_count,
                    id,
                ))
            }
            Err(mut error) => {
                if error.is_cancelled() {
                    logger.request_cancelled(&id, &error.message);
                } else {
                    if let Some(message) = &request.options.custom_error_message {
                        error.message = message.clone();
                    }
                    logger.request_failed(&id, &error);
                }
                Err(error)
            }
        }
    }

    async fn run_attempts(
        &self,
        request: &RequestDescriptor,
        context: &RequestContext,
        normalizer: &ErrorNormalizer,
        options: &ClientOptions,
        logger: Logger,
    ) -> Result<(Response, u32)> {
        let cancel = &context.cancel;
        let id = &context.request_id;
        let mut retry_count = 0u32;

        loop {
            let mut attempt = request.clone();
            attempt.attempt = retry_count;
            let error_context = ErrorContext::new(
                Some(id.clone()),
                retry_count,
                attempt.method.as_str(),
                attempt.url.as_str(),
            );

            let error = match self
                .dispatch(attempt.clone(), context, normalizer, options, logger, &error_context)
                .await
            {
                Ok(response) => return Ok((response, retry_count)),
                Err(error) => error,
            };

            let error = self.inner.pipeline.apply_error(&attempt, error).await;
            let error = if cancel.is_cancelled() && !error.is_cancelled() {
                normalizer.cancelled(cancel.reason(), error_context.clone())
            } else {
                normalizer.reclassify(error)
            };
            if !normalizer.policy().should_retry(&error, retry_count) {
                return Err(error);
            }

            let delay = normalizer.policy().compute_delay(retry_count);
            if !self
                .inner
                .contexts
                .update_context(id, |context| context.retry_count += 1)
            {
                return Err(normalizer.cancelled(cancel.reason(), error_context));
            }
            logger.retry_scheduled(id, &error, retry_count + 1, delay);
            retry_count += 1;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(normalizer.cancelled(cancel.reason(), error_context));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn dispatch(
        &self,
        attempt: RequestDescriptor,
        context: &RequestContext,
        normalizer: &ErrorNormalizer,
        options: &ClientOptions,
        logger: Logger,
        error_context: &ErrorContext,
    ) -> Result<Response> {
        let cancel = &context.cancel;
        if cancel.is_cancelled() {
            return Err(normalizer.cancelled(cancel.reason(), error_context.clone()));
        }

        let prepared = self
            .inner
            .pipeline
            .apply_request(attempt)
            .await
            .map_err(|err| normalizer.from_interceptor(err, error_context.clone()))?;
        logger.request_started(&context.request_id, &prepared);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(normalizer.cancelled(cancel.reason(), error_context.clone()));
            }
            outcome = self.inner.transport.send(&prepared, cancel.token()) => outcome,
        };
        let response = match outcome {
            Ok(response) => response,
            Err(TransportError::Cancelled) => {
                return Err(normalizer.cancelled(cancel.reason(), error_context.clone()));
            }
            Err(err) => return Err(normalizer.from_transport(err, error_context.clone())),
        };
        logger.response_received(&context.request_id, response.status, context.elapsed());

        if !options.is_success(response.status) {
            return Err(normalizer.from_status(&response, error_context.clone()));
        }
        self.inner
            .pipeline
            .apply_response(&prepared, response)
            .await
            .map_err(|err| normalizer.from_interceptor(err, error_context.clone()))
    }

    /// Fires the cancellation signal of the targeted requests and returns
    /// how many signals were fired.
    ///
    /// A request whose transport already answered still completes normally,
    /// so a non-zero count does not mean the request failed.
    pub fn cancel_request(&self, target: impl Into<CancelTarget>, reason: Option<&str>) -> usize {
        match target.into() {
            CancelTarget::Id(id) => usize::from(self.inner.contexts.cancel(&id, reason)),
            CancelTarget::Key(key) => self.inner.contexts.cancel_by_key(&key, reason),
            CancelTarget::Untracked => 0,
        }
    }

    pub fn cancel_all(&self, reason: Option<&str>) -> usize {
        self.inner.contexts.cancel_all(reason)
    }

    /// Cancels every in-flight request whose context matches `predicate`.
    pub fn cancel_matching<P>(&self, predicate: P, reason: Option<&str>) -> usize
    where
        P: Fn(&RequestContext) -> bool,
    {
        self.inner.contexts.cancel_matching(predicate, reason)
    }

    pub fn pending_request_ids(&self) -> Vec<RequestId> {
        self.inner.contexts.pending_ids()
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    pub fn cache_keys(&self) -> Vec<String> {
        self.inner.cache.keys()
    }

    pub fn has_cached(&self, key: &str) -> bool {
        self.inner.cache.has(key)
    }

    pub fn delete_cached(&self, key: &str) -> bool {
        self.inner.cache.delete(key)
    }

    pub fn clean_expired_cache(&self) -> usize {
        self.inner.cache.clean_expired()
    }

    pub fn cache_len(&self) -> usize {
        self.inner.cache.len()
    }

    /// Cancels every in-flight request and empties the cache. Returns how
    /// many requests were cancelled.
    pub fn shutdown(&self, reason: Option<&str>) -> usize {
        let cancelled = self.cancel_all(reason.or(Some("client shut down")));
        self.clear_cache();
        cancelled
    }
}

/// Joins the base URL, merges default headers under per-request ones and
/// fixes the timeouts for every attempt.
fn resolve(mut request: RequestDescriptor, options: &ClientOptions) -> RequestDescriptor {
    request.url = join_url(&options.base_url, &request.url);

    let mut headers = options.headers.clone();
    for (name, value) in std::mem::take(&mut request.options.headers) {
        set_header(&mut headers, &name, value);
    }
    request.options.headers = headers;
    request.timeouts = request.options.timeout.unwrap_or(options.timeouts);
    request
}

fn set_header(headers: &mut BTreeMap<String, String>, name: &str, value: String) {
    headers.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
    headers.insert(name.to_owned(), value);
}

fn join_url(base_url: &str, url: &str) -> String {
    let is_absolute = url.starts_with("http://") || url.starts_with("https://");
    if base_url.is_empty() || is_absolute {
        return url.to_owned();
    }
    if url.is_empty() {
        return base_url.to_owned();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        url.trim_start_matches('/')
    )
}
