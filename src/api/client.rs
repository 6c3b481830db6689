//! Authenticated transport with transparent credential renewal.
//!
//! Every request goes through [`SessionClient::execute`]:
//!
//! 1. The current access credential is attached as `Authorization: Bearer ...`.
//! 2. A 401 on a request not yet marked `retried` triggers one renewal
//!    (`POST auth/token/refresh/`), then the request is rebuilt with the new
//!    credential and sent once more.
//! 3. If renewal fails both credentials are cleared, the session publishes
//!    `LoggedOut { Expired }`, and the caller gets [`ApiError::SessionLost`].
//!
//! Concurrent 401s share a single in-flight renewal instead of each racing
//! their own refresh request.

use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::header::AUTHORIZATION;
use reqwest::redirect::Policy;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use super::error::{ApiError, RenewalFailure};
use super::session::{LogoutReason, Session};
use super::types::{RefreshRequest, RenewedAccess};

/// Renewal endpoint, relative to the API base URL.
pub const REFRESH_PATH: &str = "auth/token/refresh/";

type RenewalFuture = Shared<BoxFuture<'static, Result<(), RenewalFailure>>>;

// ============================================================================
// Request Description
// ============================================================================

/// A replayable request.
///
/// Kept as plain data rather than a `reqwest::RequestBuilder` so the exact same
/// call can be rebuilt with a different `Authorization` header after renewal.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    target: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
    retried: bool,
}

impl ApiRequest {
    /// `target` is a path relative to the API base URL, or an absolute URL
    /// (as found in pagination `next` links).
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            query: Vec::new(),
            body: None,
            retried: false,
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn post(target: impl Into<String>) -> Self {
        Self::new(Method::POST, target)
    }

    pub fn patch(target: impl Into<String>) -> Self {
        Self::new(Method::PATCH, target)
    }

    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(Method::DELETE, target)
    }

    pub fn query(mut self, pairs: Vec<(String, String)>) -> Self {
        self.query.extend(pairs);
        self
    }

    pub fn json(mut self, body: &impl Serialize) -> Result<Self, ApiError> {
        let value =
            serde_json::to_value(body).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.body = Some(value);
        Ok(self)
    }
}

// ============================================================================
// HTTP Client Configuration
// ============================================================================

/// Redirect policy: at most 3 hops, no loops.
fn create_redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );
        attempt.follow()
    })
}

// ============================================================================
// SessionClient
// ============================================================================

struct ClientInner {
    http: reqwest::Client,
    base_url: Url,
    session: Session,
    renewal: Mutex<Option<RenewalFuture>>,
}

/// Shared transport. Clones are cheap and share the in-flight renewal slot.
#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<ClientInner>,
}

impl SessionClient {
    /// Build a client for `base_url` (e.g. `http://localhost:8000/api`).
    pub fn new(base_url: &str, session: Session) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("cinelist/", env!("CARGO_PKG_VERSION")))
            .redirect(create_redirect_policy())
            .build()?;
        Self::with_http(http, base_url, session)
    }

    /// Build a client around an existing `reqwest::Client`.
    pub fn with_http(
        http: reqwest::Client,
        base_url: &str,
        session: Session,
    ) -> Result<Self, ApiError> {
        // A trailing slash makes relative joins append instead of replacing the last segment.
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url =
            Url::parse(&normalized).map_err(|e| ApiError::InvalidUrl(format!("{base_url}: {e}")))?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                base_url,
                session,
                renewal: Mutex::new(None),
            }),
        })
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Send an authenticated request and decode a JSON body.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let response = self.execute(request).await?;
        decode_json(response).await
    }

    /// Send an authenticated request and discard the body.
    pub async fn send(&self, request: ApiRequest) -> Result<(), ApiError> {
        self.execute(request).await.map(|_| ())
    }

    /// Send without a bearer and without the renewal path (login, register).
    pub async fn send_anonymous_json<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
    ) -> Result<T, ApiError> {
        let response = self.dispatch(&request, None).await?;
        decode_json(check_response(response).await?).await
    }

    /// Anonymous variant of [`SessionClient::send`].
    pub async fn send_anonymous(&self, request: ApiRequest) -> Result<(), ApiError> {
        let response = self.dispatch(&request, None).await?;
        check_response(response).await.map(|_| ())
    }

    /// Send with the bearer attached, renewing once on 401.
    ///
    /// Concurrent callers that hit 401 together share a single renewal. The
    /// request is replayed at most once.
    ///
    /// # Arguments
    ///
    /// * `request` - The call to send; it is kept so it can be replayed
    ///
    /// # Returns
    ///
    /// The successful (2xx) response.
    ///
    /// # Errors
    ///
    /// - `ApiError::SessionLost` if renewal failed or the session was cleared
    ///   while the call was in flight; stored credentials are gone
    /// - `ApiError::AuthExpired` if the replay was rejected too; credentials stay
    /// - `ApiError::Transport` on network failure, with no renewal attempted
    /// - Any other status maps through `NotFound`, `Validation` or `Http`
    pub async fn execute(&self, mut request: ApiRequest) -> Result<Response, ApiError> {
        loop {
            let bearer = self.inner.session.bearer();
            let response = self.dispatch(&request, bearer.as_deref()).await?;

            if response.status() != StatusCode::UNAUTHORIZED {
                return check_response(response).await;
            }

            if request.retried {
                tracing::warn!(
                    method = %request.method,
                    target = %request.target,
                    "Request rejected again after renewal"
                );
                return Err(ApiError::AuthExpired);
            }
            request.retried = true;

            // The credential may have changed while this request was in flight.
            let current = self.inner.session.bearer();
            if bearer.is_some() && current.is_none() {
                return Err(ApiError::SessionLost);
            }
            if current != bearer {
                tracing::debug!(target = %request.target, "Credential already renewed, replaying");
                continue;
            }

            match self.renew().await {
                Ok(()) => {
                    tracing::debug!(target = %request.target, "Replaying request with renewed credential");
                }
                Err(failure) => {
                    tracing::warn!(error = %failure, target = %request.target, "Credential renewal failed");
                    return Err(ApiError::SessionLost);
                }
            }
        }
    }

    /// Join the in-flight renewal, or start one.
    async fn renew(&self) -> Result<(), RenewalFailure> {
        let renewal = {
            let mut slot = self
                .inner
                .renewal
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(in_flight) => {
                    tracing::debug!("Joining in-flight credential renewal");
                    in_flight.clone()
                }
                None => {
                    let url = self.resolve(REFRESH_PATH, &[]);
                    let fut = renew_credentials(
                        self.inner.http.clone(),
                        url,
                        self.inner.session.clone(),
                    )
                    .boxed()
                    .shared();
                    *slot = Some(fut.clone());
                    fut
                }
            }
        };

        let outcome = renewal.clone().await;

        let mut slot = self
            .inner
            .renewal
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|f| f.ptr_eq(&renewal)) {
            *slot = None;
        }
        outcome
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<Response, ApiError> {
        let url = self.resolve(&request.target, &request.query)?;
        tracing::trace!(method = %request.method, url = %url, retried = request.retried, "Sending request");

        let mut builder = self.inner.http.request(request.method.clone(), url);
        if let Some(bearer) = bearer {
            builder = builder.header(AUTHORIZATION, bearer);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        Ok(builder.send().await?)
    }

    fn resolve(&self, target: &str, query: &[(String, String)]) -> Result<Url, ApiError> {
        let mut url = if target.starts_with("http://") || target.starts_with("https://") {
            Url::parse(target)
        } else {
            self.inner.base_url.join(target.trim_start_matches('/'))
        }
        .map_err(|e| ApiError::InvalidUrl(format!("{target}: {e}")))?;

        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }
}

/// The single renewal attempt shared by every waiter.
///
/// Success persists the new access credential; any failure destroys the session.
async fn renew_credentials(
    http: reqwest::Client,
    url: Result<Url, ApiError>,
    session: Session,
) -> Result<(), RenewalFailure> {
    tracing::info!("Renewing access credential");

    let outcome = match url {
        Ok(url) => request_renewal(&http, url, &session).await,
        Err(e) => Err(RenewalFailure::Transport(e.to_string())),
    };

    let outcome = match outcome {
        Ok(access) => session
            .replace_access(access)
            .await
            .map_err(|e| RenewalFailure::Storage(e.to_string())),
        Err(failure) => Err(failure),
    };

    match &outcome {
        Ok(()) => tracing::info!("Access credential renewed"),
        Err(_) => {
            if let Err(e) = session.clear(LogoutReason::Expired).await {
                tracing::warn!(error = %e, "Failed to remove credentials from store");
            }
        }
    }
    outcome
}

async fn request_renewal(
    http: &reqwest::Client,
    url: Url,
    session: &Session,
) -> Result<String, RenewalFailure> {
    let refresh = session
        .refresh_token()
        .ok_or(RenewalFailure::NoRefreshToken)?;

    let response = http
        .post(url)
        .json(&RefreshRequest { refresh: &refresh })
        .send()
        .await
        .map_err(|e| RenewalFailure::Transport(e.to_string()))?;

    if !response.status().is_success() {
        return Err(RenewalFailure::Rejected(response.status().as_u16()));
    }

    let renewed: RenewedAccess = response
        .json()
        .await
        .map_err(|e| RenewalFailure::Decode(e.to_string()))?;
    Ok(renewed.access)
}

/// Map non-2xx responses into the error taxonomy, keeping the decoded body.
async fn check_response(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let bytes = response.bytes().await?;
    let body = serde_json::from_slice::<Value>(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));

    tracing::debug!(status = status.as_u16(), "Backend returned error status");
    Err(ApiError::from_status(status.as_u16(), body))
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn logged_in_client(server: &MockServer) -> SessionClient {
        let db = Database::open(":memory:").await.unwrap();
        let session = Session::init(db).await.unwrap();
        session.establish("a1".into(), "r1".into()).await.unwrap();
        SessionClient::new(&format!("{}/api", server.uri()), session).unwrap()
    }

    #[tokio::test]
    async fn test_attaches_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/movies/"))
            .and(header("Authorization", "Bearer a1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let client = logged_in_client(&server).await;
        let items: Vec<Value> = client.send_json(ApiRequest::get("movies/")).await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_query_pairs_are_encoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/search-movie/"))
            .and(query_param("title", "star wars"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
            .expect(1)
            .mount(&server)
            .await;

        let client = logged_in_client(&server).await;
        client
            .send(
                ApiRequest::get("/search-movie/")
                    .query(vec![("title".into(), "star wars".into())]),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_absolute_target_used_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/movies/"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let client = logged_in_client(&server).await;
        let next = format!("{}/api/movies/?page=2", server.uri());
        client.send(ApiRequest::get(next)).await.unwrap();
    }

    #[tokio::test]
    async fn test_validation_error_mapped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/movies/"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"title": ["This field is required."]})),
            )
            .mount(&server)
            .await;

        let client = logged_in_client(&server).await;
        let err = client
            .send(ApiRequest::post("movies/").json(&json!({})).unwrap())
            .await
            .unwrap_err();
        match err {
            ApiError::Validation(fields) => {
                assert_eq!(fields.first("title"), Some("This field is required."))
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_not_found_mapped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/movies/99/"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"detail": "Not found."})))
            .mount(&server)
            .await;

        let client = logged_in_client(&server).await;
        let err = client.send(ApiRequest::get("movies/99/")).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound));
    }

    #[tokio::test]
    async fn test_server_error_keeps_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/movies/stats/"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let client = logged_in_client(&server).await;
        let err = client.send(ApiRequest::get("movies/stats/")).await.unwrap_err();
        match err {
            ApiError::Http { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, json!("upstream down"));
            }
            other => panic!("expected http error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_renews_once_and_replays() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/movies/"))
            .and(header("Authorization", "Bearer a1"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/token/refresh/"))
            .and(body_json(json!({"refresh": "r1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": "a2"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/movies/"))
            .and(header("Authorization", "Bearer a2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"x": 1}])))
            .expect(1)
            .mount(&server)
            .await;

        let client = logged_in_client(&server).await;
        let items: Vec<Value> = client.send_json(ApiRequest::get("movies/")).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(client.session().bearer().as_deref(), Some("Bearer a2"));
    }

    #[tokio::test]
    async fn test_failed_renewal_clears_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/movies/"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/token/refresh/"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "Token is invalid or expired"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = logged_in_client(&server).await;
        let err = client.send(ApiRequest::get("movies/")).await.unwrap_err();
        assert!(matches!(err, ApiError::SessionLost));
        assert!(!client.session().is_authenticated());
        assert!(client.session().refresh_token().is_none());
    }

    #[tokio::test]
    async fn test_replay_rejected_again_is_not_renewed_twice() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/movies/"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/token/refresh/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": "a2"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = logged_in_client(&server).await;
        let err = client.send(ApiRequest::get("movies/")).await.unwrap_err();
        assert!(matches!(err, ApiError::AuthExpired));
        // Renewal itself succeeded, so the session survives.
        assert!(client.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_anonymous_request_skips_renewal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login/"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"detail": "No active account found with the given credentials"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/token/refresh/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": "a2"})))
            .expect(0)
            .mount(&server)
            .await;

        let client = logged_in_client(&server).await;
        let err = client
            .send_anonymous(ApiRequest::post("auth/login/").json(&json!({})).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Http { status: 401, .. }));
        assert_eq!(
            err.detail(),
            Some("No active account found with the given credentials")
        );
        assert!(client.session().is_authenticated());
    }

    #[test]
    fn test_request_builders() {
        let request = ApiRequest::patch("movies/1/")
            .json(&json!({"status": "watched"}))
            .unwrap();
        assert_eq!(request.method, Method::PATCH);
        assert_eq!(request.body, Some(json!({"status": "watched"})));
        assert!(!request.retried);
    }
}
