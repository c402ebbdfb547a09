//! Authenticated HTTP client with one-shot 401 recovery.

use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::{Method, Response, StatusCode};
use serde_json::Value;

use crate::credentials::CredentialStore;
use crate::session::authenticator::RequestAuthenticator;
use crate::session::endpoints::{AuthEndpoints, EndpointClass};
use crate::session::refresh::{AuthTransport, HttpAuthTransport, RefreshCoordinator, RefreshGate};

/// HTTP client wrapper that runs every request through the session pipeline:
/// classify the endpoint, attach the right bearer credential, send, and on a
/// 401 from a protected endpoint refresh the tokens once and resend once.
///
/// Transport-level failures (connectivity, timeout) propagate immediately and
/// are never retried here; only an authentication-failure response gets the
/// refresh-and-retry treatment.
pub struct SessionClient {
    http_client: reqwest::Client,
    base_url: String,
    endpoints: AuthEndpoints,
    authenticator: RequestAuthenticator,
    refresher: RefreshCoordinator,
}

impl SessionClient {
    /// Creates a client whose token exchange goes to
    /// `{base_url}{endpoints.refresh}`. The gate must be the one owned by
    /// the session this client's store belongs to, so refreshes from every
    /// client sharing that store collapse into a single in-flight exchange.
    pub(crate) fn new(
        base_url: &str,
        endpoints: AuthEndpoints,
        store: Arc<CredentialStore>,
        gate: Arc<RefreshGate>,
    ) -> Self {
        let http_client = reqwest::Client::new();
        let transport = Arc::new(HttpAuthTransport::new(
            http_client.clone(),
            base_url,
            &endpoints.refresh,
        ));
        Self::assemble(http_client, base_url, endpoints, store, gate, transport)
    }

    /// Creates a client with a custom refresh transport (for testing).
    pub(crate) fn with_transport(
        base_url: &str,
        endpoints: AuthEndpoints,
        store: Arc<CredentialStore>,
        gate: Arc<RefreshGate>,
        transport: Arc<dyn AuthTransport>,
    ) -> Self {
        Self::assemble(
            reqwest::Client::new(),
            base_url,
            endpoints,
            store,
            gate,
            transport,
        )
    }

    fn assemble(
        http_client: reqwest::Client,
        base_url: &str,
        endpoints: AuthEndpoints,
        store: Arc<CredentialStore>,
        gate: Arc<RefreshGate>,
        transport: Arc<dyn AuthTransport>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.to_string(),
            endpoints,
            authenticator: RequestAuthenticator::new(store.clone()),
            refresher: RefreshCoordinator::new(store, transport, gate),
        }
    }

    /// Sends a request through the session pipeline.
    ///
    /// On a 401 from a protected, non-exempt endpoint: refresh once, and if
    /// that produced a new access token resend the request exactly once with
    /// it, returning whatever comes back. If refresh yields nothing the
    /// original 401 response is returned unmodified.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Response> {
        let class = self.endpoints.classify(path);
        let response = self.dispatch(method.clone(), path, body, None, class).await?;

        let retryable = response.status() == StatusCode::UNAUTHORIZED
            && class == EndpointClass::Protected
            && !self.endpoints.is_refresh_exempt(path);
        if !retryable {
            return Ok(response);
        }

        tracing::debug!("Got 401 from {}, attempting token refresh", path);
        match self.refresher.refresh().await {
            Some(token) => {
                tracing::debug!("Retrying {} once with refreshed token", path);
                self.dispatch(method, path, body, Some(&token), class).await
            }
            None => Ok(response),
        }
    }

    pub async fn get(&self, path: &str) -> Result<Response> {
        self.send(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Response> {
        self.send(Method::POST, path, Some(body)).await
    }

    pub async fn put(&self, path: &str, body: &Value) -> Result<Response> {
        self.send(Method::PUT, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Response> {
        self.send(Method::DELETE, path, None).await
    }

    async fn dispatch(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        override_token: Option<&str>,
        class: EndpointClass,
    ) -> Result<Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http_client.request(method, &url);

        request = match override_token {
            Some(token) => request.bearer_auth(token),
            None => self.authenticator.authorize(request, class),
        };
        if let Some(json) = body {
            request = request.json(json);
        }

        request
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", path))
    }
}
