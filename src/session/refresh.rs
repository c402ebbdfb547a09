//! Single-flight token refresh.
//!
//! Any number of requests can fail with a 401 at the same moment; exactly one
//! token-exchange call may go over the wire. The coordinator serializes
//! callers on an async mutex and lets everyone who queued up behind an
//! in-flight refresh share its outcome instead of issuing their own call.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::credentials::{CredentialStore, Credentials};

/// Why a token exchange did not produce a new pair.
#[derive(Debug)]
pub enum RefreshError {
    /// The refresh token itself was rejected (401). Fail closed: the stored
    /// pair can never be used again.
    Rejected,
    /// Network error, server error, or malformed response. The stored refresh
    /// token may still be valid, so credentials must be kept.
    Transient(anyhow::Error),
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshError::Rejected => write!(f, "Refresh token rejected by server"),
            RefreshError::Transient(e) => write!(f, "Token refresh failed: {:#}", e),
        }
    }
}

impl std::error::Error for RefreshError {}

/// The network side of a token exchange, kept behind a trait so tests can
/// substitute a counting stub.
#[async_trait]
pub trait AuthTransport: Send + Sync {
    /// Exchange a refresh token for a new token pair.
    async fn exchange(&self, refresh_token: &str) -> Result<Credentials, RefreshError>;
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Token exchange over HTTP: POST `{base_url}{refresh_path}` with a JSON
/// body carrying the refresh token.
pub struct HttpAuthTransport {
    http_client: reqwest::Client,
    token_url: String,
}

impl HttpAuthTransport {
    pub fn new(http_client: reqwest::Client, base_url: &str, refresh_path: &str) -> Self {
        Self {
            http_client,
            token_url: format!("{}{}", base_url, refresh_path),
        }
    }
}

#[async_trait]
impl AuthTransport for HttpAuthTransport {
    async fn exchange(&self, refresh_token: &str) -> Result<Credentials, RefreshError> {
        let response = self
            .http_client
            .post(&self.token_url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| RefreshError::Transient(anyhow!(e).context("Failed to send token refresh request")))?;

        match response.status() {
            StatusCode::UNAUTHORIZED => Err(RefreshError::Rejected),
            status if !status.is_success() => Err(RefreshError::Transient(anyhow!(
                "Token endpoint error: {}",
                status
            ))),
            _ => response
                .json::<Credentials>()
                .await
                .map_err(|e| RefreshError::Transient(anyhow!(e).context("Failed to parse token response"))),
        }
    }
}

/// Outcome bookkeeping guarded by the refresh lock.
struct RefreshState {
    /// Number of completed refresh attempts.
    completed: u64,
    /// Outcome of the most recent attempt, shared with callers that queued
    /// while it was in flight.
    last_outcome: Option<String>,
}

/// The process-wide refresh lock.
///
/// Exactly one gate exists per credential store, and every coordinator that
/// refreshes against that store must share it, no matter how many clients
/// were built from the store. This is what makes "at most one in-flight
/// exchange" hold across clients rather than per client.
pub struct RefreshGate {
    state: Mutex<RefreshState>,
    /// Mirror of `state.completed`, readable without the lock.
    epoch: AtomicU64,
}

impl RefreshGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RefreshState {
                completed: 0,
                last_outcome: None,
            }),
            epoch: AtomicU64::new(0),
        }
    }
}

impl Default for RefreshGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializes token refreshes so at most one exchange is in flight
/// process-wide.
///
/// Callers that were waiting on the gate while another refresh completed
/// observe that refresh's outcome directly; they do not issue a second
/// exchange. The lock guard is dropped on every exit path, including
/// cancellation of the awaiting caller.
pub struct RefreshCoordinator {
    store: Arc<CredentialStore>,
    transport: Arc<dyn AuthTransport>,
    gate: Arc<RefreshGate>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        transport: Arc<dyn AuthTransport>,
        gate: Arc<RefreshGate>,
    ) -> Self {
        Self {
            store,
            transport,
            gate,
        }
    }

    /// Obtains a fresh access token, or `None` if the session cannot be
    /// refreshed.
    ///
    /// - no stored refresh token: `None`, no network call
    /// - exchange succeeds: new pair persisted, new access token returned
    /// - refresh token rejected (401): stored credentials wiped, `None`
    /// - transient failure: stored credentials kept, `None`
    pub async fn refresh(&self) -> Option<String> {
        let observed = self.gate.epoch.load(Ordering::Acquire);
        let mut state = self.gate.state.lock().await;

        if state.completed != observed {
            // A refresh completed while we waited for the lock; share it
            tracing::debug!("Refresh already performed by a concurrent caller");
            return state.last_outcome.clone();
        }

        let outcome = self.exchange_and_store().await;

        state.completed += 1;
        self.gate.epoch.store(state.completed, Ordering::Release);
        state.last_outcome = outcome.clone();

        outcome
    }

    async fn exchange_and_store(&self) -> Option<String> {
        let refresh_token = match self.store.refresh_token() {
            Some(token) if !token.trim().is_empty() => token,
            _ => {
                tracing::debug!("No stored refresh token, skipping exchange");
                return None;
            }
        };

        match self.transport.exchange(&refresh_token).await {
            Ok(pair) => {
                self.store.save(&pair);
                tracing::info!("Session tokens refreshed");
                Some(pair.access_token)
            }
            Err(RefreshError::Rejected) => {
                // Fail closed: a rejected refresh token can never be reused
                tracing::warn!("Refresh token rejected, clearing stored credentials");
                self.store.clear_tokens();
                None
            }
            Err(RefreshError::Transient(e)) => {
                tracing::warn!("Token refresh failed, keeping stored credentials: {:#}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{FileKeystore, SqliteBackend, DEFAULT_KEY_ALIAS};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_store(dir: &TempDir) -> Arc<CredentialStore> {
        let backend = SqliteBackend::in_memory().unwrap();
        let keystore = FileKeystore::new(dir.path());
        Arc::new(CredentialStore::new(Box::new(backend), &keystore, DEFAULT_KEY_ALIAS).unwrap())
    }

    fn gate() -> Arc<RefreshGate> {
        Arc::new(RefreshGate::new())
    }

    /// Counts exchanges and returns a canned outcome after an optional delay.
    struct StubTransport {
        calls: AtomicUsize,
        delay: Duration,
        outcome: fn() -> Result<Credentials, RefreshError>,
    }

    impl StubTransport {
        fn new(outcome: fn() -> Result<Credentials, RefreshError>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                outcome,
            })
        }

        fn with_delay(
            outcome: fn() -> Result<Credentials, RefreshError>,
            delay: Duration,
        ) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                outcome,
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AuthTransport for StubTransport {
        async fn exchange(&self, _refresh_token: &str) -> Result<Credentials, RefreshError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            (self.outcome)()
        }
    }

    fn new_pair() -> Result<Credentials, RefreshError> {
        Ok(Credentials {
            access_token: "A2".to_string(),
            refresh_token: "R2".to_string(),
        })
    }

    #[tokio::test]
    async fn test_refresh_success_persists_new_pair() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store.save_tokens("A1", "R1");

        let transport = StubTransport::new(new_pair);
        let coordinator = RefreshCoordinator::new(store.clone(), transport.clone(), gate());

        let token = coordinator.refresh().await;

        assert_eq!(token.as_deref(), Some("A2"));
        assert_eq!(store.access_token().as_deref(), Some("A2"));
        assert_eq!(store.refresh_token().as_deref(), Some("R2"));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_no_refresh_token_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);

        let transport = StubTransport::new(new_pair);
        let coordinator = RefreshCoordinator::new(store, transport.clone(), gate());

        assert!(coordinator.refresh().await.is_none());
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_blank_refresh_token_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store.save_tokens("A1", "   ");

        let transport = StubTransport::new(new_pair);
        let coordinator = RefreshCoordinator::new(store, transport.clone(), gate());

        assert!(coordinator.refresh().await.is_none());
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_refresh_wipes_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store.save_tokens("A1", "R1");

        let transport = StubTransport::new(|| Err(RefreshError::Rejected));
        let coordinator = RefreshCoordinator::new(store.clone(), transport, gate());

        assert!(coordinator.refresh().await.is_none());
        assert!(store.access_token().is_none());
        assert!(store.refresh_token().is_none());
        assert!(!store.is_logged_in());
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store.save_tokens("A1", "R1");

        let transport =
            StubTransport::new(|| Err(RefreshError::Transient(anyhow!("server exploded"))));
        let coordinator = RefreshCoordinator::new(store.clone(), transport, gate());

        assert!(coordinator.refresh().await.is_none());
        assert_eq!(store.access_token().as_deref(), Some("A1"));
        assert_eq!(store.refresh_token().as_deref(), Some("R1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refreshes_collapse_to_one_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store.save_tokens("A1", "R1");

        // The delay keeps the first exchange in flight while the other
        // callers queue up on the lock
        let transport = StubTransport::with_delay(new_pair, Duration::from_millis(100));
        let coordinator = Arc::new(RefreshCoordinator::new(store, transport.clone(), gate()));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            tasks.push(tokio::spawn(async move { coordinator.refresh().await }));
        }

        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap());
        }

        assert_eq!(transport.call_count(), 1);
        for result in results {
            assert_eq!(result.as_deref(), Some("A2"));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_a_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store.save_tokens("A1", "R1");

        let transport = StubTransport::with_delay(
            || Err(RefreshError::Rejected),
            Duration::from_millis(100),
        );
        let coordinator = Arc::new(RefreshCoordinator::new(store.clone(), transport.clone(), gate()));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            tasks.push(tokio::spawn(async move { coordinator.refresh().await }));
        }

        for task in tasks {
            assert!(task.await.unwrap().is_none());
        }

        assert_eq!(transport.call_count(), 1);
        assert!(!store.is_logged_in());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_coordinators_sharing_a_gate_collapse_to_one_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store.save_tokens("A1", "R1");

        // Two coordinators over the same store, as two clients built from
        // one session would hold; the shared gate must still serialize them
        let transport = StubTransport::with_delay(new_pair, Duration::from_millis(100));
        let shared_gate = gate();
        let first = Arc::new(RefreshCoordinator::new(
            store.clone(),
            transport.clone(),
            shared_gate.clone(),
        ));
        let second = Arc::new(RefreshCoordinator::new(
            store,
            transport.clone(),
            shared_gate,
        ));

        let mut tasks = Vec::new();
        for coordinator in [first, second] {
            for _ in 0..4 {
                let coordinator = coordinator.clone();
                tasks.push(tokio::spawn(async move { coordinator.refresh().await }));
            }
        }

        for task in tasks {
            assert_eq!(task.await.unwrap().as_deref(), Some("A2"));
        }
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_sequential_refreshes_each_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store.save_tokens("A1", "R1");

        let transport = StubTransport::new(new_pair);
        let coordinator = RefreshCoordinator::new(store, transport.clone(), gate());

        // Non-concurrent calls are separate expiries and get separate exchanges
        assert_eq!(coordinator.refresh().await.as_deref(), Some("A2"));
        assert_eq!(coordinator.refresh().await.as_deref(), Some("A2"));
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_caller_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store.save_tokens("A1", "R1");

        let transport = StubTransport::with_delay(new_pair, Duration::from_millis(200));
        let coordinator = Arc::new(RefreshCoordinator::new(store, transport.clone(), gate()));

        // Abort a refresh mid-flight, then verify a later caller can proceed
        let victim = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        victim.abort();
        assert!(victim.await.is_err());

        let token = coordinator.refresh().await;
        assert_eq!(token.as_deref(), Some("A2"));
    }

    mod http_transport {
        use super::*;
        use mockito::Server;

        #[tokio::test]
        async fn test_successful_exchange() {
            let mut server = Server::new_async().await;
            let _mock = server
                .mock("POST", "/auth/refresh")
                .match_body(r#"{"refresh_token":"R1"}"#)
                .with_status(200)
                .with_header("content-type", "application/json")
                .with_body(r#"{"access_token":"A2","refresh_token":"R2"}"#)
                .create_async()
                .await;

            let transport =
                HttpAuthTransport::new(reqwest::Client::new(), &server.url(), "/auth/refresh");
            let pair = transport.exchange("R1").await.unwrap();

            assert_eq!(pair.access_token, "A2");
            assert_eq!(pair.refresh_token, "R2");
        }

        #[tokio::test]
        async fn test_401_maps_to_rejected() {
            let mut server = Server::new_async().await;
            let _mock = server
                .mock("POST", "/auth/refresh")
                .with_status(401)
                .create_async()
                .await;

            let transport =
                HttpAuthTransport::new(reqwest::Client::new(), &server.url(), "/auth/refresh");
            assert!(matches!(
                transport.exchange("R1").await,
                Err(RefreshError::Rejected)
            ));
        }

        #[tokio::test]
        async fn test_server_error_maps_to_transient() {
            let mut server = Server::new_async().await;
            let _mock = server
                .mock("POST", "/auth/refresh")
                .with_status(500)
                .create_async()
                .await;

            let transport =
                HttpAuthTransport::new(reqwest::Client::new(), &server.url(), "/auth/refresh");
            assert!(matches!(
                transport.exchange("R1").await,
                Err(RefreshError::Transient(_))
            ));
        }

        #[tokio::test]
        async fn test_malformed_body_maps_to_transient() {
            let mut server = Server::new_async().await;
            let _mock = server
                .mock("POST", "/auth/refresh")
                .with_status(200)
                .with_header("content-type", "application/json")
                .with_body(r#"{"unexpected":"shape"}"#)
                .create_async()
                .await;

            let transport =
                HttpAuthTransport::new(reqwest::Client::new(), &server.url(), "/auth/refresh");
            assert!(matches!(
                transport.exchange("R1").await,
                Err(RefreshError::Transient(_))
            ));
        }
    }
}
