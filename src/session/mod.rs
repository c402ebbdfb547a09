//! Authenticated session pipeline.
//!
//! An outgoing request is classified by its path, gets the matching stored
//! bearer credential attached, and is sent. A 401 from a protected endpoint
//! triggers a single, process-wide de-duplicated token refresh followed by
//! exactly one resend of the original request.
//!
//! # Usage
//!
//! ```no_run
//! use authgate::credentials::{CredentialStore, FileKeystore, SqliteBackend, DEFAULT_KEY_ALIAS};
//! use authgate::session::{AuthEndpoints, Session};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let backend = SqliteBackend::open("session.db")?;
//! let keystore = FileKeystore::new("/var/lib/myapp/keys");
//! let store = CredentialStore::new(Box::new(backend), &keystore, DEFAULT_KEY_ALIAS)?;
//!
//! let session = Session::new(store);
//! session.save_tokens("access", "refresh");
//!
//! let client = session.client("https://shop.example.com/api", AuthEndpoints::default());
//! let response = client.get("/orders").await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```

mod authenticator;
mod client;
mod endpoints;
mod refresh;

pub use authenticator::RequestAuthenticator;
pub use client::SessionClient;
pub use endpoints::{AuthEndpoints, EndpointClass};
pub use refresh::{AuthTransport, HttpAuthTransport, RefreshCoordinator, RefreshError, RefreshGate};

use std::sync::Arc;

use crate::credentials::CredentialStore;

/// Owner of the session's credential store and refresh gate.
///
/// Constructed once at process start and passed down explicitly; every
/// [`SessionClient`] handed out shares the same store and the same
/// [`RefreshGate`], so a sign-out through one client is visible to all of
/// them and concurrent 401s across clients still collapse into a single
/// token exchange.
pub struct Session {
    store: Arc<CredentialStore>,
    gate: Arc<RefreshGate>,
}

impl Session {
    pub fn new(store: CredentialStore) -> Self {
        Self {
            store: Arc::new(store),
            gate: Arc::new(RefreshGate::new()),
        }
    }

    /// Shared handle to the underlying credential store.
    pub fn store(&self) -> Arc<CredentialStore> {
        self.store.clone()
    }

    /// True iff a non-blank access token is currently stored.
    pub fn is_logged_in(&self) -> bool {
        self.store.is_logged_in()
    }

    /// Persists a freshly issued token pair (e.g. after sign-in).
    pub fn save_tokens(&self, access_token: &str, refresh_token: &str) {
        self.store.save_tokens(access_token, refresh_token);
    }

    /// Wipes the stored token pair (sign-out).
    pub fn clear_tokens(&self) {
        self.store.clear_tokens();
    }

    /// Builds an authenticated client for the given API base URL.
    pub fn client(&self, base_url: &str, endpoints: AuthEndpoints) -> SessionClient {
        SessionClient::new(base_url, endpoints, self.store.clone(), self.gate.clone())
    }

    /// Builds a client with a custom refresh transport (for testing).
    pub fn client_with_transport(
        &self,
        base_url: &str,
        endpoints: AuthEndpoints,
        transport: Arc<dyn AuthTransport>,
    ) -> SessionClient {
        SessionClient::with_transport(
            base_url,
            endpoints,
            self.store.clone(),
            self.gate.clone(),
            transport,
        )
    }
}
