//! Credential attachment for outgoing requests.

use std::sync::Arc;

use reqwest::RequestBuilder;

use crate::credentials::CredentialStore;
use crate::session::endpoints::EndpointClass;

/// Attaches the stored bearer credential appropriate for an endpoint class.
///
/// Read-only over the credential store. If the relevant token is absent or
/// blank the request goes out without an Authorization header; the server's
/// rejection is the signal that drives recovery, not this stage.
pub struct RequestAuthenticator {
    store: Arc<CredentialStore>,
}

impl RequestAuthenticator {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self { store }
    }

    pub fn authorize(&self, request: RequestBuilder, class: EndpointClass) -> RequestBuilder {
        let token = match class {
            EndpointClass::Public => None,
            EndpointClass::Protected => self.store.access_token(),
            EndpointClass::SessionTermination => self.store.refresh_token(),
        };

        match token {
            Some(token) if !token.trim().is_empty() => request.bearer_auth(token),
            _ => request,
        }
    }
}
