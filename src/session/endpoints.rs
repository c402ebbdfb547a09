//! Endpoint classification for credential attachment and retry exemption.

/// How a request path relates to the session's credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointClass {
    /// No credential attached (sign-in, sign-up, refresh, public catalog).
    Public,
    /// Ordinary authenticated endpoint: carries the access token.
    Protected,
    /// Session termination (logout): carries the refresh token, since the
    /// server invalidates the long-lived credential it is presented.
    SessionTermination,
}

/// Paths of the auth endpoints plus any extra public prefixes.
///
/// Classification is by exact path for the auth endpoints and by prefix for
/// `public_prefixes`; everything else is protected.
#[derive(Debug, Clone)]
pub struct AuthEndpoints {
    pub sign_in: String,
    pub sign_up: String,
    pub refresh: String,
    pub logout: String,
    /// Path prefixes served without credentials (e.g. a public catalog).
    pub public_prefixes: Vec<String>,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            sign_in: "/auth/login".to_string(),
            sign_up: "/auth/register".to_string(),
            refresh: "/auth/refresh".to_string(),
            logout: "/auth/logout".to_string(),
            public_prefixes: Vec::new(),
        }
    }
}

impl AuthEndpoints {
    pub fn classify(&self, path: &str) -> EndpointClass {
        if path == self.logout {
            return EndpointClass::SessionTermination;
        }
        if path == self.sign_in || path == self.sign_up || path == self.refresh {
            return EndpointClass::Public;
        }
        if self
            .public_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
        {
            return EndpointClass::Public;
        }
        EndpointClass::Protected
    }

    /// Whether a 401 from this path must never trigger a token refresh.
    ///
    /// Retrying the auth endpoints themselves would be meaningless (sign-in,
    /// sign-up) or recursive (refresh), and a logout that got a 401 already
    /// achieved its goal.
    pub fn is_refresh_exempt(&self, path: &str) -> bool {
        path == self.sign_in
            || path == self.sign_up
            || path == self.refresh
            || path == self.logout
    }
}
