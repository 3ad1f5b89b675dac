//! Partition keys for limiter state.

/// The actor a request is attributed to.
///
/// The variant is part of the key, so a user id and a network address with
/// the same text never share limiter state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// A logged-in user, keyed by user id.
    Authenticated(String),
    /// An anonymous caller, keyed by network address.
    Anonymous(String),
}

impl Identity {
    /// Identity of a logged-in user.
    pub fn user(id: impl Into<String>) -> Self {
        Identity::Authenticated(id.into())
    }

    /// Identity of an anonymous caller.
    pub fn address(addr: impl Into<String>) -> Self {
        Identity::Anonymous(addr.into())
    }

    /// Pick the session user when there is one, otherwise fall back to the
    /// caller's address.
    pub fn resolve(session_user: Option<&str>, remote_addr: &str) -> Self {
        match session_user {
            Some(id) => Identity::user(id),
            None => Identity::address(remote_addr),
        }
    }

    /// The raw user id or address.
    pub fn value(&self) -> &str {
        match self {
            Identity::Authenticated(id) => id,
            Identity::Anonymous(addr) => addr,
        }
    }

    /// Whether this identity belongs to a logged-in user.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Identity::Authenticated(_))
    }

    /// Convert the identity to a string representation.
    ///
    /// This is useful for logging and debugging.
    pub fn to_string_key(&self) -> String {
        match self {
            Identity::Authenticated(id) => format!("user:{}", id),
            Identity::Anonymous(addr) => format!("addr:{}", addr),
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}
