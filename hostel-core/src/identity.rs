use std::collections::HashMap;
use std::sync::Arc;

/// An authenticated caller, produced by a [`TokenManager`] and carried in the
/// per-request [`Scope`](crate::services::Scope).
///
/// Token *issuance* is outside the engine; this trait is the boundary through
/// which the embedding application's identity model is consumed.
pub trait Identity: Send + Sync {
    /// Stable key for this identity (e.g. a subject claim). Used by the
    /// deferred-request manager to fingerprint per-identity submissions.
    fn key(&self) -> &str;

    /// Roles granted to this identity.
    fn roles(&self) -> &[String];

    fn has_role(&self, role: &str) -> bool {
        self.roles().iter().any(|r| r == role)
    }
}

/// Validates bearer tokens into identities.
///
/// Supplied by the application through
/// [`use_identity`](crate::options::AppOptionsBuilder::use_identity).
pub trait TokenManager: Send + Sync {
    /// Returns the identity for a valid token, `None` otherwise.
    fn authenticate(&self, token: &str) -> Option<Arc<dyn Identity>>;
}

/// A named authorization predicate over an identity.
pub type Policy = Arc<dyn Fn(&dyn Identity) -> bool + Send + Sync>;

/// Named policies registered through the options builder.
pub type PolicyMap = HashMap<String, Policy>;

/// What a method requires of the caller before it may be invoked.
#[derive(Clone, Default)]
pub struct AuthRule {
    /// Any of these roles grants access; empty means any authenticated caller.
    pub roles: Vec<&'static str>,
    /// A named policy that must also hold.
    pub policy: Option<String>,
}

impl AuthRule {
    /// Require authentication only.
    pub fn authenticated() -> AuthRule {
        AuthRule::default()
    }

    /// Require any of the given roles.
    pub fn roles(roles: &[&'static str]) -> AuthRule {
        AuthRule {
            roles: roles.to_vec(),
            policy: None,
        }
    }

    /// Require the named policy to hold.
    pub fn policy(name: impl Into<String>) -> AuthRule {
        AuthRule {
            roles: Vec::new(),
            policy: Some(name.into()),
        }
    }

    pub fn with_policy(mut self, name: impl Into<String>) -> AuthRule {
        self.policy = Some(name.into());
        self
    }
}

/// A ready-made identity for applications that only need key + roles.
#[derive(Clone, Debug)]
pub struct BasicIdentity {
    key: String,
    roles: Vec<String>,
}

impl BasicIdentity {
    pub fn new(key: impl Into<String>, roles: &[&str]) -> BasicIdentity {
        BasicIdentity {
            key: key.into(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }
}

impl Identity for BasicIdentity {
    fn key(&self) -> &str {
        &self.key
    }

    fn roles(&self) -> &[String] {
        &self.roles
    }
}
