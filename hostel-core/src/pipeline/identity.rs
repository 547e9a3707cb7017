//! The identity stage: validates bearer tokens, attaches the caller identity
//! to the request scope, and enforces per-endpoint authorization rules.

use std::sync::Arc;

use super::{Exchange, Next, Responder, RespondFuture};
use crate::error::HttpError;
use crate::identity::{AuthRule, Identity, PolicyMap, TokenManager};
use crate::routing::RouteMatch;

pub struct IdentityStage {
    manager: Arc<dyn TokenManager>,
    policies: Arc<PolicyMap>,
}

impl IdentityStage {
    pub fn new(manager: Arc<dyn TokenManager>, policies: Arc<PolicyMap>) -> IdentityStage {
        IdentityStage { manager, policies }
    }

    fn authorize(&self, rule: &AuthRule, identity: &dyn Identity) -> Result<(), HttpError> {
        if !rule.roles.is_empty() && !rule.roles.iter().any(|role| identity.has_role(role)) {
            return Err(HttpError::Forbidden("insufficient roles".to_string()));
        }
        if let Some(name) = &rule.policy {
            let policy = self
                .policies
                .get(name)
                .ok_or_else(|| HttpError::Forbidden(format!("unknown policy '{name}'")))?;
            if !policy(identity) {
                return Err(HttpError::Forbidden(format!("policy '{name}' denied")));
            }
        }
        Ok(())
    }
}

impl Responder for IdentityStage {
    fn respond<'a>(&'a self, exchange: &'a mut Exchange, next: Next<'a>) -> RespondFuture<'a> {
        Box::pin(async move {
            let bearer = exchange
                .request
                .header("authorization")
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(str::trim)
                .map(str::to_string);

            if let Some(token) = bearer {
                // A presented token must validate, even on anonymous routes.
                let identity = self
                    .manager
                    .authenticate(&token)
                    .ok_or(HttpError::Unauthorized)?;
                exchange.scope.set_identity(identity);
            }

            let rule = match exchange.route_match() {
                RouteMatch::Success(binding) => binding.endpoint.method().auth.clone(),
                _ => None,
            };
            if let Some(rule) = rule {
                let identity = exchange.scope.identity().ok_or(HttpError::Unauthorized)?;
                self.authorize(&rule, identity.as_ref())?;
            }

            next.run(exchange).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpRequest, Reply};
    use crate::identity::BasicIdentity;
    use crate::routing::{MethodDef, ResourceDef, RouteTable};
    use crate::services::{Scope, ServiceRegistry};
    use http::Method;
    use std::collections::HashMap;

    struct StaticTokens;

    impl TokenManager for StaticTokens {
        fn authenticate(&self, token: &str) -> Option<Arc<dyn Identity>> {
            match token {
                "admin-token" => Some(Arc::new(BasicIdentity::new("alice", &["admin"]))),
                "user-token" => Some(Arc::new(BasicIdentity::new("bob", &["user"]))),
                _ => None,
            }
        }
    }

    struct Echo;

    impl Responder for Echo {
        fn respond<'a>(&'a self, exchange: &'a mut Exchange, _: Next<'a>) -> RespondFuture<'a> {
            Box::pin(async move {
                let who = exchange
                    .scope
                    .identity()
                    .map(|i| i.key().to_string())
                    .unwrap_or_else(|| "anonymous".to_string());
                Ok(Reply::text(who))
            })
        }
    }

    fn guarded_table() -> Arc<RouteTable> {
        let mut table = RouteTable::new();
        table.register(
            ResourceDef::new("admin").method(
                MethodDef::get(|_| async { Ok(Reply::ok()) })
                    .authorize(AuthRule::roles(&["admin"])),
            ),
            None,
        );
        table.register(
            ResourceDef::new("open").method(MethodDef::get(|_| async { Ok(Reply::ok()) })),
            None,
        );
        table.register(
            ResourceDef::new("insider").method(
                MethodDef::get(|_| async { Ok(Reply::ok()) })
                    .authorize(AuthRule::policy("staff")),
            ),
            None,
        );
        Arc::new(table)
    }

    fn stage() -> IdentityStage {
        let mut policies: PolicyMap = HashMap::new();
        policies.insert(
            "staff".to_string(),
            Arc::new(|identity: &dyn Identity| identity.key().starts_with("alice")),
        );
        IdentityStage::new(Arc::new(StaticTokens), Arc::new(policies))
    }

    async fn run(path: &str, header: Option<&str>) -> Result<Reply, HttpError> {
        let mut builder = HttpRequest::builder().method(Method::GET).path(path);
        if let Some(value) = header {
            builder = builder.header("authorization", value);
        }
        let request = builder.build();
        let scope = Scope::new(Arc::new(ServiceRegistry::new()));
        let mut ex = Exchange::new(request, scope, guarded_table());
        let tail: Vec<Arc<dyn Responder>> = vec![Arc::new(Echo)];
        stage().respond(&mut ex, Next::new(&tail)).await
    }

    #[tokio::test]
    async fn anonymous_route_passes_without_token() {
        assert!(run("/open", None).await.is_ok());
    }

    #[tokio::test]
    async fn guarded_route_requires_identity() {
        let err = run("/admin", None).await.unwrap_err();
        assert!(matches!(err, HttpError::Unauthorized));
    }

    #[tokio::test]
    async fn invalid_token_rejected_everywhere() {
        let err = run("/open", Some("Bearer bogus")).await.unwrap_err();
        assert!(matches!(err, HttpError::Unauthorized));
    }

    #[tokio::test]
    async fn role_grants_access() {
        assert!(run("/admin", Some("Bearer admin-token")).await.is_ok());
    }

    #[tokio::test]
    async fn wrong_role_is_forbidden() {
        let err = run("/admin", Some("Bearer user-token")).await.unwrap_err();
        assert!(matches!(err, HttpError::Forbidden(_)));
    }

    #[tokio::test]
    async fn policy_predicate_enforced() {
        assert!(run("/insider", Some("Bearer admin-token")).await.is_ok());
        let err = run("/insider", Some("Bearer user-token")).await.unwrap_err();
        assert!(matches!(err, HttpError::Forbidden(_)));
    }

    #[tokio::test]
    async fn identity_lands_in_the_scope() {
        let reply = run("/open", Some("Bearer admin-token")).await.unwrap();
        match reply.payload() {
            crate::http::Payload::Text(text) => assert_eq!(text, "alice"),
            _ => panic!("expected text"),
        }
    }
}
