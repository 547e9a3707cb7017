use std::sync::Arc;

use hostel_core::codec::{Fields, FieldsError, FromFields};
use hostel_core::http::HttpRequest;
use hostel_core::routing::{BodySpec, MethodDef, ParamSpec, ResourceDef};
use hostel_core::validate::{FieldRule, Schema};
use hostel_core::{
    AppOptions, AuthRule, BasicIdentity, CallArgs, Engine, HealthProbe, HealthStatus, Identity,
    Reply, TokenManager,
};
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};

fn request(method: Method, path: &str) -> HttpRequest {
    HttpRequest::builder().method(method).path(path).build()
}

fn test_resource() -> ResourceDef {
    #[derive(Serialize)]
    struct Message {
        id: i64,
        message: &'static str,
    }

    ResourceDef::new("test")
        .method(
            MethodDef::get(|args: CallArgs| async move {
                let i: i64 = args.arg(0)?;
                Ok(Reply::text(format!("GET/{i}")))
            })
            .param(ParamSpec::int("i")),
        )
        .method(
            MethodDef::get(|_| async {
                Reply::value(&Message {
                    id: 12,
                    message: "Test",
                })
            })
            .route("/object"),
        )
}

fn engine() -> Engine {
    let options = AppOptions::builder()
        .use_resource(test_resource())
        .unwrap()
        .build();
    Engine::new(options).unwrap()
}

// ── Scenario: route match with integer capture ──────────────────────────

#[tokio::test]
async fn get_with_integer_capture() {
    let response = engine().handle(request(Method::GET, "/test/7")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body_text(), "GET/7");
    assert_eq!(response.header("content-type"), Some("text/plain"));
}

// ── Scenario: method not allowed ────────────────────────────────────────

#[tokio::test]
async fn delete_on_get_only_route_is_405_with_empty_body() {
    let response = engine().handle(request(Method::DELETE, "/test/7")).await;
    assert_eq!(response.status, StatusCode::METHOD_NOT_ALLOWED);
    assert!(response.body.is_empty());
}

// ── Scenario: content negotiation ───────────────────────────────────────

#[tokio::test]
async fn object_negotiates_to_json() {
    let request = HttpRequest::builder()
        .method(Method::GET)
        .path("/test/object")
        .header("accept", "application/json")
        .build();
    let response = engine().handle(request).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("content-type"), Some("application/json"));
    assert_eq!(response.body_text(), r#"{"id":12,"message":"Test"}"#);
}

#[tokio::test]
async fn unsatisfiable_accept_is_406() {
    let request = HttpRequest::builder()
        .method(Method::GET)
        .path("/test/object")
        .header("accept", "text/csv")
        .build();
    let response = engine().handle(request).await;
    assert_eq!(response.status, StatusCode::NOT_ACCEPTABLE);
}

// ── Scenario: validation failure ────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct InvalidTestObject {
    invalid: Option<String>,
}

impl FromFields for InvalidTestObject {
    fn from_fields(fields: &mut Fields) -> Result<Self, FieldsError> {
        Ok(InvalidTestObject {
            invalid: fields.take_text_opt("invalid"),
        })
    }
}

#[tokio::test]
async fn null_constrained_field_yields_the_error_set_body() {
    let resource = ResourceDef::new("test").method(
        MethodDef::patch(|_| async { Ok(Reply::ok()) })
            .route("/invalid")
            .param(ParamSpec::body(
                BodySpec::of::<InvalidTestObject>("value")
                    .with_schema(Schema::new().rule(FieldRule::new("invalid").not_null())),
            )),
    );
    let options = AppOptions::builder().use_resource(resource).unwrap().build();
    let engine = Engine::new(options).unwrap();

    let request = HttpRequest::builder()
        .method(Method::PATCH)
        .path("/test/invalid")
        .header("content-type", "application/json")
        .header("accept", "application/json")
        .body(&br#"{"invalid":null}"#[..])
        .build();
    let response = engine.handle(request).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        response.body_text(),
        r#"{"errors":[{"path":"value.invalid","message":"must not be null","invalidValue":"null"}]}"#
    );
}

// ── Favicon stage ───────────────────────────────────────────────────────

#[tokio::test]
async fn unrouted_favicon_serves_the_bundled_icon() {
    let response = engine().handle(request(Method::GET, "/favicon.ico")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("content-type"), Some("image/x-icon"));
    assert!(!response.body.is_empty());
}

// ── Health stage ────────────────────────────────────────────────────────

struct IStoreService;

impl HealthProbe for IStoreService {
    fn status(&self) -> HealthStatus {
        HealthStatus::Ok
    }
}

#[tokio::test]
async fn health_endpoint_reports_app_and_services() {
    let options = AppOptions::builder()
        .app_name("bookshop")
        .unwrap()
        .use_health("/health")
        .unwrap()
        .use_probe(IStoreService)
        .unwrap()
        .use_resource(test_resource())
        .unwrap()
        .build();
    let engine = Engine::new(options).unwrap();
    let response = engine.handle(request(Method::GET, "/health")).await;
    assert_eq!(response.status, StatusCode::OK);
    let report: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(report["app"], "bookshop");
    assert_eq!(report["status"], "OK");
    assert_eq!(report["services"]["store"], "OK");
    assert!(report["uptime"].is_u64());
    assert!(report["memory"].is_u64());
}

// ── Static files stage ──────────────────────────────────────────────────

#[tokio::test]
async fn static_files_served_under_prefix() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("site.css"), "body{}").unwrap();
    let options = AppOptions::builder()
        .use_static_files("/assets", dir.path())
        .unwrap()
        .build();
    let engine = Engine::new(options).unwrap();

    let response = engine.handle(request(Method::GET, "/assets/site.css")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("content-type"), Some("text/css"));
    assert_eq!(response.body_text(), "body{}");

    let missing = engine.handle(request(Method::GET, "/assets/nope.css")).await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}

// ── Identity stage ──────────────────────────────────────────────────────

struct OneToken;

impl TokenManager for OneToken {
    fn authenticate(&self, token: &str) -> Option<Arc<dyn Identity>> {
        (token == "letmein").then(|| Arc::new(BasicIdentity::new("alice", &["admin"])) as _)
    }
}

fn guarded_engine() -> Engine {
    let resource = ResourceDef::new("vault").method(
        MethodDef::get(|_| async { Ok(Reply::text("secrets")) })
            .authorize(AuthRule::roles(&["admin"])),
    );
    let options = AppOptions::builder()
        .use_resource(resource)
        .unwrap()
        .use_identity(Arc::new(OneToken), Default::default())
        .unwrap()
        .build();
    Engine::new(options).unwrap()
}

#[tokio::test]
async fn missing_token_is_401_with_challenge() {
    let response = guarded_engine().handle(request(Method::GET, "/vault")).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.header("www-authenticate"), Some("Bearer"));
}

#[tokio::test]
async fn valid_token_reaches_the_handler() {
    let request = HttpRequest::builder()
        .method(Method::GET)
        .path("/vault")
        .header("authorization", "Bearer letmein")
        .build();
    let response = guarded_engine().handle(request).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body_text(), "secrets");
}

// ── Custom responder stages ─────────────────────────────────────────────

struct StampHeader;

impl hostel_core::Responder for StampHeader {
    fn respond<'a>(
        &'a self,
        exchange: &'a mut hostel_core::Exchange,
        next: hostel_core::Next<'a>,
    ) -> hostel_core::RespondFuture<'a> {
        Box::pin(async move {
            let reply = next.run(exchange).await?;
            Ok(reply.with_header("x-stage", "custom"))
        })
    }
}

#[tokio::test]
async fn custom_stage_wraps_inner_result() {
    let options = AppOptions::builder()
        .use_resource(test_resource())
        .unwrap()
        .use_responder(StampHeader)
        .unwrap()
        .build();
    let engine = Engine::new(options).unwrap();
    let response = engine.handle(request(Method::GET, "/test/7")).await;
    assert_eq!(response.header("x-stage"), Some("custom"));
    assert_eq!(response.body_text(), "GET/7");
}

// ── Standard headers ────────────────────────────────────────────────────

#[tokio::test]
async fn every_response_carries_type_length_and_date() {
    for (method, path) in [
        (Method::GET, "/test/7"),
        (Method::GET, "/absent"),
        (Method::DELETE, "/test/7"),
    ] {
        let response = engine().handle(request(method, path)).await;
        assert!(response.header("content-type").is_some());
        assert!(response.header("content-length").is_some());
        assert!(response.header("date").is_some());
    }
}
