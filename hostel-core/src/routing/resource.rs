use std::any::{Any, TypeId};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use http::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::codec::{Decoded, FromFields};
use crate::error::HttpError;
use crate::http::Reply;
use crate::identity::AuthRule;
use crate::jobs::Rejection;
use crate::services::Scope;
use crate::validate::{Schema, Violation};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// The type-erased callable behind an endpoint.
pub type Handler = Arc<dyn Fn(CallArgs) -> BoxFuture<Result<Reply, HttpError>> + Send + Sync>;

/// A method-level rule spanning several bound parameters.
pub type CrossCheck = Arc<dyn Fn(&CallArgs) -> Option<Violation> + Send + Sync>;

// ── Parameter specs ─────────────────────────────────────────────────────────

/// How one declared parameter is typed and bound.
#[derive(Clone)]
pub enum ParamKind {
    /// An integer path variable with optional numeric bounds.
    Int { min: Option<i64>, max: Option<i64> },
    /// A string path variable with length bounds or an embedded pattern.
    Text {
        min_len: Option<usize>,
        max_len: Option<usize>,
        pattern: Option<String>,
    },
    /// A UUID path variable in fixed hex-dash form.
    Uuid,
    /// A string path variable checked against a closed variant set.
    Enum { variants: &'static [&'static str] },
    /// A trailing variable matching the remaining path segments.
    CatchAll { non_empty: bool },
    /// Bound from the query multimap, never from the path.
    Query { multi: bool },
    /// The method's single content body, decoded through the serializer
    /// registry.
    Body(BodySpec),
}

/// A declared constructor or method parameter.
#[derive(Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub optional: bool,
}

impl ParamSpec {
    pub fn int(name: &'static str) -> ParamSpec {
        ParamSpec {
            name,
            kind: ParamKind::Int {
                min: None,
                max: None,
            },
            optional: false,
        }
    }

    pub fn int_bounded(name: &'static str, min: Option<i64>, max: Option<i64>) -> ParamSpec {
        ParamSpec {
            name,
            kind: ParamKind::Int { min, max },
            optional: false,
        }
    }

    pub fn text(name: &'static str) -> ParamSpec {
        ParamSpec {
            name,
            kind: ParamKind::Text {
                min_len: None,
                max_len: None,
                pattern: None,
            },
            optional: false,
        }
    }

    pub fn text_sized(name: &'static str, min_len: Option<usize>, max_len: Option<usize>) -> ParamSpec {
        ParamSpec {
            name,
            kind: ParamKind::Text {
                min_len,
                max_len,
                pattern: None,
            },
            optional: false,
        }
    }

    pub fn text_pattern(name: &'static str, pattern: &str) -> ParamSpec {
        ParamSpec {
            name,
            kind: ParamKind::Text {
                min_len: None,
                max_len: None,
                pattern: Some(pattern.to_string()),
            },
            optional: false,
        }
    }

    pub fn uuid(name: &'static str) -> ParamSpec {
        ParamSpec {
            name,
            kind: ParamKind::Uuid,
            optional: false,
        }
    }

    pub fn enumerated(name: &'static str, variants: &'static [&'static str]) -> ParamSpec {
        ParamSpec {
            name,
            kind: ParamKind::Enum { variants },
            optional: false,
        }
    }

    pub fn catch_all(name: &'static str) -> ParamSpec {
        ParamSpec {
            name,
            kind: ParamKind::CatchAll { non_empty: false },
            optional: false,
        }
    }

    pub fn catch_all_non_empty(name: &'static str) -> ParamSpec {
        ParamSpec {
            name,
            kind: ParamKind::CatchAll { non_empty: true },
            optional: false,
        }
    }

    pub fn query(name: &'static str) -> ParamSpec {
        ParamSpec {
            name,
            kind: ParamKind::Query { multi: false },
            optional: false,
        }
    }

    pub fn query_multi(name: &'static str) -> ParamSpec {
        ParamSpec {
            name,
            kind: ParamKind::Query { multi: true },
            optional: false,
        }
    }

    pub fn body(spec: BodySpec) -> ParamSpec {
        ParamSpec {
            name: spec.name,
            kind: ParamKind::Body(spec),
            optional: false,
        }
    }

    pub fn optional(mut self) -> ParamSpec {
        self.optional = true;
        self
    }

    /// Whether this parameter can be bound from a path segment.
    pub fn is_path_bindable(&self) -> bool {
        !matches!(self.kind, ParamKind::Query { .. } | ParamKind::Body(_))
    }
}

// ── Body specs ──────────────────────────────────────────────────────────────

/// A decoded, type-erased body value.
pub type BodyValue = Box<dyn Any + Send>;

/// How the single content-body parameter of a method decodes and validates.
#[derive(Clone)]
pub struct BodySpec {
    pub name: &'static str,
    pub type_id: TypeId,
    pub type_name: &'static str,
    /// Whether the raw request bytes are handed over without a codec.
    raw: bool,
    decode: Arc<dyn Fn(Decoded) -> Result<BodyValue, HttpError> + Send + Sync>,
    snapshot: Arc<dyn Fn(&BodyValue) -> Option<serde_json::Value> + Send + Sync>,
    pub schema: Option<Arc<Schema>>,
}

impl BodySpec {
    /// A typed body: decoded through serde for tree-shaped codecs (JSON,
    /// XML via fields) and through [`FromFields`] for form-shaped ones.
    pub fn of<T>(name: &'static str) -> BodySpec
    where
        T: DeserializeOwned + FromFields + Serialize + Send + 'static,
    {
        BodySpec {
            name,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            raw: false,
            decode: Arc::new(|decoded| {
                let value: T = match decoded {
                    Decoded::Value(tree) => serde_json::from_value(tree)
                        .map_err(|e| HttpError::BadRequest(e.to_string()))?,
                    Decoded::Fields(mut fields) => T::from_fields(&mut fields)?,
                };
                Ok(Box::new(value) as BodyValue)
            }),
            snapshot: Arc::new(|boxed| {
                boxed
                    .downcast_ref::<T>()
                    .and_then(|v| serde_json::to_value(v).ok())
            }),
            schema: None,
        }
    }

    /// A raw byte-stream body: the request bytes are passed through without
    /// any codec.
    pub fn bytes(name: &'static str) -> BodySpec {
        BodySpec {
            name,
            type_id: TypeId::of::<bytes::Bytes>(),
            type_name: std::any::type_name::<bytes::Bytes>(),
            raw: true,
            decode: Arc::new(|_| {
                Err(HttpError::Internal(
                    "raw bodies are not decoded through a codec".to_string(),
                ))
            }),
            snapshot: Arc::new(|_| None),
            schema: None,
        }
    }

    /// Attach a validation schema evaluated before the method is invoked.
    pub fn with_schema(mut self, schema: Schema) -> BodySpec {
        self.schema = Some(Arc::new(schema));
        self
    }

    pub fn is_raw(&self) -> bool {
        self.raw
    }

    pub fn decode(&self, decoded: Decoded) -> Result<BodyValue, HttpError> {
        (self.decode)(decoded)
    }

    /// The body's serde representation, for validation.
    pub fn snapshot(&self, value: &BodyValue) -> Option<serde_json::Value> {
        (self.snapshot)(value)
    }
}

// ── Bound arguments ─────────────────────────────────────────────────────────

/// One bound argument, produced by route matching and body decoding.
pub enum ArgValue {
    Int(i64),
    Text(String),
    Uuid(Uuid),
    Many(Vec<String>),
    Body(BodyValue),
    Missing,
}

impl std::fmt::Debug for ArgValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgValue::Int(v) => write!(f, "Int({v})"),
            ArgValue::Text(v) => write!(f, "Text({v:?})"),
            ArgValue::Uuid(v) => write!(f, "Uuid({v})"),
            ArgValue::Many(v) => write!(f, "Many({v:?})"),
            ArgValue::Body(_) => write!(f, "Body(..)"),
            ArgValue::Missing => write!(f, "Missing"),
        }
    }
}

/// Conversion from a bound argument into a handler-facing type.
pub trait FromArg: Sized {
    fn from_arg(value: &ArgValue) -> Option<Self>;
}

impl FromArg for i64 {
    fn from_arg(value: &ArgValue) -> Option<Self> {
        match value {
            ArgValue::Int(v) => Some(*v),
            ArgValue::Text(v) => v.parse().ok(),
            _ => None,
        }
    }
}

impl FromArg for i32 {
    fn from_arg(value: &ArgValue) -> Option<Self> {
        i64::from_arg(value).and_then(|v| v.try_into().ok())
    }
}

impl FromArg for u64 {
    fn from_arg(value: &ArgValue) -> Option<Self> {
        i64::from_arg(value).and_then(|v| v.try_into().ok())
    }
}

impl FromArg for u32 {
    fn from_arg(value: &ArgValue) -> Option<Self> {
        i64::from_arg(value).and_then(|v| v.try_into().ok())
    }
}

impl FromArg for usize {
    fn from_arg(value: &ArgValue) -> Option<Self> {
        i64::from_arg(value).and_then(|v| v.try_into().ok())
    }
}

impl FromArg for bool {
    fn from_arg(value: &ArgValue) -> Option<Self> {
        match value {
            ArgValue::Text(v) => v.parse().ok(),
            ArgValue::Int(v) => Some(*v != 0),
            _ => None,
        }
    }
}

impl FromArg for String {
    fn from_arg(value: &ArgValue) -> Option<Self> {
        match value {
            ArgValue::Text(v) => Some(v.clone()),
            ArgValue::Int(v) => Some(v.to_string()),
            ArgValue::Uuid(v) => Some(v.to_string()),
            ArgValue::Many(v) => Some(v.join(",")),
            _ => None,
        }
    }
}

impl FromArg for Uuid {
    fn from_arg(value: &ArgValue) -> Option<Self> {
        match value {
            ArgValue::Uuid(v) => Some(*v),
            ArgValue::Text(v) => v.parse().ok(),
            _ => None,
        }
    }
}

impl FromArg for Vec<String> {
    fn from_arg(value: &ArgValue) -> Option<Self> {
        match value {
            ArgValue::Many(v) => Some(v.clone()),
            ArgValue::Text(v) => Some(vec![v.clone()]),
            _ => None,
        }
    }
}

/// Everything a handler needs for one invocation: the bound arguments and
/// the request scope.
pub struct CallArgs {
    args: Vec<ArgValue>,
    scope: Scope,
}

impl CallArgs {
    pub fn new(args: Vec<ArgValue>, scope: Scope) -> CallArgs {
        CallArgs { args, scope }
    }

    /// A required argument by declared position.
    pub fn arg<T: FromArg>(&self, index: usize) -> Result<T, HttpError> {
        match self.args.get(index) {
            None | Some(ArgValue::Missing) => Err(HttpError::BadRequest(format!(
                "missing argument at position {index}"
            ))),
            Some(value) => T::from_arg(value).ok_or_else(|| {
                HttpError::BadRequest(format!("argument at position {index} has the wrong shape"))
            }),
        }
    }

    /// An optional argument by declared position.
    pub fn opt_arg<T: FromArg>(&self, index: usize) -> Result<Option<T>, HttpError> {
        match self.args.get(index) {
            None | Some(ArgValue::Missing) => Ok(None),
            Some(value) => T::from_arg(value)
                .map(Some)
                .ok_or_else(|| {
                    HttpError::BadRequest(format!(
                        "argument at position {index} has the wrong shape"
                    ))
                }),
        }
    }

    /// Take the decoded content body, downcasting to its declared type.
    pub fn body<T: Send + 'static>(&mut self) -> Result<T, HttpError> {
        let slot = self
            .args
            .iter_mut()
            .find(|a| matches!(a, ArgValue::Body(_)))
            .ok_or_else(|| HttpError::BadRequest("no content body was bound".to_string()))?;
        let ArgValue::Body(boxed) = std::mem::replace(slot, ArgValue::Missing) else {
            unreachable!()
        };
        boxed.downcast::<T>().map(|b| *b).map_err(|_| {
            HttpError::Internal("content body downcast to an unexpected type".to_string())
        })
    }

    /// Resolve a registered service from the request scope.
    pub fn service<T: Clone + Send + Sync + 'static>(&self) -> Result<T, HttpError> {
        Ok(self.scope.resolve::<T>()?)
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn raw(&self) -> &[ArgValue] {
        &self.args
    }
}

// ── Method definitions ──────────────────────────────────────────────────────

/// One endpoint-backing method: verb, parameter specs, policies, and the
/// handler closure. A plain value record, assembled by the registration DSL.
#[derive(Clone)]
pub struct MethodDef {
    pub verb: Method,
    pub name: &'static str,
    /// Custom route suffix under the resource base; derived from parameter
    /// positions when absent.
    pub route: Option<String>,
    pub params: Vec<ParamSpec>,
    /// When set, the method runs deferred under this rejection rule.
    pub deferred: Option<Rejection>,
    pub auth: Option<AuthRule>,
    pub return_schema: Option<Arc<Schema>>,
    pub cross_checks: Vec<CrossCheck>,
    pub handler: Handler,
}

impl MethodDef {
    pub fn new<F, Fut>(verb: Method, name: &'static str, handler: F) -> MethodDef
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, HttpError>> + Send + 'static,
    {
        MethodDef {
            verb,
            name,
            route: None,
            params: Vec::new(),
            deferred: None,
            auth: None,
            return_schema: None,
            cross_checks: Vec::new(),
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }

    pub fn get<F, Fut>(handler: F) -> MethodDef
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, HttpError>> + Send + 'static,
    {
        MethodDef::new(Method::GET, "get", handler)
    }

    pub fn post<F, Fut>(handler: F) -> MethodDef
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, HttpError>> + Send + 'static,
    {
        MethodDef::new(Method::POST, "post", handler)
    }

    pub fn put<F, Fut>(handler: F) -> MethodDef
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, HttpError>> + Send + 'static,
    {
        MethodDef::new(Method::PUT, "put", handler)
    }

    pub fn patch<F, Fut>(handler: F) -> MethodDef
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, HttpError>> + Send + 'static,
    {
        MethodDef::new(Method::PATCH, "patch", handler)
    }

    pub fn delete<F, Fut>(handler: F) -> MethodDef
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, HttpError>> + Send + 'static,
    {
        MethodDef::new(Method::DELETE, "delete", handler)
    }

    pub fn options<F, Fut>(handler: F) -> MethodDef
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, HttpError>> + Send + 'static,
    {
        MethodDef::new(Method::OPTIONS, "options", handler)
    }

    /// Override the route suffix under the resource base path.
    pub fn route(mut self, route: impl Into<String>) -> MethodDef {
        self.route = Some(route.into());
        self
    }

    pub fn param(mut self, spec: ParamSpec) -> MethodDef {
        self.params.push(spec);
        self
    }

    /// Run this method deferred, deduplicated under the given rule.
    pub fn deferred(mut self, rule: Rejection) -> MethodDef {
        self.deferred = Some(rule);
        self
    }

    /// Run this method deferred under the application's default rule.
    pub fn deferred_default(self) -> MethodDef {
        self.deferred(Rejection::Default)
    }

    pub fn authorize(mut self, rule: AuthRule) -> MethodDef {
        self.auth = Some(rule);
        self
    }

    /// Validate the return value against this schema after invocation.
    pub fn returning(mut self, schema: Schema) -> MethodDef {
        self.return_schema = Some(Arc::new(schema));
        self
    }

    /// Add a rule spanning several bound parameters, evaluated before
    /// invocation.
    pub fn cross_check(
        mut self,
        check: impl Fn(&CallArgs) -> Option<Violation> + Send + Sync + 'static,
    ) -> MethodDef {
        self.cross_checks.push(Arc::new(check));
        self
    }

    /// The method's single content-body spec, if it declares one.
    pub fn body_spec(&self) -> Option<&BodySpec> {
        self.params.iter().find_map(|p| match &p.kind {
            ParamKind::Body(spec) => Some(spec),
            _ => None,
        })
    }
}

// ── Resource definitions ────────────────────────────────────────────────────

/// A resource: the value record a user type compiles into. Carries the
/// derived route name, constructor parameters, and the endpoint methods.
#[derive(Clone)]
pub struct ResourceDef {
    pub name: String,
    pub type_name: String,
    pub ctor_params: Vec<ParamSpec>,
    pub methods: Vec<MethodDef>,
}

impl ResourceDef {
    /// A resource rooted at an explicit path segment.
    pub fn new(name: impl Into<String>) -> ResourceDef {
        let name = name.into();
        ResourceDef {
            type_name: name.clone(),
            name,
            ctor_params: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// A resource whose route segment derives from the type name:
    /// lowercased, split on case boundaries, `_resource` suffix stripped.
    pub fn of<T: 'static>() -> ResourceDef {
        let type_name = std::any::type_name::<T>();
        ResourceDef {
            name: derive_route_name(type_name),
            type_name: type_name.to_string(),
            ctor_params: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Declare a constructor parameter. Path-bindable constructor parameters
    /// occupy positions before every method's own parameters.
    pub fn ctor_param(mut self, spec: ParamSpec) -> ResourceDef {
        self.ctor_params.push(spec);
        self
    }

    pub fn method(mut self, method: MethodDef) -> ResourceDef {
        self.methods.push(method);
        self
    }

    /// Select the single method with the given name, bind `extra` arguments
    /// into its parameter positions, and call it.
    ///
    /// Fails when zero or more than one method carries the name.
    pub fn invoke_by_name(
        &self,
        scope: &Scope,
        name: &str,
        extra: Vec<ArgValue>,
    ) -> Result<BoxFuture<Result<Reply, HttpError>>, HttpError> {
        let mut found = self.methods.iter().filter(|m| m.name == name);
        let method = found
            .next()
            .ok_or_else(|| HttpError::Internal(format!("no method named '{name}'")))?;
        if found.next().is_some() {
            return Err(HttpError::Internal(format!(
                "method name '{name}' is ambiguous"
            )));
        }
        let args = CallArgs::new(extra, scope.clone());
        Ok((method.handler)(args))
    }

    /// All parameters in binding order: constructor first, then the given
    /// method's.
    pub fn combined_params(&self, method: &MethodDef) -> Vec<ParamSpec> {
        let mut params = self.ctor_params.clone();
        params.extend(method.params.iter().cloned());
        params
    }
}

/// Derive a route segment from a Rust type name: the last path segment is
/// lowercased, split on case boundaries with underscores, and a trailing
/// `_resource` is stripped.
pub fn derive_route_name(type_name: &str) -> String {
    let simple = type_name.rsplit("::").next().unwrap_or(type_name);
    let mut out = String::with_capacity(simple.len() + 4);
    for (i, c) in simple.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out.strip_suffix("_resource").unwrap_or(&out).to_string()
}
