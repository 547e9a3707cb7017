use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use http::Method;
use uuid::Uuid;

use super::pattern::{Part, PatternError, RoutePattern};
use super::resource::{ArgValue, MethodDef, ParamKind, ParamSpec, ResourceDef};
use crate::http::HttpRequest;

// ── Registration results ────────────────────────────────────────────────────

/// Why one method failed to register. Failures accumulate per resource and
/// never abort unrelated registrations.
#[derive(Clone)]
pub enum RegisterError {
    Pattern(PatternError),
    /// A second registration for an already-taken `(pattern, verb)` pair.
    DuplicateMethod { route: String, verb: Method },
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterError::Pattern(err) => write!(f, "{err}"),
            RegisterError::DuplicateMethod { route, verb } => {
                write!(f, "duplicate method: {verb} {route} is already registered")
            }
        }
    }
}

impl fmt::Debug for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

impl std::error::Error for RegisterError {}

impl From<PatternError> for RegisterError {
    fn from(err: PatternError) -> Self {
        RegisterError::Pattern(err)
    }
}

/// The outcome of registering one method of a resource.
pub struct RouteEntry {
    pub route: String,
    pub verb: Method,
    pub method: &'static str,
    pub outcome: Result<(), RegisterError>,
}

// ── Endpoints and matches ───────────────────────────────────────────────────

/// `(pattern, verb) → callable binding`: the resource and the index of the
/// method backing this verb.
#[derive(Clone)]
pub struct Endpoint {
    pub resource: Arc<ResourceDef>,
    method_index: usize,
}

impl Endpoint {
    pub fn method(&self) -> &MethodDef {
        &self.resource.methods[self.method_index]
    }
}

/// A successful match: the endpoint plus the arguments bound from the path
/// and query. The content-body position (if any) is left `Missing` for the
/// invoke stage to fill.
pub struct Binding {
    pub endpoint: Endpoint,
    pub args: Vec<ArgValue>,
    /// The canonical pattern text that matched, e.g. `/test/{0}`.
    pub route: String,
}

/// The total result of matching a request against the table.
pub enum RouteMatch {
    Success(Binding),
    NotFound,
    /// The path matched at least one pattern, none with this verb.
    MethodNotAllowed(Vec<Method>),
    /// The path and verb matched but a captured value failed conversion.
    BadRequest(String),
}

impl fmt::Debug for RouteMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteMatch::Success(b) => write!(f, "Success({})", b.route),
            RouteMatch::NotFound => write!(f, "NotFound"),
            RouteMatch::MethodNotAllowed(v) => write!(f, "MethodNotAllowed({v:?})"),
            RouteMatch::BadRequest(msg) => write!(f, "BadRequest({msg})"),
        }
    }
}

// ── Reverse lookup ──────────────────────────────────────────────────────────

#[derive(Clone)]
pub enum ReverseError {
    UnknownMethod { resource: String, method: String },
    ArgumentCount { expected: usize, found: usize },
}

impl fmt::Display for ReverseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReverseError::UnknownMethod { resource, method } => {
                write!(f, "no method '{method}' registered for '{resource}'")
            }
            ReverseError::ArgumentCount { expected, found } => {
                write!(f, "reverse lookup needs {expected} argument(s), got {found}")
            }
        }
    }
}

impl fmt::Debug for ReverseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

impl std::error::Error for ReverseError {}

// ── Route table ─────────────────────────────────────────────────────────────

struct PatternSlot {
    pattern: RoutePattern,
    verbs: HashMap<Method, Endpoint>,
}

/// The compiled route table. Grows during startup, read-only while serving.
#[derive(Default)]
pub struct RouteTable {
    slots: Vec<PatternSlot>,
}

impl RouteTable {
    pub fn new() -> RouteTable {
        RouteTable::default()
    }

    /// Register every method of a resource, optionally under an area prefix.
    ///
    /// Returns one entry per method; a failing method leaves the rest (and
    /// all previously registered state) intact.
    pub fn register(&mut self, def: ResourceDef, area: Option<&str>) -> Vec<RouteEntry> {
        let base = match area {
            Some(area) => format!("{}/{}", area.trim_end_matches('/'), def.name),
            None => format!("/{}", def.name),
        };
        self.register_at(def, &base)
    }

    /// Register a resource at an explicit base path (used for an area's
    /// default resource, which also answers at the bare area path).
    pub fn register_at(&mut self, def: ResourceDef, base: &str) -> Vec<RouteEntry> {
        let resource = Arc::new(def);

        let mut entries = Vec::with_capacity(resource.methods.len());
        for (index, method) in resource.methods.iter().enumerate() {
            let params = resource.combined_params(method);
            let template = match &method.route {
                Some(custom) => format!("{base}{custom}"),
                None => derive_template(base, &params),
            };
            let outcome = self.register_one(&resource, index, &template, &params);
            entries.push(RouteEntry {
                route: template,
                verb: method.verb.clone(),
                method: method.name,
                outcome,
            });
        }
        self.slots
            .sort_by_key(|slot| slot.pattern.specificity_key());
        entries
    }

    fn register_one(
        &mut self,
        resource: &Arc<ResourceDef>,
        method_index: usize,
        template: &str,
        params: &[ParamSpec],
    ) -> Result<(), RegisterError> {
        let pattern = RoutePattern::compile(template, params)?;
        let verb = resource.methods[method_index].verb.clone();
        let endpoint = Endpoint {
            resource: resource.clone(),
            method_index,
        };

        match self
            .slots
            .iter_mut()
            .find(|slot| slot.pattern.signature() == pattern.signature())
        {
            Some(slot) => {
                if slot.verbs.contains_key(&verb) {
                    return Err(RegisterError::DuplicateMethod {
                        route: pattern.text().to_string(),
                        verb,
                    });
                }
                slot.verbs.insert(verb, endpoint);
            }
            None => {
                let mut verbs = HashMap::new();
                verbs.insert(verb, endpoint);
                self.slots.push(PatternSlot { pattern, verbs });
            }
        }
        Ok(())
    }

    /// Find the best endpoint for a request. Total: exactly one of the four
    /// outcomes, never a panic or an error to the caller.
    pub fn matches(&self, request: &HttpRequest) -> RouteMatch {
        let mut allowed: Vec<Method> = Vec::new();
        for slot in &self.slots {
            let Some(captures) = slot.pattern.captures(request.path()) else {
                continue;
            };
            let Some(endpoint) = slot.verbs.get(request.method()) else {
                // Path matched under another verb; keep scanning so the same
                // path can resolve under a less specific pattern.
                for verb in slot.verbs.keys() {
                    if !allowed.contains(verb) {
                        allowed.push(verb.clone());
                    }
                }
                continue;
            };

            let params = endpoint.resource.combined_params(endpoint.method());
            return match bind_args(&params, &captures, request) {
                Ok(args) => RouteMatch::Success(Binding {
                    endpoint: endpoint.clone(),
                    args,
                    route: slot.pattern.text().to_string(),
                }),
                Err(message) => RouteMatch::BadRequest(message),
            };
        }
        if allowed.is_empty() {
            RouteMatch::NotFound
        } else {
            allowed.sort_by_key(|m| m.as_str().to_string());
            RouteMatch::MethodNotAllowed(allowed)
        }
    }

    /// Every verb registered for patterns matching this path.
    pub fn allowed_verbs(&self, path: &str) -> Vec<Method> {
        let mut verbs: Vec<Method> = Vec::new();
        for slot in &self.slots {
            if slot.pattern.captures(path).is_some() {
                for verb in slot.verbs.keys() {
                    if !verbs.contains(verb) {
                        verbs.push(verb.clone());
                    }
                }
            }
        }
        verbs.sort_by_key(|m| m.as_str().to_string());
        verbs
    }

    /// Produce the URL for a `(resource, method)` pair, filling path holes
    /// from `args` in declaration order and appending declared query
    /// parameters from the remainder.
    pub fn url_for(
        &self,
        resource: &str,
        method: &str,
        args: &[&str],
    ) -> Result<String, ReverseError> {
        for slot in &self.slots {
            for endpoint in slot.verbs.values() {
                let matches_resource = endpoint.resource.name == resource
                    || endpoint.resource.type_name == resource;
                if !matches_resource || endpoint.method().name != method {
                    continue;
                }

                let params = endpoint.resource.combined_params(endpoint.method());
                let path_holes = slot
                    .pattern
                    .parts()
                    .iter()
                    .filter(|p| matches!(p, Part::Var { .. }))
                    .count();
                let query_params: Vec<&ParamSpec> = params
                    .iter()
                    .filter(|p| matches!(p.kind, ParamKind::Query { .. }))
                    .collect();
                let expected = path_holes + query_params.len();
                if args.len() != expected {
                    return Err(ReverseError::ArgumentCount {
                        expected,
                        found: args.len(),
                    });
                }

                let mut url = String::new();
                let mut next = 0usize;
                for part in slot.pattern.parts() {
                    match part {
                        Part::Literal(text) => url.push_str(text),
                        Part::Var { .. } => {
                            url.push_str(args[next]);
                            next += 1;
                        }
                    }
                }
                let mut query = form_urlencoded::Serializer::new(String::new());
                for spec in &query_params {
                    query.append_pair(spec.name, args[next]);
                    next += 1;
                }
                let query = query.finish();
                if !query.is_empty() {
                    url.push('?');
                    url.push_str(&query);
                }
                return Ok(url);
            }
        }
        Err(ReverseError::UnknownMethod {
            resource: resource.to_string(),
            method: method.to_string(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// The derived template for a method without a route override: the resource
/// base plus one hole per path-bindable parameter, in declaration order.
fn derive_template(base: &str, params: &[ParamSpec]) -> String {
    let mut template = base.to_string();
    for (index, spec) in params.iter().enumerate() {
        if spec.is_path_bindable() {
            template.push_str(&format!("/{{{index}}}"));
        }
    }
    template
}

/// Convert path captures and query values into bound arguments.
fn bind_args(
    params: &[ParamSpec],
    captures: &regex::Captures<'_>,
    request: &HttpRequest,
) -> Result<Vec<ArgValue>, String> {
    let query = request.query_params();
    let mut args = Vec::with_capacity(params.len());
    for (index, spec) in params.iter().enumerate() {
        let value = match &spec.kind {
            ParamKind::Query { multi } => match query.get(spec.name) {
                Some(values) if *multi => ArgValue::Many(values.clone()),
                // Multi-valued input into a scalar target collapses with
                // commas; documented as intentionally lossy.
                Some(values) => ArgValue::Text(values.join(",")),
                None if spec.optional => ArgValue::Missing,
                None => return Err(format!("missing query parameter '{}'", spec.name)),
            },
            ParamKind::Body(_) => ArgValue::Missing,
            ParamKind::Int { min, max } => {
                let raw = capture_text(captures, index, spec.name)?;
                let parsed: i64 = raw
                    .parse()
                    .map_err(|_| format!("parameter '{}' is not an integer", spec.name))?;
                if min.map_or(false, |m| parsed < m) || max.map_or(false, |m| parsed > m) {
                    return Err(format!("parameter '{}' is out of range", spec.name));
                }
                ArgValue::Int(parsed)
            }
            ParamKind::Text { .. } => {
                ArgValue::Text(capture_text(captures, index, spec.name)?.to_string())
            }
            ParamKind::Uuid => {
                let raw = capture_text(captures, index, spec.name)?;
                let parsed: Uuid = raw
                    .parse()
                    .map_err(|_| format!("parameter '{}' is not a UUID", spec.name))?;
                ArgValue::Uuid(parsed)
            }
            ParamKind::Enum { variants } => {
                let raw = capture_text(captures, index, spec.name)?;
                if !variants.contains(&raw) {
                    return Err(format!(
                        "parameter '{}' must be one of {variants:?}",
                        spec.name
                    ));
                }
                ArgValue::Text(raw.to_string())
            }
            ParamKind::CatchAll { .. } => {
                let raw = capture_text(captures, index, spec.name)?;
                let segments: Vec<String> = raw
                    .split('/')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                ArgValue::Many(segments)
            }
        };
        args.push(value);
    }
    Ok(args)
}

fn capture_text<'t>(
    captures: &regex::Captures<'t>,
    index: usize,
    name: &str,
) -> Result<&'t str, String> {
    captures
        .name(&format!("p{index}"))
        .map(|m| m.as_str())
        .ok_or_else(|| format!("parameter '{name}' was not captured"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HttpError;
    use crate::http::Reply;
    use crate::routing::resource::CallArgs;

    fn echo_resource() -> ResourceDef {
        ResourceDef::new("test")
            .method(
                MethodDef::get(|args: CallArgs| async move {
                    let i: i64 = args.arg(0)?;
                    Ok(Reply::text(format!("GET/{i}")))
                })
                .param(ParamSpec::int("i")),
            )
            .method(
                MethodDef::post(|_| async { Ok(Reply::ok()) }).param(ParamSpec::int("i")),
            )
    }

    fn get_request(path: &str) -> HttpRequest {
        HttpRequest::builder().method(Method::GET).path(path).build()
    }

    #[test]
    fn register_reports_per_method_outcomes() {
        let mut table = RouteTable::new();
        let entries = table.register(echo_resource(), None);
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.outcome.is_ok()));
        assert_eq!(entries[0].route, "/test/{0}");
    }

    #[test]
    fn duplicate_pattern_verb_rejected_without_corruption() {
        let mut table = RouteTable::new();
        table.register(echo_resource(), None);

        let again = ResourceDef::new("test").method(
            MethodDef::get(|_| async { Ok(Reply::text("other")) }).param(ParamSpec::int("x")),
        );
        let entries = table.register(again, None);
        assert!(matches!(
            entries[0].outcome,
            Err(RegisterError::DuplicateMethod { .. })
        ));

        // The original endpoint still answers.
        match table.matches(&get_request("/test/7")) {
            RouteMatch::Success(binding) => {
                assert!(matches!(binding.args[0], ArgValue::Int(7)))
            }
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[test]
    fn match_binds_integer_capture() {
        let mut table = RouteTable::new();
        table.register(echo_resource(), None);
        match table.matches(&get_request("/test/7")) {
            RouteMatch::Success(binding) => {
                assert_eq!(binding.route, "/test/{0}");
                assert!(matches!(binding.args[0], ArgValue::Int(7)));
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn unmatched_path_is_not_found() {
        let mut table = RouteTable::new();
        table.register(echo_resource(), None);
        assert!(matches!(
            table.matches(&get_request("/missing")),
            RouteMatch::NotFound
        ));
    }

    #[test]
    fn wrong_verb_is_method_not_allowed() {
        let mut table = RouteTable::new();
        table.register(echo_resource(), None);
        let request = HttpRequest::builder()
            .method(Method::DELETE)
            .path("/test/7")
            .build();
        match table.matches(&request) {
            RouteMatch::MethodNotAllowed(allowed) => {
                assert!(allowed.contains(&Method::GET));
                assert!(allowed.contains(&Method::POST));
            }
            other => panic!("expected 405, got {other:?}"),
        }
    }

    #[test]
    fn more_literal_pattern_wins() {
        let mut table = RouteTable::new();
        table.register(echo_resource(), None);
        let special = ResourceDef::new("test").method(
            MethodDef::get(|_| async { Ok(Reply::text("object")) }).route("/object"),
        );
        table.register(special, None);

        match table.matches(&get_request("/test/object")) {
            RouteMatch::Success(binding) => assert_eq!(binding.route, "/test/object"),
            other => panic!("expected the literal route, got {other:?}"),
        }
    }

    #[test]
    fn area_prefixes_the_path() {
        let mut table = RouteTable::new();
        table.register(echo_resource(), Some("/api"));
        assert!(matches!(
            table.matches(&get_request("/api/test/3")),
            RouteMatch::Success(_)
        ));
        assert!(matches!(
            table.matches(&get_request("/test/3")),
            RouteMatch::NotFound
        ));
    }

    #[test]
    fn out_of_range_integer_is_bad_request() {
        let mut table = RouteTable::new();
        let resource = ResourceDef::new("narrow").method(
            MethodDef::get(|_| async { Ok(Reply::ok()) })
                .param(ParamSpec::int_bounded("i", Some(1), Some(9))),
        );
        table.register(resource, None);
        assert!(matches!(
            table.matches(&get_request("/narrow/12")),
            RouteMatch::BadRequest(_)
        ));
    }

    #[test]
    fn enum_membership_checked_after_match() {
        let mut table = RouteTable::new();
        let resource = ResourceDef::new("kind").method(
            MethodDef::get(|_| async { Ok(Reply::ok()) })
                .param(ParamSpec::enumerated("k", &["alpha", "beta"])),
        );
        table.register(resource, None);
        assert!(matches!(
            table.matches(&get_request("/kind/alpha")),
            RouteMatch::Success(_)
        ));
        assert!(matches!(
            table.matches(&get_request("/kind/gamma")),
            RouteMatch::BadRequest(_)
        ));
    }

    #[test]
    fn required_query_parameter_missing_is_bad_request() {
        let mut table = RouteTable::new();
        let resource = ResourceDef::new("q").method(
            MethodDef::get(|_| async { Ok(Reply::ok()) })
                .route("/find")
                .param(ParamSpec::query("term")),
        );
        table.register(resource, None);
        assert!(matches!(
            table.matches(&get_request("/q/find")),
            RouteMatch::BadRequest(_)
        ));
        assert!(matches!(
            table.matches(&get_request("/q/find?term=x")),
            RouteMatch::Success(_)
        ));
    }

    #[test]
    fn multi_valued_query_collapses_for_scalar() {
        let mut table = RouteTable::new();
        let resource = ResourceDef::new("q").method(
            MethodDef::get(|_| async { Ok(Reply::ok()) })
                .route("/find")
                .param(ParamSpec::query("tag")),
        );
        table.register(resource, None);
        match table.matches(&get_request("/q/find?tag=a&tag=b")) {
            RouteMatch::Success(binding) => match &binding.args[0] {
                ArgValue::Text(text) => assert_eq!(text, "a,b"),
                other => panic!("expected text, got {other:?}"),
            },
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn catch_all_splits_segments() {
        let mut table = RouteTable::new();
        let resource = ResourceDef::new("files").method(
            MethodDef::get(|_| async { Ok(Reply::ok()) }).param(ParamSpec::catch_all("rest")),
        );
        table.register(resource, None);
        match table.matches(&get_request("/files/a/b/c")) {
            RouteMatch::Success(binding) => match &binding.args[0] {
                ArgValue::Many(segments) => assert_eq!(segments, &["a", "b", "c"]),
                other => panic!("expected segments, got {other:?}"),
            },
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn pattern_failures_do_not_block_siblings() {
        let mut table = RouteTable::new();
        let resource = ResourceDef::new("mixed")
            .method(
                // Broken: two parameters, only one hole.
                MethodDef::get(|_| async { Ok(Reply::ok()) })
                    .route("/a/{0}")
                    .param(ParamSpec::int("x"))
                    .param(ParamSpec::int("y")),
            )
            .method(MethodDef::post(|_| async { Ok(Reply::ok()) }).route("/ok"));
        let entries = table.register(resource, None);
        assert!(entries[0].outcome.is_err());
        assert!(entries[1].outcome.is_ok());

        let request = HttpRequest::builder()
            .method(Method::POST)
            .path("/mixed/ok")
            .build();
        assert!(matches!(table.matches(&request), RouteMatch::Success(_)));
    }

    #[test]
    fn reverse_lookup_with_query_params() {
        let mut table = RouteTable::new();
        let resource = ResourceDef::new("books").method(
            MethodDef::get(|_| async { Ok(Reply::ok()) })
                .param(ParamSpec::int("id"))
                .param(ParamSpec::query("full")),
        );
        table.register(resource, None);
        let url = table.url_for("books", "get", &["7", "true"]).unwrap();
        assert_eq!(url, "/books/7?full=true");
    }

    #[test]
    fn reverse_lookup_argument_count_checked() {
        let mut table = RouteTable::new();
        table.register(echo_resource(), None);
        let err = table.url_for("test", "get", &[]).unwrap_err();
        assert!(matches!(err, ReverseError::ArgumentCount { .. }));
        let err = table.url_for("test", "missing", &["1"]).unwrap_err();
        assert!(matches!(err, ReverseError::UnknownMethod { .. }));
    }

    #[test]
    fn allowed_verbs_unions_patterns() {
        let mut table = RouteTable::new();
        table.register(echo_resource(), None);
        let verbs = table.allowed_verbs("/test/3");
        assert_eq!(verbs, vec![Method::GET, Method::POST]);
    }

    // Handlers that raise HttpError propagate untouched through invocation.
    #[tokio::test]
    async fn handler_errors_flow_through() {
        let resource = ResourceDef::new("boom")
            .method(MethodDef::get(|_| async { Err(HttpError::NotImplemented) }));
        let mut table = RouteTable::new();
        table.register(resource, None);
        match table.matches(&get_request("/boom")) {
            RouteMatch::Success(binding) => {
                let args = CallArgs::new(binding.args, crate::services::Scope::new(
                    std::sync::Arc::new(crate::services::ServiceRegistry::new()),
                ));
                let err = (binding.endpoint.method().handler)(args).await.unwrap_err();
                assert!(matches!(err, HttpError::NotImplemented));
            }
            other => panic!("expected success, got {other:?}"),
        }
    }
}
