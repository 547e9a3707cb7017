//! The route table and its inputs: pattern compilation, resource value
//! records, endpoint registration, matching, and reverse lookup.

pub mod pattern;
pub mod resource;
pub mod table;

pub use pattern::{Part, PatternError, RoutePattern};
pub use resource::{
    derive_route_name, ArgValue, BodySpec, BodyValue, BoxFuture, CallArgs, CrossCheck, FromArg,
    Handler, MethodDef, ParamKind, ParamSpec, ResourceDef,
};
pub use table::{
    Binding, Endpoint, RegisterError, ReverseError, RouteEntry, RouteMatch, RouteTable,
};
