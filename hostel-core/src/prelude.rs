//! The convenience import for embedding applications:
//!
//! ```ignore
//! use hostel::prelude::*;
//! ```

pub use crate::app::Engine;
pub use crate::codec::{Fields, FieldsError, FileStream, FromFields};
pub use crate::error::HttpError;
pub use crate::http::{HttpRequest, HttpResponse, MediaType, Reply};
pub use crate::identity::{AuthRule, BasicIdentity, Identity, TokenManager};
pub use crate::jobs::Rejection;
pub use crate::options::{AppOptions, AsyncOptions};
pub use crate::pipeline::{HealthProbe, HealthStatus, Next, Responder};
pub use crate::routing::{BodySpec, CallArgs, MethodDef, ParamSpec, ResourceDef};
pub use crate::services::{Injectable, Lifetime, Scope};
pub use crate::validate::{FieldRule, Schema, Validate};
