//! Hostel — a lightweight HTTP service-hosting engine.
//!
//! This facade crate re-exports the engine through a single dependency.
//! Import everything you need with:
//!
//! ```ignore
//! use hostel::prelude::*;
//! ```
//!
//! # Feature flags
//!
//! | Feature  | Default | Enables                                  |
//! |----------|---------|------------------------------------------|
//! | `xml`    | no      | the `application/xml` codec              |
//! | `server` | no      | the hyper boundary adapter (`serve`)     |

pub extern crate hostel_core;

// Re-export everything from hostel-core at the top level for convenience.
pub use hostel_core::*;

pub mod prelude {
    pub use hostel_core::prelude::*;
}
