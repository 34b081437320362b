//! Optional [Tracy](https://github.com/wolfpld/tracy) instrumentation
//! behind the `profiling` Cargo feature.
//!
//! ```toml
//! [dependencies]
//! armature-deform = { version = "0.1", features = ["profiling"] }
//! ```
//!
//! The span macros wrap the batch entry points and can bracket caller-side
//! work too:
//!
//! ```ignore
//! use armature_deform::profiling::{profile_function, profile_scope};
//!
//! fn update_rig() {
//!     profile_function!();
//!
//!     {
//!         profile_scope!("gather_weights");
//!         // ...
//!     }
//! }
//! ```
//!
//! Without the feature every macro expands to nothing.

#[cfg(feature = "profiling")]
pub use tracy_client::{self, Client, Span, span};

/// Open a named span that closes when the scope exits.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_scope {
    ($name:expr) => {
        let _profile_span = $crate::profiling::span!($name);
    };
}

/// Open a named span (no-op without the `profiling` feature).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_scope {
    ($name:expr) => {};
}

/// Span over the rest of the enclosing function, named after it.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_function {
    () => {
        let _profile_span = $crate::profiling::span!();
    };
}

/// Span over the enclosing function (no-op without the `profiling` feature).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_function {
    () => {};
}

// macro_export lands at the crate root; mirror them here so callers can
// import through this module.
pub use profile_function;
pub use profile_scope;
