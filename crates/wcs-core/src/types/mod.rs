//! Domain types shared across the workspace.
//!
//! - [`path`] - Working-copy path normalization
//! - [`status`] - Status kinds and their severity order
//!
//! All public types are re-exported at the crate root:
//!
//! ```
//! use wcs_core::{StatusKind, normalize_path};
//! ```

mod path;
mod status;

pub use path::{is_within, normalize_path, relative_name};
pub use status::StatusKind;
