//! Domain vocabulary shared by every renderq crate.
//!
//! - [`task`]: task kinds and lifecycle statuses.
//! - [`codec`]: storable encoding of render arguments.
//! - [`error`]: domain-level error type.

pub mod codec;
pub mod error;
pub mod task;
pub mod types;
