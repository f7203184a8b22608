//! Row structs and DTOs.
//!
//! Each submodule contains a row struct decoded from the database plus the
//! input and query types its repository accepts.

pub mod app_state;
pub mod task;
