//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&DbPool` as the first argument.

pub mod app_state_repo;
pub mod task_repo;

pub use app_state_repo::AppStateRepo;
pub use task_repo::TaskRepo;
