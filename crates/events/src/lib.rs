//! Task lifecycle notifications.
//!
//! - [`TaskHooks`]: ordered observer registry the runner fires on
//!   registration, start, finish and when the queue drains.
//! - [`delivery`]: the external callback notifier and the object storage
//!   it uploads artifacts to.

pub mod delivery;
pub mod hooks;

pub use delivery::storage::{ObjectStore, S3ObjectStore, UploadConfig};
pub use delivery::webhook::{CallbackNotifier, DeliveryError};
pub use hooks::{FinishedTask, TaskHooks, TaskObserver};
