//! Delivery of finished-task notifications outside the process.

pub mod storage;
pub mod webhook;
