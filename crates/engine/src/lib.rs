//! Render collaborator contract and its HTTP implementation.
//!
//! - [`engine`]: the [`RenderEngine`] trait the queue drives, its outcome
//!   and error types.
//! - [`artifacts`]: side channel on which an engine reports saved files.
//! - [`api`]: REST client for a txt2img/img2img render server.
//! - [`http`]: [`HttpRenderEngine`], a [`RenderEngine`] over that client.

pub mod api;
pub mod artifacts;
pub mod engine;
pub mod http;

pub use artifacts::{ArtifactLog, ArtifactSaved, ArtifactSink};
pub use engine::{GenInfo, RenderContext, RenderEngine, RenderError};
pub use http::HttpRenderEngine;
