//! "Artifact saved" notifications emitted while a render runs.

use serde::Serialize;
use tokio::sync::mpsc;

/// One file written by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactSaved {
    pub path: String,
    /// Generation parameters text for this artifact.
    pub info: String,
    /// Grid/montage images are listed before individual outputs.
    pub is_grid: bool,
}

/// Sending half handed to the engine for one render call.
#[derive(Debug, Clone)]
pub struct ArtifactSink {
    tx: mpsc::UnboundedSender<ArtifactSaved>,
}

/// Receiving half kept by the caller.
#[derive(Debug)]
pub struct ArtifactLog {
    rx: mpsc::UnboundedReceiver<ArtifactSaved>,
}

impl ArtifactSink {
    pub fn channel() -> (ArtifactSink, ArtifactLog) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ArtifactSink { tx }, ArtifactLog { rx })
    }

    /// Report a saved artifact. Dropped silently once the caller stopped
    /// listening.
    pub fn emit(&self, path: impl Into<String>, info: impl Into<String>, is_grid: bool) {
        let _ = self.tx.send(ArtifactSaved {
            path: path.into(),
            info: info.into(),
            is_grid,
        });
    }
}

impl ArtifactLog {
    /// Everything emitted so far, grids first, otherwise in emission order.
    pub fn drain(&mut self) -> Vec<ArtifactSaved> {
        let mut saved = Vec::new();
        while let Ok(artifact) = self.rx.try_recv() {
            saved.push(artifact);
        }
        order_grids_first(saved)
    }
}

/// Stable partition putting grid artifacts ahead of the rest.
pub fn order_grids_first(saved: Vec<ArtifactSaved>) -> Vec<ArtifactSaved> {
    let (mut grids, rest): (Vec<_>, Vec<_>) = saved.into_iter().partition(|a| a.is_grid);
    grids.extend(rest);
    grids
}
