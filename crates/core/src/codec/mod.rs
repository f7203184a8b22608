//! Storable encoding of render arguments.
//!
//! A task's arguments are split into two stored columns:
//!
//! - `params`: a JSON document holding the named arguments plus the task's
//!   origin, kind, model overrides and script id.
//! - `script_params`: the positional script arguments as zlib-compressed
//!   JSON. These can carry large images and plugin-specific blocks the
//!   queue never interprets.
//!
//! Images and arrays anywhere in either part are written as self-describing
//! records (see [`payload`]) and restored byte-for-byte.

pub mod modes;
pub mod overrides;
pub mod payload;
pub mod script;
pub mod value;

use std::collections::BTreeMap;
use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::TaskKind;

pub use self::overrides::{Origin, Overrides};
pub use self::payload::{ArrayData, ImageData, PixelMode};
pub use self::script::{ScriptRegistry, ScriptSchema};
pub use self::value::{get_path, set_path, ParamValue};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A stored document or blob could not be decompressed or parsed.
    #[error("Corrupt payload: {0}")]
    CorruptPayload(String),

    /// A value has no storable representation.
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    #[error("Invalid image-to-image mode {0}")]
    InvalidMode(i64),

    #[error("Invalid path '{0}'")]
    InvalidPath(String),

    #[error("Argument mismatch: {0}")]
    ArgumentMismatch(String),

    #[error("Compression failed: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Task arguments
// ---------------------------------------------------------------------------

/// Arguments of one render call, in the shape the renderer consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskArgs {
    pub kind: TaskKind,
    pub origin: Origin,
    pub named: BTreeMap<String, ParamValue>,
    pub positional: Vec<ParamValue>,
    pub overrides: Overrides,
    pub script_id: Option<String>,
}

impl TaskArgs {
    pub fn new(kind: TaskKind, origin: Origin) -> Self {
        Self {
            kind,
            origin,
            named: BTreeMap::new(),
            positional: Vec::new(),
            overrides: Overrides::default(),
            script_id: None,
        }
    }
}

/// The two stored columns produced by [`encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedArgs {
    pub params: String,
    pub script_params: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct StoredParams {
    args: Value,
    #[serde(default)]
    checkpoint: Option<String>,
    #[serde(default)]
    vae: Option<String>,
    is_ui: bool,
    is_img2img: bool,
    #[serde(default)]
    script_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Encode / decode
// ---------------------------------------------------------------------------

/// Encode `args` into their stored form.
///
/// Image-to-image tasks drop the input-image fields their mode does not
/// use. Model overrides are merged into the named arguments in the
/// encoding of the task's origin.
pub fn encode(args: &TaskArgs) -> Result<EncodedArgs, CodecError> {
    let mut named = args.named.clone();
    if args.kind == TaskKind::GenerateFromImage {
        modes::prune(&mut named)?;
    }
    overrides::apply(&mut named, args.origin, &args.overrides);
    let stored_overrides = overrides::extract(&named, args.origin);

    let doc = StoredParams {
        args: ParamValue::Map(named).to_json()?,
        checkpoint: stored_overrides.checkpoint,
        vae: stored_overrides.vae,
        is_ui: args.origin == Origin::Ui,
        is_img2img: args.kind == TaskKind::GenerateFromImage,
        script_id: args.script_id.clone(),
    };
    let params = serde_json::to_string(&doc)
        .map_err(|e| CodecError::UnsupportedType(e.to_string()))?;

    let list = ParamValue::List(args.positional.clone()).to_json()?;
    let raw = serde_json::to_vec(&list).map_err(|e| CodecError::UnsupportedType(e.to_string()))?;

    Ok(EncodedArgs {
        params,
        script_params: compress(&raw)?,
    })
}

/// Decode stored columns back into [`TaskArgs`].
///
/// An empty `script_params` blob decodes to no positional arguments.
pub fn decode(params: &str, script_params: &[u8]) -> Result<TaskArgs, CodecError> {
    let doc: StoredParams = serde_json::from_str(params)
        .map_err(|e| CodecError::CorruptPayload(format!("params document: {e}")))?;

    let named = match ParamValue::from_json(&doc.args)? {
        ParamValue::Map(map) => map,
        _ => return Err(CodecError::CorruptPayload("params.args is not an object".into())),
    };

    let positional = if script_params.is_empty() {
        Vec::new()
    } else {
        let raw = decompress(script_params)?;
        let list: Value = serde_json::from_slice(&raw)
            .map_err(|e| CodecError::CorruptPayload(format!("script params: {e}")))?;
        match ParamValue::from_json(&list)? {
            ParamValue::List(items) => items,
            _ => return Err(CodecError::CorruptPayload("script params is not a list".into())),
        }
    };

    Ok(TaskArgs {
        kind: if doc.is_img2img {
            TaskKind::GenerateFromImage
        } else {
            TaskKind::GenerateFromText
        },
        origin: if doc.is_ui { Origin::Ui } else { Origin::Api },
        named,
        positional,
        overrides: Overrides {
            checkpoint: doc.checkpoint,
            vae: doc.vae,
        },
        script_id: doc.script_id,
    })
}

// ---------------------------------------------------------------------------
// Compression helpers
// ---------------------------------------------------------------------------

/// zlib-compress `bytes`.
pub fn compress(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Inverse of [`compress`]; any failure is a corrupt payload.
pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    ZlibDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(|e| CodecError::CorruptPayload(format!("zlib: {e}")))?;
    Ok(out)
}

pub(crate) fn pack(bytes: &[u8]) -> Result<String, CodecError> {
    Ok(BASE64.encode(compress(bytes)?))
}

pub(crate) fn unpack(text: &str) -> Result<Vec<u8>, CodecError> {
    let compressed = BASE64
        .decode(text)
        .map_err(|e| CodecError::CorruptPayload(format!("base64: {e}")))?;
    decompress(&compressed)
}
