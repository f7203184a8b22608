//! [`RenderEngine`] backed by a render server's REST API.
//!
//! Images in the arguments are sent as base64 PNG. Returned images are
//! written to the output directory and reported on the artifact sink.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Map, Value};

use renderq_core::codec::modes::selected_mode;
use renderq_core::codec::{ImageData, ParamValue, TaskArgs};
use renderq_core::task::TaskKind;

use crate::api::{RenderApi, RenderApiError};
use crate::engine::{GenInfo, RenderContext, RenderEngine, RenderError};

/// Exception class the server reports when the device runs out of memory.
const OUT_OF_MEMORY_ERROR: &str = "OutOfMemoryError";

/// Named arguments consumed while building the request rather than sent as-is.
const LOCAL_KEYS: [&str; 9] = [
    "override_settings_texts",
    "init_img",
    "sketch",
    "init_img_with_mask",
    "inpaint_color_sketch",
    "inpaint_color_sketch_orig",
    "init_img_inpaint",
    "init_mask_inpaint",
    "mode",
];

pub struct HttpRenderEngine {
    api: RenderApi,
    output_dir: PathBuf,
    interrupted: AtomicBool,
}

impl HttpRenderEngine {
    pub fn new(api_url: String, output_dir: PathBuf) -> Self {
        Self {
            api: RenderApi::new(api_url),
            output_dir,
            interrupted: AtomicBool::new(false),
        }
    }

    async fn save_images(
        &self,
        ctx: &RenderContext,
        images: &[String],
        info: &Value,
    ) -> Result<(), RenderError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| RenderError::Failed(format!("cannot create output dir: {e}")))?;

        let first_image = info
            .get("index_of_first_image")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;
        let infotexts = info.get("infotexts").and_then(Value::as_array);

        for (idx, encoded) in images.iter().enumerate() {
            let bytes = BASE64
                .decode(encoded.split_once(',').map_or(encoded.as_str(), |(_, data)| data))
                .map_err(|e| RenderError::Failed(format!("invalid image from server: {e}")))?;
            let path = self.output_dir.join(format!("{}-{idx:02}.png", ctx.task_id));
            tokio::fs::write(&path, &bytes)
                .await
                .map_err(|e| RenderError::Failed(format!("cannot write {}: {e}", path.display())))?;

            let text = infotexts
                .and_then(|t| t.get(idx))
                .and_then(Value::as_str)
                .unwrap_or_default();
            ctx.artifacts
                .emit(path.to_string_lossy(), text, idx < first_image);
        }
        Ok(())
    }
}

#[async_trait]
impl RenderEngine for HttpRenderEngine {
    async fn render(&self, ctx: RenderContext, args: TaskArgs) -> Result<GenInfo, RenderError> {
        self.interrupted.store(false, Ordering::SeqCst);
        let body = request_body(&args)?;

        let response = self.api.generate(args.kind, &body).await;
        if self.interrupted.swap(false, Ordering::SeqCst) {
            return Err(RenderError::Interrupted);
        }
        let response = response.map_err(classify_error)?;

        let info: Value = serde_json::from_str(&response.info).unwrap_or(Value::Null);
        self.save_images(&ctx, &response.images, &info).await?;

        let infotexts = info
            .get("infotexts")
            .and_then(Value::as_array)
            .map(|t| t.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        Ok(GenInfo { infotexts, info })
    }

    async fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        if let Err(e) = self.api.interrupt().await {
            tracing::warn!(error = %e, "Failed to interrupt render server");
        }
    }
}

/// Map an API failure onto the queue's outcome categories.
pub fn classify_error(err: RenderApiError) -> RenderError {
    match err {
        RenderApiError::ApiError {
            error_type,
            message,
            ..
        } if error_type == OUT_OF_MEMORY_ERROR => RenderError::ResourceExhausted(message),
        other => RenderError::Failed(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Request body
// ---------------------------------------------------------------------------

/// Build the JSON request for `args`.
pub fn request_body(args: &TaskArgs) -> Result<Value, RenderError> {
    let mut body = Map::new();
    for (key, value) in &args.named {
        if LOCAL_KEYS.contains(&key.as_str()) {
            continue;
        }
        body.insert(key.clone(), to_api_json(value)?);
    }

    if args.kind == TaskKind::GenerateFromImage {
        let (init, mask) = img2img_inputs(args)?;
        if let Some(init) = init {
            body.insert("init_images".into(), json!([png_base64(init)?]));
        }
        if let Some(mask) = mask {
            body.insert("mask".into(), Value::String(png_base64(mask)?));
        }
    }

    let mut settings = match body.remove("override_settings") {
        Some(Value::Object(m)) => m,
        _ => Map::new(),
    };
    if let Some(ckpt) = &args.overrides.checkpoint {
        settings.insert("sd_model_checkpoint".into(), json!(ckpt));
    }
    if let Some(vae) = &args.overrides.vae {
        settings.insert("sd_vae".into(), json!(vae));
    }
    if !settings.is_empty() {
        body.insert("override_settings".into(), Value::Object(settings));
    }

    if let Some(script) = &args.script_id {
        body.insert("script_name".into(), json!(script));
    }
    if !args.positional.is_empty() {
        let script_args = args
            .positional
            .iter()
            .map(to_api_json)
            .collect::<Result<Vec<_>, _>>()?;
        body.insert("script_args".into(), Value::Array(script_args));
    }
    Ok(Value::Object(body))
}

/// Input image and optional mask for the selected image-to-image mode.
fn img2img_inputs(args: &TaskArgs) -> Result<(Option<&ImageData>, Option<&ImageData>), RenderError> {
    let mode = selected_mode(&args.named).map_err(|e| RenderError::Failed(e.to_string()))?;
    let image = |key: &str| match args.named.get(key) {
        Some(ParamValue::Image(img)) => Some(img),
        _ => None,
    };
    let pair = |key: &str, part: &str| match args.named.get(key).and_then(ParamValue::as_map) {
        Some(map) => match map.get(part) {
            Some(ParamValue::Image(img)) => Some(img),
            _ => None,
        },
        None => None,
    };
    Ok(match mode {
        0 => (image("init_img"), None),
        1 => (image("sketch"), None),
        2 => (pair("init_img_with_mask", "image"), pair("init_img_with_mask", "mask")),
        3 => (image("inpaint_color_sketch"), None),
        _ => (image("init_img_inpaint"), image("init_mask_inpaint")),
    })
}

fn to_api_json(value: &ParamValue) -> Result<Value, RenderError> {
    Ok(match value {
        ParamValue::Image(img) => Value::String(png_base64(img)?),
        ParamValue::Array(arr) => match arr.as_image() {
            Some(img) => Value::String(png_base64(&img)?),
            None => {
                return Err(RenderError::Failed(format!(
                    "array of {} {:?} cannot be sent to the render server",
                    arr.dtype(),
                    arr.shape()
                )))
            }
        },
        ParamValue::List(items) => {
            Value::Array(items.iter().map(to_api_json).collect::<Result<_, _>>()?)
        }
        ParamValue::Map(map) => {
            let mut obj = Map::with_capacity(map.len());
            for (k, v) in map {
                obj.insert(k.clone(), to_api_json(v)?);
            }
            Value::Object(obj)
        }
        scalar => scalar
            .to_json()
            .map_err(|e| RenderError::Failed(e.to_string()))?,
    })
}

fn png_base64(img: &ImageData) -> Result<String, RenderError> {
    let dynamic = img
        .to_dynamic()
        .map_err(|e| RenderError::Failed(e.to_string()))?;
    let mut buf = Cursor::new(Vec::new());
    dynamic
        .write_to(&mut buf, image::ImageFormat::Png)
        .map_err(|e| RenderError::Failed(format!("png encoding failed: {e}")))?;
    Ok(BASE64.encode(buf.into_inner()))
}
