//! Checkpoint and VAE override settings.
//!
//! UI-submitted tasks carry overrides as a list of `"Key: value"` strings
//! under `override_settings_texts`; API-submitted tasks carry a map under
//! `override_settings`. Both decode to the same [`Overrides`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::value::ParamValue;

/// Checkpoint value that means "use whatever the renderer has loaded".
pub const SYSTEM_CHECKPOINT: &str = "System";

const TEXTS_KEY: &str = "override_settings_texts";
const SETTINGS_KEY: &str = "override_settings";

const MODEL_TEXT: &str = "Model hash";
const VAE_TEXT: &str = "VAE";
const MODEL_SETTING: &str = "sd_model_checkpoint";
const VAE_SETTING: &str = "sd_vae";

/// Where a task was submitted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Ui,
    Api,
}

/// Model overrides applied to one task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overrides {
    pub checkpoint: Option<String>,
    pub vae: Option<String>,
}

/// Merge `overrides` into `named` in the encoding used by `origin`.
///
/// A `Some` field replaces any existing entry and a `None` field leaves it
/// alone. A `"System"` checkpoint removes the checkpoint entry.
pub fn apply(named: &mut BTreeMap<String, ParamValue>, origin: Origin, overrides: &Overrides) {
    let clear_checkpoint = overrides.checkpoint.as_deref() == Some(SYSTEM_CHECKPOINT);
    let checkpoint = overrides.checkpoint.as_deref().filter(|_| !clear_checkpoint);
    let vae = overrides.vae.as_deref();
    let touch_checkpoint = overrides.checkpoint.is_some();

    match origin {
        Origin::Ui => {
            let mut texts: Vec<ParamValue> = match named.remove(TEXTS_KEY) {
                Some(ParamValue::List(items)) => items
                    .into_iter()
                    .filter(|t| match t.as_str().and_then(text_key) {
                        Some(MODEL_TEXT) => !touch_checkpoint,
                        Some(VAE_TEXT) => vae.is_none(),
                        _ => true,
                    })
                    .collect(),
                _ => Vec::new(),
            };
            if let Some(ckpt) = checkpoint {
                texts.push(format!("{MODEL_TEXT}: {ckpt}").into());
            }
            if let Some(vae) = vae {
                texts.push(format!("{VAE_TEXT}: {vae}").into());
            }
            if !texts.is_empty() {
                named.insert(TEXTS_KEY.to_string(), ParamValue::List(texts));
            }
        }
        Origin::Api => {
            let mut settings = match named.remove(SETTINGS_KEY) {
                Some(ParamValue::Map(m)) => m,
                _ => BTreeMap::new(),
            };
            if touch_checkpoint {
                settings.remove(MODEL_SETTING);
            }
            if let Some(ckpt) = checkpoint {
                settings.insert(MODEL_SETTING.to_string(), ckpt.into());
            }
            if let Some(vae) = vae {
                settings.insert(VAE_SETTING.to_string(), vae.into());
            }
            if !settings.is_empty() {
                named.insert(SETTINGS_KEY.to_string(), ParamValue::Map(settings));
            }
        }
    }
}

/// Read the overrides back out of `named`.
pub fn extract(named: &BTreeMap<String, ParamValue>, origin: Origin) -> Overrides {
    let mut out = Overrides::default();
    match origin {
        Origin::Ui => {
            let texts = named.get(TEXTS_KEY).and_then(ParamValue::as_list).unwrap_or_default();
            for text in texts.iter().filter_map(ParamValue::as_str) {
                match text.split_once(':') {
                    Some((MODEL_TEXT, v)) => out.checkpoint = Some(v.trim().to_string()),
                    Some((VAE_TEXT, v)) => out.vae = Some(v.trim().to_string()),
                    _ => {}
                }
            }
        }
        Origin::Api => {
            if let Some(settings) = named.get(SETTINGS_KEY).and_then(ParamValue::as_map) {
                out.checkpoint = settings.get(MODEL_SETTING).and_then(ParamValue::as_str).map(str::to_string);
                out.vae = settings.get(VAE_SETTING).and_then(ParamValue::as_str).map(str::to_string);
            }
        }
    }
    out
}

fn text_key(text: &str) -> Option<&str> {
    text.split_once(':').map(|(k, _)| k)
}
