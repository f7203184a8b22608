//! Self-describing records for image and array payloads.
//!
//! An image is stored as
//! `{"$codec": "image", "mode", "width", "height", "data"}` and an array as
//! `{"$codec": "array", "shape", "dtype", "data"}`, where `data` is the raw
//! sample bytes, zlib-compressed and base64-encoded. Multi-byte samples are
//! little-endian.

use image::{DynamicImage, ImageBuffer};
use serde_json::{json, Map, Value};

use super::{pack, unpack, CodecError};

/// Discriminator key marking a JSON object as an encoded payload record.
pub const CODEC_KEY: &str = "$codec";

const IMAGE_TAG: &str = "image";
const ARRAY_TAG: &str = "array";

// ---------------------------------------------------------------------------
// Pixel modes
// ---------------------------------------------------------------------------

/// Pixel layout of an [`ImageData`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelMode {
    L,
    La,
    Rgb,
    Rgba,
    L16,
    La16,
    Rgb16,
    Rgba16,
    RgbF32,
    RgbaF32,
}

impl PixelMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PixelMode::L => "L",
            PixelMode::La => "LA",
            PixelMode::Rgb => "RGB",
            PixelMode::Rgba => "RGBA",
            PixelMode::L16 => "I;16",
            PixelMode::La16 => "LA;16",
            PixelMode::Rgb16 => "RGB;16",
            PixelMode::Rgba16 => "RGBA;16",
            PixelMode::RgbF32 => "RGBF",
            PixelMode::RgbaF32 => "RGBAF",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let mode = match s {
            "L" => PixelMode::L,
            "LA" => PixelMode::La,
            "RGB" => PixelMode::Rgb,
            "RGBA" => PixelMode::Rgba,
            "I;16" => PixelMode::L16,
            "LA;16" => PixelMode::La16,
            "RGB;16" => PixelMode::Rgb16,
            "RGBA;16" => PixelMode::Rgba16,
            "RGBF" => PixelMode::RgbF32,
            "RGBAF" => PixelMode::RgbaF32,
            _ => return None,
        };
        Some(mode)
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelMode::L => 1,
            PixelMode::La | PixelMode::L16 => 2,
            PixelMode::Rgb => 3,
            PixelMode::Rgba | PixelMode::La16 => 4,
            PixelMode::Rgb16 => 6,
            PixelMode::Rgba16 => 8,
            PixelMode::RgbF32 => 12,
            PixelMode::RgbaF32 => 16,
        }
    }
}

// ---------------------------------------------------------------------------
// ImageData
// ---------------------------------------------------------------------------

/// A raster image carried inside task arguments.
///
/// Pixels are kept as raw bytes so a stored record reconstructs the exact
/// same mode, size and samples.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    mode: PixelMode,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl ImageData {
    /// Build an image from raw samples, checking the buffer length.
    pub fn new(mode: PixelMode, width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, CodecError> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(mode.bytes_per_pixel()))
            .ok_or_else(|| {
                CodecError::CorruptPayload(format!(
                    "{} image {width}x{height} is too large",
                    mode.as_str()
                ))
            })?;
        if pixels.len() != expected {
            return Err(CodecError::CorruptPayload(format!(
                "{} image {width}x{height} needs {expected} bytes, got {}",
                mode.as_str(),
                pixels.len()
            )));
        }
        Ok(Self {
            mode,
            width,
            height,
            pixels,
        })
    }

    pub fn mode(&self) -> PixelMode {
        self.mode
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Capture a decoded [`DynamicImage`].
    pub fn from_dynamic(img: &DynamicImage) -> Result<Self, CodecError> {
        let (w, h) = (img.width(), img.height());
        let (mode, pixels) = match img {
            DynamicImage::ImageLuma8(b) => (PixelMode::L, b.as_raw().clone()),
            DynamicImage::ImageLumaA8(b) => (PixelMode::La, b.as_raw().clone()),
            DynamicImage::ImageRgb8(b) => (PixelMode::Rgb, b.as_raw().clone()),
            DynamicImage::ImageRgba8(b) => (PixelMode::Rgba, b.as_raw().clone()),
            DynamicImage::ImageLuma16(b) => (PixelMode::L16, u16_to_le(b.as_raw())),
            DynamicImage::ImageLumaA16(b) => (PixelMode::La16, u16_to_le(b.as_raw())),
            DynamicImage::ImageRgb16(b) => (PixelMode::Rgb16, u16_to_le(b.as_raw())),
            DynamicImage::ImageRgba16(b) => (PixelMode::Rgba16, u16_to_le(b.as_raw())),
            DynamicImage::ImageRgb32F(b) => (PixelMode::RgbF32, f32_to_le(b.as_raw())),
            DynamicImage::ImageRgba32F(b) => (PixelMode::RgbaF32, f32_to_le(b.as_raw())),
            other => {
                return Err(CodecError::UnsupportedType(format!(
                    "image color type {:?}",
                    other.color()
                )))
            }
        };
        Self::new(mode, w, h, pixels)
    }

    /// Rebuild a [`DynamicImage`] for handing to a renderer or encoder.
    pub fn to_dynamic(&self) -> Result<DynamicImage, CodecError> {
        let (w, h) = (self.width, self.height);
        let raw = self.pixels.clone();
        let img = match self.mode {
            PixelMode::L => ImageBuffer::from_raw(w, h, raw).map(DynamicImage::ImageLuma8),
            PixelMode::La => ImageBuffer::from_raw(w, h, raw).map(DynamicImage::ImageLumaA8),
            PixelMode::Rgb => ImageBuffer::from_raw(w, h, raw).map(DynamicImage::ImageRgb8),
            PixelMode::Rgba => ImageBuffer::from_raw(w, h, raw).map(DynamicImage::ImageRgba8),
            PixelMode::L16 => ImageBuffer::from_raw(w, h, le_to_u16(&raw)).map(DynamicImage::ImageLuma16),
            PixelMode::La16 => ImageBuffer::from_raw(w, h, le_to_u16(&raw)).map(DynamicImage::ImageLumaA16),
            PixelMode::Rgb16 => ImageBuffer::from_raw(w, h, le_to_u16(&raw)).map(DynamicImage::ImageRgb16),
            PixelMode::Rgba16 => ImageBuffer::from_raw(w, h, le_to_u16(&raw)).map(DynamicImage::ImageRgba16),
            PixelMode::RgbF32 => ImageBuffer::from_raw(w, h, le_to_f32(&raw)).map(DynamicImage::ImageRgb32F),
            PixelMode::RgbaF32 => ImageBuffer::from_raw(w, h, le_to_f32(&raw)).map(DynamicImage::ImageRgba32F),
        };
        img.ok_or_else(|| CodecError::CorruptPayload("image buffer size mismatch".into()))
    }
}

fn u16_to_le(samples: &[u16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn f32_to_le(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn le_to_u16(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect()
}

fn le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

// ---------------------------------------------------------------------------
// ArrayData
// ---------------------------------------------------------------------------

/// An n-dimensional numeric array (tensor) carried inside task arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayData {
    shape: Vec<usize>,
    dtype: String,
    bytes: Vec<u8>,
}

/// Element size in bytes for the supported dtypes.
fn dtype_size(dtype: &str) -> Option<usize> {
    match dtype {
        "bool" | "uint8" | "int8" => Some(1),
        "uint16" | "int16" | "float16" => Some(2),
        "uint32" | "int32" | "float32" => Some(4),
        "uint64" | "int64" | "float64" => Some(8),
        _ => None,
    }
}

impl ArrayData {
    /// Build an array from raw row-major bytes, checking the buffer length.
    pub fn new(shape: Vec<usize>, dtype: impl Into<String>, bytes: Vec<u8>) -> Result<Self, CodecError> {
        let dtype = dtype.into();
        let size = dtype_size(&dtype)
            .ok_or_else(|| CodecError::UnsupportedType(format!("array dtype '{dtype}'")))?;
        let expected = shape
            .iter()
            .try_fold(size, |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| {
                CodecError::CorruptPayload(format!("array {shape:?} of {dtype} is too large"))
            })?;
        if bytes.len() != expected {
            return Err(CodecError::CorruptPayload(format!(
                "array {shape:?} of {dtype} needs {expected} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self { shape, dtype, bytes })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> &str {
        &self.dtype
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Reinterpret a `uint8` HxW, HxWx1, HxWx3 or HxWx4 array as an image.
    pub fn as_image(&self) -> Option<ImageData> {
        if self.dtype != "uint8" {
            return None;
        }
        let (h, w, mode) = match self.shape.as_slice() {
            [h, w] | [h, w, 1] => (*h, *w, PixelMode::L),
            [h, w, 3] => (*h, *w, PixelMode::Rgb),
            [h, w, 4] => (*h, *w, PixelMode::Rgba),
            _ => return None,
        };
        let w = u32::try_from(w).ok()?;
        let h = u32::try_from(h).ok()?;
        ImageData::new(mode, w, h, self.bytes.clone()).ok()
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

pub(crate) fn image_to_record(img: &ImageData) -> Result<Value, CodecError> {
    Ok(json!({
        CODEC_KEY: IMAGE_TAG,
        "mode": img.mode.as_str(),
        "width": img.width,
        "height": img.height,
        "data": pack(&img.pixels)?,
    }))
}

pub(crate) fn array_to_record(arr: &ArrayData) -> Result<Value, CodecError> {
    Ok(json!({
        CODEC_KEY: ARRAY_TAG,
        "shape": arr.shape,
        "dtype": arr.dtype,
        "data": pack(&arr.bytes)?,
    }))
}

/// Payload decoded from a record object.
pub(crate) enum Record {
    Image(ImageData),
    Array(ArrayData),
}

/// Decode a record object. Returns `Ok(None)` if `obj` carries no codec tag.
pub(crate) fn record_from_object(obj: &Map<String, Value>) -> Result<Option<Record>, CodecError> {
    let Some(tag) = obj.get(CODEC_KEY) else {
        return Ok(None);
    };
    let data = obj
        .get("data")
        .and_then(Value::as_str)
        .ok_or_else(|| corrupt("record without data"))?;
    let bytes = unpack(data)?;

    match tag.as_str() {
        Some(IMAGE_TAG) => {
            let mode = obj
                .get("mode")
                .and_then(Value::as_str)
                .and_then(PixelMode::parse)
                .ok_or_else(|| corrupt("image record with unknown mode"))?;
            let width = dimension(obj, "width")?;
            let height = dimension(obj, "height")?;
            Ok(Some(Record::Image(ImageData::new(mode, width, height, bytes)?)))
        }
        Some(ARRAY_TAG) => {
            let shape = obj
                .get("shape")
                .and_then(Value::as_array)
                .ok_or_else(|| corrupt("array record without shape"))?
                .iter()
                .map(|d| d.as_u64().and_then(|d| usize::try_from(d).ok()))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| corrupt("array record with invalid shape"))?;
            let dtype = obj
                .get("dtype")
                .and_then(Value::as_str)
                .ok_or_else(|| corrupt("array record without dtype"))?;
            let arr = ArrayData::new(shape, dtype, bytes).map_err(|e| match e {
                CodecError::UnsupportedType(msg) => CodecError::CorruptPayload(msg),
                other => other,
            })?;
            Ok(Some(Record::Array(arr)))
        }
        _ => Err(corrupt("unknown record tag")),
    }
}

fn dimension(obj: &Map<String, Value>, key: &str) -> Result<u32, CodecError> {
    obj.get(key)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| corrupt(&format!("image record with invalid {key}")))
}

fn corrupt(msg: &str) -> CodecError {
    CodecError::CorruptPayload(msg.to_string())
}
