//! Generic argument tree and dot-path access.

use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};

use super::payload::{array_to_record, image_to_record, record_from_object, ArrayData, ImageData, Record};
use super::CodecError;

/// One node of a render argument tree.
///
/// `Foreign` stands for a value the caller could not express as data (a
/// live handle, a callable). It is accepted in memory but rejected by the
/// encoder.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<ParamValue>),
    Map(BTreeMap<String, ParamValue>),
    Image(ImageData),
    Array(ArrayData),
    Foreign(String),
}

impl ParamValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, ParamValue>> {
        match self {
            ParamValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, ParamValue>> {
        match self {
            ParamValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ParamValue]> {
        match self {
            ParamValue::List(l) => Some(l),
            _ => None,
        }
    }

    /// Convert to the stored JSON form, turning images and arrays into
    /// payload records.
    pub fn to_json(&self) -> Result<Value, CodecError> {
        Ok(match self {
            ParamValue::Null => Value::Null,
            ParamValue::Bool(b) => Value::Bool(*b),
            ParamValue::Int(i) => Value::Number((*i).into()),
            ParamValue::Float(f) => Number::from_f64(*f)
                .map(Value::Number)
                .ok_or_else(|| CodecError::UnsupportedType(format!("non-finite float {f}")))?,
            ParamValue::String(s) => Value::String(s.clone()),
            ParamValue::List(items) => Value::Array(
                items
                    .iter()
                    .map(ParamValue::to_json)
                    .collect::<Result<_, _>>()?,
            ),
            ParamValue::Map(map) => {
                let mut obj = Map::with_capacity(map.len());
                for (k, v) in map {
                    obj.insert(k.clone(), v.to_json()?);
                }
                Value::Object(obj)
            }
            ParamValue::Image(img) => image_to_record(img)?,
            ParamValue::Array(arr) => array_to_record(arr)?,
            ParamValue::Foreign(type_name) => {
                return Err(CodecError::UnsupportedType(type_name.clone()))
            }
        })
    }

    /// Inverse of [`ParamValue::to_json`].
    pub fn from_json(value: &Value) -> Result<Self, CodecError> {
        Ok(match value {
            Value::Null => ParamValue::Null,
            Value::Bool(b) => ParamValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ParamValue::Int(i),
                None => ParamValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => ParamValue::String(s.clone()),
            Value::Array(items) => ParamValue::List(
                items
                    .iter()
                    .map(ParamValue::from_json)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(obj) => match record_from_object(obj)? {
                Some(Record::Image(img)) => ParamValue::Image(img),
                Some(Record::Array(arr)) => ParamValue::Array(arr),
                None => {
                    let mut map = BTreeMap::new();
                    for (k, v) in obj {
                        map.insert(k.clone(), ParamValue::from_json(v)?);
                    }
                    ParamValue::Map(map)
                }
            },
        })
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::String(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::String(s)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Int(i)
    }
}

impl From<f64> for ParamValue {
    fn from(f: f64) -> Self {
        ParamValue::Float(f)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

impl From<ImageData> for ParamValue {
    fn from(img: ImageData) -> Self {
        ParamValue::Image(img)
    }
}

// ---------------------------------------------------------------------------
// Dot paths
// ---------------------------------------------------------------------------

/// Read the node at `path` (`"a.b.0.c"`); numeric segments index lists.
pub fn get_path<'a>(root: &'a ParamValue, path: &str) -> Option<&'a ParamValue> {
    path.split('.').try_fold(root, |node, seg| match node {
        ParamValue::Map(map) => map.get(seg),
        ParamValue::List(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Write `value` at `path`, creating intermediate maps as needed.
///
/// Fails if a segment walks through a scalar or indexes past the end of a
/// list.
pub fn set_path(root: &mut ParamValue, path: &str, value: ParamValue) -> Result<(), CodecError> {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return Err(CodecError::InvalidPath(path.to_string()));
    };

    let mut node = root;
    for seg in parents {
        node = match node {
            ParamValue::Map(map) => map
                .entry((*seg).to_string())
                .or_insert_with(|| ParamValue::Map(BTreeMap::new())),
            ParamValue::List(items) => seg
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get_mut(i))
                .ok_or_else(|| CodecError::InvalidPath(path.to_string()))?,
            _ => return Err(CodecError::InvalidPath(path.to_string())),
        };
    }

    match node {
        ParamValue::Map(map) => {
            map.insert((*last).to_string(), value);
            Ok(())
        }
        ParamValue::List(items) => {
            let slot = last
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get_mut(i))
                .ok_or_else(|| CodecError::InvalidPath(path.to_string()))?;
            *slot = value;
            Ok(())
        }
        _ => Err(CodecError::InvalidPath(path.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> ParamValue {
        let json = serde_json::json!({
            "prompt": "a cat",
            "alwayson": { "units": [ { "weight": 0.5 }, { "weight": 1.0 } ] }
        });
        ParamValue::from_json(&json).unwrap()
    }

    #[test]
    fn get_path_walks_maps_and_lists() {
        let t = tree();
        assert_eq!(get_path(&t, "prompt"), Some(&ParamValue::from("a cat")));
        assert_eq!(get_path(&t, "alwayson.units.1.weight"), Some(&ParamValue::Float(1.0)));
        assert_eq!(get_path(&t, "alwayson.units.7.weight"), None);
        assert_eq!(get_path(&t, "prompt.length"), None);
    }

    #[test]
    fn set_path_creates_intermediate_maps() {
        let mut t = tree();
        set_path(&mut t, "override_settings.sd_vae", "vae.pt".into()).unwrap();
        set_path(&mut t, "alwayson.units.0.weight", ParamValue::Int(2)).unwrap();

        assert_eq!(get_path(&t, "override_settings.sd_vae"), Some(&ParamValue::from("vae.pt")));
        assert_eq!(get_path(&t, "alwayson.units.0.weight"), Some(&ParamValue::Int(2)));
    }

    #[test]
    fn set_path_through_scalar_fails() {
        let mut t = tree();
        let err = set_path(&mut t, "prompt.inner", ParamValue::Null).unwrap_err();
        assert!(matches!(err, CodecError::InvalidPath(_)));
    }

    #[test]
    fn foreign_value_is_unsupported() {
        let err = ParamValue::Foreign("torch.Generator".into()).to_json().unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedType(name) if name == "torch.Generator"));
    }

    #[test]
    fn floats_and_ints_keep_their_variant() {
        let v = ParamValue::List(vec![ParamValue::Float(7.0), ParamValue::Int(7)]);
        let back = ParamValue::from_json(&v.to_json().unwrap()).unwrap();
        assert_eq!(back, v);
    }
}
