//! Input-image fields of image-to-image tasks, per selected mode.
//!
//! An image-to-image request carries slots for every editing mode but only
//! the slots of its selected `mode` are read by the renderer. The rest are
//! nulled before storage.

use std::collections::BTreeMap;

use super::value::ParamValue;
use super::CodecError;

/// Named argument holding the selected mode index.
pub const MODE_KEY: &str = "mode";

/// Input-image fields read by each mode, indexed by mode number.
pub const MODE_FIELDS: [&[&str]; 5] = [
    // 0: direct image
    &["init_img"],
    // 1: sketch
    &["sketch"],
    // 2: image + mask
    &["init_img_with_mask"],
    // 3: color sketch with original
    &["inpaint_color_sketch", "inpaint_color_sketch_orig"],
    // 4: inpaint image + mask
    &["init_img_inpaint", "init_mask_inpaint"],
];

/// Selected mode of `named`, defaulting to 0 when absent.
pub fn selected_mode(named: &BTreeMap<String, ParamValue>) -> Result<usize, CodecError> {
    match named.get(MODE_KEY) {
        None | Some(ParamValue::Null) => Ok(0),
        Some(ParamValue::Int(m)) if (0..MODE_FIELDS.len() as i64).contains(m) => Ok(*m as usize),
        Some(ParamValue::Int(m)) => Err(CodecError::InvalidMode(*m)),
        Some(_) => Err(CodecError::InvalidMode(-1)),
    }
}

/// Null every input-image field that the selected mode does not read.
///
/// Fields of the selected mode are left untouched, present or not.
pub fn prune(named: &mut BTreeMap<String, ParamValue>) -> Result<(), CodecError> {
    let mode = selected_mode(named)?;
    for (idx, fields) in MODE_FIELDS.iter().enumerate() {
        if idx == mode {
            continue;
        }
        for field in *fields {
            named.insert((*field).to_string(), ParamValue::Null);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_fields_set(mode: i64) -> BTreeMap<String, ParamValue> {
        let mut named = BTreeMap::new();
        named.insert(MODE_KEY.to_string(), ParamValue::Int(mode));
        for field in MODE_FIELDS.iter().flat_map(|f| f.iter()) {
            named.insert((*field).to_string(), ParamValue::from("payload"));
        }
        named
    }

    #[test]
    fn color_sketch_keeps_both_fields() {
        let mut named = all_fields_set(3);
        prune(&mut named).unwrap();

        assert_eq!(named["inpaint_color_sketch"], ParamValue::from("payload"));
        assert_eq!(named["inpaint_color_sketch_orig"], ParamValue::from("payload"));
        assert!(named["init_img"].is_null());
        assert!(named["init_mask_inpaint"].is_null());
    }

    #[test]
    fn missing_mode_means_direct_image() {
        let mut named = all_fields_set(0);
        named.remove(MODE_KEY);
        prune(&mut named).unwrap();
        assert_eq!(named["init_img"], ParamValue::from("payload"));
        assert!(named["sketch"].is_null());
    }

    #[test]
    fn out_of_range_mode_is_rejected() {
        let mut named = all_fields_set(9);
        assert!(matches!(prune(&mut named), Err(CodecError::InvalidMode(9))));
    }
}
