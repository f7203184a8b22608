//! Named/positional conversion for render script arguments.
//!
//! Scripts take positional arguments. A [`ScriptRegistry`] records each
//! script's argument schema so stored and exported tasks can present those
//! arguments by name and be converted back before rendering.

use std::collections::{BTreeMap, HashMap};

use super::value::ParamValue;
use super::CodecError;

/// Key collecting the variadic tail in named form.
pub const VARARGS_KEY: &str = "*args";

/// Argument schema of one script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSchema {
    pub arg_names: Vec<String>,
    pub variadic: bool,
}

/// Registry of script schemas, keyed by script identifier.
#[derive(Debug, Clone, Default)]
pub struct ScriptRegistry {
    schemas: HashMap<String, ScriptSchema>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, script_id: impl Into<String>, schema: ScriptSchema) {
        self.schemas.insert(script_id.into(), schema);
    }

    pub fn get(&self, script_id: &str) -> Option<&ScriptSchema> {
        self.schemas.get(script_id)
    }

    /// Convert positional arguments to named form.
    ///
    /// Missing trailing arguments are omitted. Extra arguments go under
    /// [`VARARGS_KEY`] when the script is variadic and are rejected otherwise.
    pub fn to_named(
        &self,
        script_id: &str,
        positional: &[ParamValue],
    ) -> Result<BTreeMap<String, ParamValue>, CodecError> {
        let schema = self.schema(script_id)?;
        let mut named = BTreeMap::new();
        for (name, value) in schema.arg_names.iter().zip(positional) {
            named.insert(name.clone(), value.clone());
        }

        let rest = positional.get(schema.arg_names.len()..).unwrap_or_default();
        if !rest.is_empty() {
            if !schema.variadic {
                return Err(CodecError::ArgumentMismatch(format!(
                    "script '{script_id}' takes {} arguments, got {}",
                    schema.arg_names.len(),
                    positional.len()
                )));
            }
            named.insert(VARARGS_KEY.to_string(), ParamValue::List(rest.to_vec()));
        }
        Ok(named)
    }

    /// Convert named arguments back to positional form.
    ///
    /// Names absent from `named` become `Null`; unknown names are rejected.
    pub fn to_positional(
        &self,
        script_id: &str,
        named: &BTreeMap<String, ParamValue>,
    ) -> Result<Vec<ParamValue>, CodecError> {
        let schema = self.schema(script_id)?;
        if let Some(unknown) = named
            .keys()
            .find(|k| k.as_str() != VARARGS_KEY && !schema.arg_names.contains(k))
        {
            return Err(CodecError::ArgumentMismatch(format!(
                "script '{script_id}' has no argument '{unknown}'"
            )));
        }

        let mut positional: Vec<ParamValue> = schema
            .arg_names
            .iter()
            .map(|name| named.get(name).cloned().unwrap_or(ParamValue::Null))
            .collect();

        match named.get(VARARGS_KEY) {
            Some(ParamValue::List(rest)) if schema.variadic => positional.extend(rest.iter().cloned()),
            Some(_) => {
                return Err(CodecError::ArgumentMismatch(format!(
                    "script '{script_id}' does not take variadic arguments"
                )))
            }
            None => {}
        }
        Ok(positional)
    }

    fn schema(&self, script_id: &str) -> Result<&ScriptSchema, CodecError> {
        self.schemas
            .get(script_id)
            .ok_or_else(|| CodecError::ArgumentMismatch(format!("unknown script '{script_id}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ScriptRegistry {
        let mut reg = ScriptRegistry::new();
        reg.register(
            "x/y/z plot",
            ScriptSchema {
                arg_names: vec!["x_type".into(), "x_values".into()],
                variadic: true,
            },
        );
        reg.register(
            "loopback",
            ScriptSchema {
                arg_names: vec!["loops".into()],
                variadic: false,
            },
        );
        reg
    }

    #[test]
    fn variadic_tail_round_trips() {
        let reg = registry();
        let positional = vec![ParamValue::Int(1), "1,2,3".into(), ParamValue::Bool(true), ParamValue::Int(4)];

        let named = reg.to_named("x/y/z plot", &positional).unwrap();
        assert_eq!(named["x_values"], ParamValue::from("1,2,3"));
        assert_eq!(named[VARARGS_KEY].as_list().unwrap().len(), 2);

        assert_eq!(reg.to_positional("x/y/z plot", &named).unwrap(), positional);
    }

    #[test]
    fn extra_arguments_for_fixed_script_are_rejected() {
        let reg = registry();
        let err = reg
            .to_named("loopback", &[ParamValue::Int(2), ParamValue::Int(3)])
            .unwrap_err();
        assert!(matches!(err, CodecError::ArgumentMismatch(_)));
    }

    #[test]
    fn missing_named_arguments_become_null() {
        let reg = registry();
        let positional = reg.to_positional("x/y/z plot", &BTreeMap::new()).unwrap();
        assert_eq!(positional, vec![ParamValue::Null, ParamValue::Null]);
    }

    #[test]
    fn unknown_script_is_rejected() {
        let err = registry().to_named("ultimate upscale", &[]).unwrap_err();
        assert!(matches!(err, CodecError::ArgumentMismatch(_)));
    }
}
