//! Tool argument schemas.
//!
//! A tool's parameter schema does two jobs: it is sent to the model so it
//! knows how to call the tool, and it gates every incoming call before the
//! executor runs. Missing properties that declare a `default` are filled in
//! first, so the executor always sees the same shape of value.

use serde_json::{Map, Value};
use tracing::warn;

/// Maximum number of individual violations reported in one error message.
const MAX_REPORTED_ERRORS: usize = 3;

/// Parse a model-issued argument string into JSON.
///
/// Models sometimes send an empty string for tools without parameters;
/// that is treated as an empty object.
pub fn parse_arguments(raw: &str) -> Result<Value, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(trimmed).map_err(|e| format!("arguments are not valid JSON: {e}"))
}

/// Fill in `default` values for missing object properties, recursively.
pub fn apply_defaults(schema: &Value, instance: &mut Value) {
    let Some(props) = schema.get("properties").and_then(Value::as_object) else {
        return;
    };
    let Value::Object(obj) = instance else {
        return;
    };

    for (key, prop_schema) in props {
        match obj.get_mut(key) {
            Some(existing) => apply_defaults(prop_schema, existing),
            None => {
                if let Some(default) = prop_schema.get("default") {
                    let mut value = default.clone();
                    apply_defaults(prop_schema, &mut value);
                    obj.insert(key.clone(), value);
                }
            }
        }
    }
}

/// Validate an instance against a JSON schema.
///
/// A schema that does not compile is logged and treated as permissive.
pub fn validate(schema: &Value, instance: &Value) -> Result<(), String> {
    if !schema.is_object() {
        return Ok(());
    }
    match jsonschema::JSONSchema::compile(schema) {
        Ok(compiled) => {
            if let Err(errors) = compiled.validate(instance) {
                let mut msgs = Vec::new();
                for err in errors {
                    let path = err.instance_path.to_string();
                    if path.is_empty() {
                        msgs.push(err.to_string());
                    } else {
                        msgs.push(format!("{} at {}", err, path));
                    }
                    if msgs.len() >= MAX_REPORTED_ERRORS {
                        break;
                    }
                }
                Err(msgs.join("; "))
            } else {
                Ok(())
            }
        }
        Err(e) => {
            warn!(error = %e, "Ignoring tool schema that failed to compile");
            Ok(())
        }
    }
}

/// Parse, default and validate raw arguments in one go.
pub fn prepare_arguments(schema: &Value, raw: &str) -> Result<Value, String> {
    let mut args = parse_arguments(raw)?;
    apply_defaults(schema, &mut args);
    validate(schema, &args)?;
    Ok(args)
}
