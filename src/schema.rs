//! Typed view of tool input schemas and argument validation.
//!
//! Tools declare their inputs as JSON Schema objects. Before a tool runs, the
//! arguments the model produced are checked against that schema so a tool
//! never sees a value of the wrong shape.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Structural type IR derived from a JSON Schema subset.
///
/// Anything this does not understand becomes `Ty::Any`, which accepts every
/// value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Ty {
    /// Unknown or too complex type.
    Any,
    /// Explicit JSON `null`.
    Null,
    String,
    Integer,
    Number,
    Boolean,
    Array(Box<Ty>),
    Object {
        /// Known object properties and their types.
        properties: BTreeMap<String, Ty>,
        /// Properties that must be present.
        required: BTreeSet<String>,
        /// Whether additional, unknown properties are allowed.
        additional: bool,
    },
    /// A union of multiple possible types (e.g. anyOf/oneOf or ["string", "null"]).
    Union(Vec<Ty>),
}

impl Ty {
    /// Construct a `Ty` from a JSON Schema-like value.
    ///
    /// Understood:
    /// - `type`: "string" | "integer" | "number" | "boolean" | "null"
    /// - `type`: "array" with `items`
    /// - `type`: "object" with `properties`, `required` and `additionalProperties`
    /// - `type`: [ ... ] of primitive type strings (treated as `Union`)
    /// - `anyOf` / `oneOf` (treated as `Union`)
    pub fn from_json_schema(schema: &Value) -> Ty {
        fn simple_type(s: &str) -> Ty {
            match s {
                "string" => Ty::String,
                "integer" => Ty::Integer,
                "number" => Ty::Number,
                "boolean" => Ty::Boolean,
                "null" => Ty::Null,
                "array" => Ty::Array(Box::new(Ty::Any)),
                "object" => Ty::Object {
                    properties: BTreeMap::new(),
                    required: BTreeSet::new(),
                    additional: true,
                },
                _ => Ty::Any,
            }
        }

        fn union_of(mut tys: Vec<Ty>) -> Ty {
            match tys.len() {
                0 => Ty::Any,
                1 => tys.remove(0),
                _ => Ty::Union(tys),
            }
        }

        match schema.get("type") {
            Some(Value::String(s)) if s == "array" => {
                let item_ty = schema
                    .get("items")
                    .map(Ty::from_json_schema)
                    .unwrap_or(Ty::Any);
                Ty::Array(Box::new(item_ty))
            }
            Some(Value::String(s)) if s == "object" => {
                let properties = match schema.get("properties") {
                    Some(Value::Object(map)) => map
                        .iter()
                        .map(|(name, prop)| (name.clone(), Ty::from_json_schema(prop)))
                        .collect(),
                    _ => BTreeMap::new(),
                };
                let required = match schema.get("required") {
                    Some(Value::Array(names)) => names
                        .iter()
                        .filter_map(|n| n.as_str().map(str::to_string))
                        .collect(),
                    _ => BTreeSet::new(),
                };
                // A schema-valued `additionalProperties` counts as "allowed".
                let additional = schema
                    .get("additionalProperties")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);

                Ty::Object {
                    properties,
                    required,
                    additional,
                }
            }
            Some(Value::String(s)) => simple_type(s),
            Some(Value::Array(arr)) => {
                union_of(arr.iter().filter_map(Value::as_str).map(simple_type).collect())
            }
            Some(_) => Ty::Any,
            None => match schema.get("anyOf").or_else(|| schema.get("oneOf")) {
                Some(Value::Array(variants)) => {
                    union_of(variants.iter().map(Ty::from_json_schema).collect())
                }
                _ => Ty::Any,
            },
        }
    }

    /// Check a value against this type.
    ///
    /// The error names the offending path, e.g. `days: expected integer`.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        self.check_at("", value)
    }

    fn check_at(&self, path: &str, value: &Value) -> Result<(), String> {
        let mismatch = |expected: &str| {
            let at = if path.is_empty() { "arguments" } else { path };
            Err(format!("{}: expected {}, got {}", at, expected, json_kind(value)))
        };

        match self {
            Ty::Any => Ok(()),
            Ty::Null => {
                if value.is_null() {
                    Ok(())
                } else {
                    mismatch("null")
                }
            }
            Ty::String => {
                if value.is_string() {
                    Ok(())
                } else {
                    mismatch("string")
                }
            }
            Ty::Integer => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(()),
                Value::Number(n) if n.as_f64().is_some_and(|f| f.fract() == 0.0) => Ok(()),
                _ => mismatch("integer"),
            },
            Ty::Number => {
                if value.is_number() {
                    Ok(())
                } else {
                    mismatch("number")
                }
            }
            Ty::Boolean => {
                if value.is_boolean() {
                    Ok(())
                } else {
                    mismatch("boolean")
                }
            }
            Ty::Array(item) => match value {
                Value::Array(items) => {
                    for (i, v) in items.iter().enumerate() {
                        item.check_at(&format!("{}[{}]", path, i), v)?;
                    }
                    Ok(())
                }
                _ => mismatch("array"),
            },
            Ty::Object {
                properties,
                required,
                additional,
            } => match value {
                Value::Object(map) => check_object(path, properties, required, *additional, map),
                _ => mismatch("object"),
            },
            Ty::Union(variants) => {
                if variants.iter().any(|v| v.check_at(path, value).is_ok()) {
                    Ok(())
                } else {
                    mismatch("one of the allowed types")
                }
            }
        }
    }
}

fn check_object(
    path: &str,
    properties: &BTreeMap<String, Ty>,
    required: &BTreeSet<String>,
    additional: bool,
    map: &Map<String, Value>,
) -> Result<(), String> {
    let join = |key: &str| {
        if path.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", path, key)
        }
    };

    for name in required {
        match map.get(name) {
            None | Some(Value::Null) => {
                return Err(format!("missing required property `{}`", join(name)));
            }
            Some(_) => {}
        }
    }

    for (key, value) in map {
        match properties.get(key) {
            // Optional properties may be sent as explicit nulls.
            Some(_) if value.is_null() && !required.contains(key) => {}
            Some(ty) => ty.check_at(&join(key), value)?,
            None if !additional => {
                return Err(format!("unexpected property `{}`", join(key)));
            }
            None => {}
        }
    }

    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validate a tool's argument object against its declared input schema.
pub fn validate_arguments(schema: &Map<String, Value>, args: &Map<String, Value>) -> Result<(), String> {
    let ty = Ty::from_json_schema(&Value::Object(schema.clone()));
    ty.check(&Value::Object(args.clone()))
}

/// Parse the raw argument text a model produced into a JSON object.
///
/// Models occasionally send an empty string for tools without parameters;
/// that is treated as `{}`.
pub fn parse_arguments(raw: &str) -> Result<Map<String, Value>, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("arguments must be a JSON object, got {}", json_kind(&other))),
        Err(e) => Err(format!("arguments are not valid JSON: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn time_schema() -> Map<String, Value> {
        json!({
            "type": "object",
            "properties": {
                "timeZoneId": { "type": "string" }
            },
            "required": ["timeZoneId"],
            "additionalProperties": false
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_object_schema_is_parsed() {
        let ty = Ty::from_json_schema(&Value::Object(time_schema()));
        match ty {
            Ty::Object {
                properties,
                required,
                additional,
            } => {
                assert_eq!(properties.get("timeZoneId"), Some(&Ty::String));
                assert!(required.contains("timeZoneId"));
                assert!(!additional);
            }
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn test_union_from_type_array() {
        let ty = Ty::from_json_schema(&json!({ "type": ["string", "null"] }));
        assert_eq!(ty, Ty::Union(vec![Ty::String, Ty::Null]));
    }

    #[test]
    fn test_unknown_schema_is_any() {
        let ty = Ty::from_json_schema(&json!({ "format": "date" }));
        assert_eq!(ty, Ty::Any);
        assert!(ty.check(&json!(42)).is_ok());
    }

    #[test]
    fn test_valid_arguments_pass() {
        let args = json!({ "timeZoneId": "Asia/Shanghai" });
        assert!(validate_arguments(&time_schema(), args.as_object().unwrap()).is_ok());
    }

    #[test]
    fn test_missing_required_argument() {
        let err = validate_arguments(&time_schema(), &Map::new()).unwrap_err();
        assert!(err.contains("timeZoneId"), "{}", err);
    }

    #[test]
    fn test_wrong_type_argument() {
        let args = json!({ "timeZoneId": 8 });
        let err = validate_arguments(&time_schema(), args.as_object().unwrap()).unwrap_err();
        assert_eq!(err, "timeZoneId: expected string, got number");
    }

    #[test]
    fn test_unexpected_property_rejected() {
        let args = json!({ "timeZoneId": "UTC", "city": "Beijing" });
        let err = validate_arguments(&time_schema(), args.as_object().unwrap()).unwrap_err();
        assert!(err.contains("unexpected property `city`"));
    }

    #[test]
    fn test_integer_accepts_integral_float() {
        assert!(Ty::Integer.check(&json!(3)).is_ok());
        assert!(Ty::Integer.check(&json!(3.0)).is_ok());
        assert!(Ty::Integer.check(&json!(3.5)).is_err());
    }

    #[test]
    fn test_optional_null_is_accepted() {
        let schema = json!({
            "type": "object",
            "properties": { "days": { "type": "integer" } }
        });
        let args = json!({ "days": null });
        assert!(
            validate_arguments(schema.as_object().unwrap(), args.as_object().unwrap()).is_ok()
        );
    }

    #[test]
    fn test_nested_array_path_in_error() {
        let ty = Ty::from_json_schema(&json!({
            "type": "object",
            "properties": {
                "cities": { "type": "array", "items": { "type": "string" } }
            }
        }));
        let err = ty.check(&json!({ "cities": ["Beijing", 1] })).unwrap_err();
        assert_eq!(err, "cities[1]: expected string, got number");
    }

    #[test]
    fn test_parse_arguments() {
        assert!(parse_arguments("").unwrap().is_empty());
        assert_eq!(
            parse_arguments(r#"{"timeZoneId":"UTC"}"#).unwrap()["timeZoneId"],
            "UTC"
        );
        assert!(parse_arguments("[1,2]").is_err());
        assert!(parse_arguments("{not json").is_err());
    }
}
