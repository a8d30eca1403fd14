//! Explicit tool input schemas.
//!
//! Each tool declares its arguments as named fields with a [`FieldKind`].
//! The same declaration renders the JSON Schema sent to the model and checks
//! the arguments the model sends back.

use serde_json::{json, Map, Value};

/// Expected JSON shape of a tool argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    /// Any JSON value.
    Any,
}

impl FieldKind {
    /// JSON Schema `type` keyword, or `None` for [`FieldKind::Any`].
    pub fn json_type(self) -> Option<&'static str> {
        match self {
            FieldKind::String => Some("string"),
            FieldKind::Number => Some("number"),
            FieldKind::Integer => Some("integer"),
            FieldKind::Boolean => Some("boolean"),
            FieldKind::Array => Some("array"),
            FieldKind::Object => Some("object"),
            FieldKind::Any => None,
        }
    }

    pub fn matches(self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Array => value.is_array(),
            FieldKind::Object => value.is_object(),
            FieldKind::Any => true,
        }
    }
}

/// One declared argument.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub description: String,
    pub kind: FieldKind,
    pub required: bool,
}

/// Ordered argument declarations for a tool.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InputSchema {
    fields: Vec<FieldSpec>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required field (builder pattern).
    pub fn required(mut self, name: &str, kind: FieldKind, description: &str) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            description: description.to_string(),
            kind,
            required: true,
        });
        self
    }

    /// Add an optional field (builder pattern).
    pub fn optional(mut self, name: &str, kind: FieldKind, description: &str) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            description: description.to_string(),
            kind,
            required: false,
        });
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// First field name declared more than once, if any.
    pub fn duplicate_field(&self) -> Option<&str> {
        self.fields.iter().enumerate().find_map(|(i, f)| {
            self.fields[..i]
                .iter()
                .any(|prev| prev.name == f.name)
                .then_some(f.name.as_str())
        })
    }

    /// Render as a JSON Schema object.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for f in &self.fields {
            let mut prop = Map::new();
            if let Some(t) = f.kind.json_type() {
                prop.insert("type".into(), json!(t));
            }
            if !f.description.is_empty() {
                prop.insert("description".into(), json!(f.description));
            }
            properties.insert(f.name.clone(), Value::Object(prop));
        }
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check model-supplied arguments against the declaration.
    ///
    /// Returns a human-readable reason on the first violation. Undeclared
    /// extra arguments are tolerated.
    pub fn validate(&self, arguments: &Value) -> Result<(), String> {
        let args = arguments
            .as_object()
            .ok_or_else(|| format!("arguments must be an object, got {}", type_name(arguments)))?;

        for f in &self.fields {
            match args.get(&f.name) {
                None if f.required => {
                    return Err(format!("missing required argument '{}'", f.name));
                }
                None => {}
                Some(v) if !f.kind.matches(v) => {
                    return Err(format!(
                        "argument '{}' must be {}, got {}",
                        f.name,
                        f.kind.json_type().unwrap_or("any"),
                        type_name(v)
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expression_schema() -> InputSchema {
        InputSchema::new()
            .required("expression", FieldKind::String, "Code to run")
            .optional("verbose", FieldKind::Boolean, "")
    }

    #[test]
    fn test_json_schema_shape() {
        let schema = expression_schema().to_json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["expression"]["type"], "string");
        assert_eq!(schema["properties"]["expression"]["description"], "Code to run");
        assert!(schema["properties"]["verbose"].get("description").is_none());
        assert_eq!(schema["required"], json!(["expression"]));
    }

    #[test]
    fn test_any_field_has_no_type() {
        let schema = InputSchema::new()
            .required("answer", FieldKind::Any, "The final answer to submit")
            .to_json_schema();
        assert!(schema["properties"]["answer"].get("type").is_none());
    }

    #[test]
    fn test_validate_ok() {
        assert!(expression_schema().validate(&json!({"expression": "1+1"})).is_ok());
        assert!(expression_schema()
            .validate(&json!({"expression": "1", "extra": 3}))
            .is_ok());
    }

    #[test]
    fn test_validate_missing_required() {
        let err = expression_schema().validate(&json!({})).unwrap_err();
        assert!(err.contains("missing required argument 'expression'"));
    }

    #[test]
    fn test_validate_wrong_type() {
        let err = expression_schema()
            .validate(&json!({"expression": 42}))
            .unwrap_err();
        assert!(err.contains("must be string"));
        assert!(err.contains("number"));
    }

    #[test]
    fn test_validate_not_object() {
        let err = expression_schema().validate(&json!("1+1")).unwrap_err();
        assert!(err.contains("must be an object"));
    }

    #[test]
    fn test_any_accepts_null() {
        let schema = InputSchema::new().required("answer", FieldKind::Any, "");
        assert!(schema.validate(&json!({"answer": null})).is_ok());
        assert!(schema.validate(&json!({"answer": ["a", 1]})).is_ok());
    }

    #[test]
    fn test_duplicate_field() {
        let schema = InputSchema::new()
            .required("a", FieldKind::String, "")
            .optional("a", FieldKind::Number, "");
        assert_eq!(schema.duplicate_field(), Some("a"));
        assert_eq!(expression_schema().duplicate_field(), None);
    }

    #[test]
    fn test_integer_kind() {
        assert!(FieldKind::Integer.matches(&json!(3)));
        assert!(!FieldKind::Integer.matches(&json!(3.5)));
        assert!(FieldKind::Number.matches(&json!(3.5)));
    }
}
