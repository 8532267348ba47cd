use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Boolean,
    Number,
}

impl FieldKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Boolean => value.is_boolean(),
            Self::Number => value.is_number(),
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Number => "number",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldSpec {
    pub fn required(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
        }
    }

    pub fn optional(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
        }
    }
}

/// Declares the shape of per-member presence data as plain schema values, so
/// server and client validate against the same contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSchema {
    fields: Vec<FieldSpec>,
}

impl MemberSchema {
    pub const fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Whether the schema carries the required string `id` every member
    /// needs as its stable identity.
    pub fn declares_id(&self) -> bool {
        self.fields
            .iter()
            .any(|f| f.name == "id" && f.required && f.kind == FieldKind::String)
    }

    /// Checks `data` against the declared fields. Unknown fields are
    /// tolerated; `null` counts as absent.
    pub fn validate(&self, data: &Value) -> Result<(), ProtocolError> {
        let object = data
            .as_object()
            .ok_or_else(|| ProtocolError::SchemaMismatch("member data must be an object".into()))?;

        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        return Err(ProtocolError::SchemaMismatch(format!(
                            "missing required field '{}'",
                            field.name
                        )));
                    }
                }
                Some(value) => {
                    if !field.kind.matches(value) {
                        return Err(ProtocolError::SchemaMismatch(format!(
                            "field '{}' is not a {}",
                            field.name,
                            field.kind.label()
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

/// A present participant on a channel: the stable id plus the full
/// schema-shaped data it was granted with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub data: Value,
}

impl Member {
    pub fn from_value(data: Value) -> Result<Self, ProtocolError> {
        let id = data
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProtocolError::SchemaMismatch("member data carries no string 'id'".into())
            })?
            .to_string();

        Ok(Self { id, data })
    }
}
