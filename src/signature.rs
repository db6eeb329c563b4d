//! JSON-schema-driven request/response body validation.
//!
//! Schemas are a small recursive BLOCK structure (not full JSON Schema):
//! each field declares a type, whether it's required, an optional default,
//! and whether it should be dropped from the canonical re-emission. The
//! validator re-emits a canonical `Value` so handlers never see fields
//! the schema didn't name.

use serde_json::{Map, Value};

/// Maximum nesting depth a schema (and therefore a document) may reach.
const MAX_DEPTH: usize = 8;

/// Field name reserved for a schema's wildcard: matches any incoming key not
/// claimed by a named field, instead of the usual reject-or-drop-unknown
/// behavior.
const WILDCARD: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Null,
    String,
    Number,
    Bool,
    Date,
    Object,
    Array,
    Any,
}

impl FieldType {
    fn matches(self, value: &Value) -> bool {
        match self {
            FieldType::Null => value.is_null(),
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Date => value.as_str().is_some_and(is_iso8601_date),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
            FieldType::Any => true,
        }
    }
}

/// A crude ISO-8601 date/date-time check: calendar-range digits in the right
/// places, not a full leap-year-aware parse. Good enough to catch
/// malformed input without pulling in a date-parsing crate for one field
/// type.
fn is_iso8601_date(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() < 10 || !bytes[..4].iter().all(u8::is_ascii_digit) {
        return false;
    }
    if bytes[4] != b'-' || bytes[7] != b'-' {
        return false;
    }
    if !bytes[5..7].iter().all(u8::is_ascii_digit) || !bytes[8..10].iter().all(u8::is_ascii_digit) {
        return false;
    }
    let month: u32 = s[5..7].parse().unwrap_or(0);
    let day: u32 = s[8..10].parse().unwrap_or(0);
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return false;
    }
    bytes.len() == 10 || matches!(bytes[10], b'T' | b' ')
}

/// The validation pass a [`Schema`] is applied under; only matters for
/// [`DropRule::InContexts`], since the same BLOCK document can be reused for a
/// route's request body, its query string, and its response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationContext {
    Query,
    Request,
    Response,
}

/// Whether a field is dropped from the canonical re-emission.
#[derive(Debug, Clone, Default)]
pub enum DropRule {
    #[default]
    Never,
    Always,
    /// Dropped unless the validating role matches.
    ForRole(&'static str),
    /// Dropped only when validating under one of these contexts.
    InContexts(&'static [ValidationContext]),
}

impl DropRule {
    fn applies(&self, role: Option<&str>, context: ValidationContext) -> bool {
        match self {
            DropRule::Never => false,
            DropRule::Always => true,
            DropRule::ForRole(required) => role != Some(*required),
            DropRule::InContexts(contexts) => contexts.contains(&context),
        }
    }
}

/// Type and nested schema an array field's elements must satisfy. Absent
/// (`Field::of == None`) on an `Array` field means elements pass through
/// unchecked.
#[derive(Debug, Clone)]
pub struct ElementSpec {
    pub ty: FieldType,
    /// Nested schema, present when `ty` is `Object`.
    pub nested: Option<Schema>,
}

/// A single field in a [`Schema`] block.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
    pub default: Option<Value>,
    /// Drop this field from the canonical re-emission (accepted on input,
    /// never forwarded to the handler).
    pub drop: DropRule,
    /// Role required to set this field; requests from a different role
    /// have it silently reset to its default/absent.
    pub role: Option<&'static str>,
    /// Nested schema, present when `ty` is `Object`.
    pub nested: Option<Schema>,
    /// Element constraint, present when `ty` is `Array`.
    pub of: Option<ElementSpec>,
}

/// A named set of fields; the root of a schema or a nested object.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub fields: Vec<Field>,
    /// Reject documents containing fields not named by `fields`.
    pub strict: bool,
}

#[derive(Debug, PartialEq)]
pub(crate) enum ValidationError {
    TooDeep,
    NotAnObject,
    MissingField(String),
    WrongType(String),
    UnknownField(String),
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Validates `input` against this schema and returns the canonical
    /// re-emission, with defaults applied and dropped/role-gated fields
    /// removed, or absent.
    pub(crate) fn validate(
        &self,
        input: &Value,
        role: Option<&str>,
        context: ValidationContext,
    ) -> Result<Value, ValidationError> {
        self.validate_depth(input, role, context, 0)
    }

    fn validate_depth(
        &self,
        input: &Value,
        role: Option<&str>,
        context: ValidationContext,
        depth: usize,
    ) -> Result<Value, ValidationError> {
        if depth > MAX_DEPTH {
            return Err(ValidationError::TooDeep);
        }

        let Value::Object(input) = input else {
            return Err(ValidationError::NotAnObject);
        };

        let wildcard = self.fields.iter().find(|f| f.name == WILDCARD);

        if self.strict && wildcard.is_none() {
            for key in input.keys() {
                if !self.fields.iter().any(|f| f.name == key.as_str()) {
                    return Err(ValidationError::UnknownField(key.clone()));
                }
            }
        }

        let mut out = Map::new();
        let mut consumed: std::collections::HashSet<&str> = std::collections::HashSet::new();

        for field in self.fields.iter().filter(|f| f.name != WILDCARD) {
            consumed.insert(field.name);
            let present = input.get(field.name);

            let allowed_by_role = field
                .role
                .map(|required| role == Some(required))
                .unwrap_or(true);

            let value = match (present, allowed_by_role) {
                (Some(value), true) => value.clone(),
                (Some(_), false) | (None, _) => {
                    if field.required && allowed_by_role {
                        return Err(ValidationError::MissingField(field.name.to_string()));
                    }
                    match &field.default {
                        Some(default) => default.clone(),
                        None => continue,
                    }
                }
            };

            let validated = self.validate_field_value(field, &value, role, context, depth)?;
            if !field.drop.applies(role, context) {
                out.insert(field.name.to_string(), validated);
            }
        }

        if let Some(wildcard) = wildcard {
            let allowed_by_role = wildcard
                .role
                .map(|required| role == Some(required))
                .unwrap_or(true);
            if allowed_by_role {
                for (key, value) in input.iter() {
                    if consumed.contains(key.as_str()) {
                        continue;
                    }
                    let validated = self.validate_field_value(wildcard, value, role, context, depth)?;
                    if !wildcard.drop.applies(role, context) {
                        out.insert(key.clone(), validated);
                    }
                }
            }
        } else if !self.strict {
            for key in input.keys() {
                if !consumed.contains(key.as_str()) {
                    tracing::warn!(field = %key, "dropping unknown field not declared by schema");
                }
            }
        }

        Ok(Value::Object(out))
    }

    /// Type-checks (and, for `Object`/`Array` fields, recursively validates)
    /// a single field's value, independent of presence/role/drop handling.
    fn validate_field_value(
        &self,
        field: &Field,
        value: &Value,
        role: Option<&str>,
        context: ValidationContext,
        depth: usize,
    ) -> Result<Value, ValidationError> {
        if let Some(nested) = &field.nested {
            return nested.validate_depth(value, role, context, depth + 1);
        }

        if field.ty == FieldType::Array {
            let Value::Array(items) = value else {
                return Err(ValidationError::WrongType(field.name.to_string()));
            };
            let Some(of) = &field.of else {
                return Ok(value.clone());
            };
            let mut validated = Vec::with_capacity(items.len());
            for item in items {
                if let Some(nested) = &of.nested {
                    validated.push(nested.validate_depth(item, role, context, depth + 1)?);
                } else if of.ty.matches(item) {
                    validated.push(item.clone());
                } else {
                    return Err(ValidationError::WrongType(field.name.to_string()));
                }
            }
            return Ok(Value::Array(validated));
        }

        if !field.ty.matches(value) {
            return Err(ValidationError::WrongType(field.name.to_string()));
        }
        Ok(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user_schema() -> Schema {
        Schema::new()
            .field(Field {
                name: "username",
                ty: FieldType::String,
                required: true,
                default: None,
                drop: DropRule::Never,
                role: None,
                nested: None,
                of: None,
            })
            .field(Field {
                name: "is_admin",
                ty: FieldType::Bool,
                required: false,
                default: Some(json!(false)),
                drop: DropRule::Never,
                role: Some("admin"),
                nested: None,
                of: None,
            })
            .strict()
    }

    #[test]
    fn rejects_missing_required_field() {
        let schema = user_schema();
        let result = schema.validate(&json!({}), None, ValidationContext::Request);
        assert_eq!(result, Err(ValidationError::MissingField("username".into())));
    }

    #[test]
    fn rejects_unknown_field_in_strict_mode() {
        let schema = user_schema();
        let result = schema.validate(&json!({"username": "a", "extra": 1}), None, ValidationContext::Request);
        assert_eq!(result, Err(ValidationError::UnknownField("extra".into())));
    }

    #[test]
    fn role_gated_field_resets_to_default_for_other_roles() {
        let schema = user_schema();
        let result = schema
            .validate(&json!({"username": "a", "is_admin": true}), Some("guest"), ValidationContext::Request)
            .unwrap();
        assert_eq!(result["is_admin"], json!(false));
    }

    #[test]
    fn role_gated_field_is_honored_for_matching_role() {
        let schema = user_schema();
        let result = schema
            .validate(&json!({"username": "a", "is_admin": true}), Some("admin"), ValidationContext::Request)
            .unwrap();
        assert_eq!(result["is_admin"], json!(true));
    }

    #[test]
    fn depth_limit_is_enforced() {
        let mut schema = Schema::new();
        for _ in 0..=MAX_DEPTH {
            schema = Schema::new().field(Field {
                name: "nested",
                ty: FieldType::Object,
                required: true,
                default: None,
                drop: DropRule::Never,
                role: None,
                nested: Some(schema),
                of: None,
            });
        }

        let mut value = json!({});
        for _ in 0..=MAX_DEPTH {
            value = json!({ "nested": value });
        }

        assert_eq!(
            schema.validate(&value, None, ValidationContext::Request),
            Err(ValidationError::TooDeep)
        );
    }

    #[test]
    fn wildcard_field_accepts_any_unnamed_key() {
        let schema = Schema::new()
            .field(Field {
                name: "id",
                ty: FieldType::Number,
                required: true,
                default: None,
                drop: DropRule::Never,
                role: None,
                nested: None,
                of: None,
            })
            .field(Field {
                name: "*",
                ty: FieldType::String,
                required: false,
                default: None,
                drop: DropRule::Never,
                role: None,
                nested: None,
                of: None,
            })
            .strict();

        let result = schema
            .validate(&json!({"id": 1, "note": "hi"}), None, ValidationContext::Request)
            .unwrap();
        assert_eq!(result["note"], json!("hi"));
    }

    #[test]
    fn wildcard_rejects_a_value_of_the_wrong_type() {
        let schema = Schema::new()
            .field(Field {
                name: "*",
                ty: FieldType::String,
                required: false,
                default: None,
                drop: DropRule::Never,
                role: None,
                nested: None,
                of: None,
            })
            .strict();

        let result = schema.validate(&json!({"extra": 1}), None, ValidationContext::Request);
        assert_eq!(result, Err(ValidationError::WrongType("extra".into())));
    }

    #[test]
    fn array_field_validates_each_element_against_of() {
        let schema = Schema::new().field(Field {
            name: "tags",
            ty: FieldType::Array,
            required: true,
            default: None,
            drop: DropRule::Never,
            role: None,
            nested: None,
            of: Some(ElementSpec { ty: FieldType::String, nested: None }),
        });

        let ok = schema.validate(&json!({"tags": ["a", "b"]}), None, ValidationContext::Request);
        assert!(ok.is_ok());

        let bad = schema.validate(&json!({"tags": ["a", 2]}), None, ValidationContext::Request);
        assert_eq!(bad, Err(ValidationError::WrongType("tags".into())));
    }

    #[test]
    fn untyped_array_passes_through_without_of() {
        let schema = Schema::new().field(Field {
            name: "mixed",
            ty: FieldType::Array,
            required: true,
            default: None,
            drop: DropRule::Never,
            role: None,
            nested: None,
            of: None,
        });

        let result = schema
            .validate(&json!({"mixed": ["a", 1, true]}), None, ValidationContext::Request)
            .unwrap();
        assert_eq!(result["mixed"], json!(["a", 1, true]));
    }

    #[test]
    fn drop_in_contexts_hides_field_only_in_named_contexts() {
        static RESPONSE_ONLY: &[ValidationContext] = &[ValidationContext::Response];
        let schema = Schema::new().field(Field {
            name: "password",
            ty: FieldType::String,
            required: true,
            default: None,
            drop: DropRule::InContexts(RESPONSE_ONLY),
            role: None,
            nested: None,
            of: None,
        });

        let request = schema
            .validate(&json!({"password": "secret"}), None, ValidationContext::Request)
            .unwrap();
        assert_eq!(request["password"], json!("secret"));

        let response = schema
            .validate(&json!({"password": "secret"}), None, ValidationContext::Response)
            .unwrap();
        assert!(response.get("password").is_none());
    }

    #[test]
    fn date_field_requires_a_parseable_calendar_date() {
        let schema = Schema::new().field(Field {
            name: "born",
            ty: FieldType::Date,
            required: true,
            default: None,
            drop: DropRule::Never,
            role: None,
            nested: None,
            of: None,
        });

        assert!(schema.validate(&json!({"born": "2024-01-15"}), None, ValidationContext::Request).is_ok());
        assert_eq!(
            schema.validate(&json!({"born": "2024-13-01"}), None, ValidationContext::Request),
            Err(ValidationError::WrongType("born".into()))
        );
    }
}
