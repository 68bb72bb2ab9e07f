use serde_json::Value;

use crate::GatewayError;

/// ~2,500 tokens; applies to prompt-class fields.
pub const MAX_PROMPT_CHARS: usize = 10_000;
/// ~12,500 tokens; applies to bulk text fields.
pub const MAX_TEXT_CHARS: usize = 50_000;

/// Validation rule for one payload field. Operations declare their rules
/// statically; the guard applies them uniformly.
#[derive(Clone, Copy, Debug)]
pub struct FieldRule {
    pub name: &'static str,
    pub max_chars: usize,
    pub required: bool,
}

impl FieldRule {
    pub const fn prompt(name: &'static str) -> Self {
        Self {
            name,
            max_chars: MAX_PROMPT_CHARS,
            required: true,
        }
    }

    pub const fn text(name: &'static str) -> Self {
        Self {
            name,
            max_chars: MAX_TEXT_CHARS,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, max_chars: usize) -> Self {
        Self {
            name,
            max_chars,
            required: false,
        }
    }

    pub const fn short(name: &'static str) -> Self {
        Self {
            name,
            max_chars: 100,
            required: true,
        }
    }
}

pub fn validate_payload(rules: &[FieldRule], payload: &Value) -> Result<(), GatewayError> {
    let object = payload.as_object().ok_or_else(|| GatewayError::InvalidInput {
        field: "body".to_string(),
        reason: "request body must be a JSON object".to_string(),
    })?;

    for rule in rules {
        let value = match object.get(rule.name) {
            Some(value) => value,
            None if rule.required => {
                return Err(missing(rule.name));
            }
            None => continue,
        };
        let text = match value.as_str() {
            Some(text) if !text.is_empty() => text,
            Some(_) if rule.required => return Err(missing(rule.name)),
            Some(_) => continue,
            None => {
                return Err(GatewayError::InvalidInput {
                    field: rule.name.to_string(),
                    reason: "must be a string".to_string(),
                });
            }
        };
        if text.chars().count() > rule.max_chars {
            return Err(GatewayError::InvalidInput {
                field: rule.name.to_string(),
                reason: format!("exceeds maximum length of {} characters", rule.max_chars),
            });
        }
        if text.contains('\0') {
            return Err(GatewayError::InvalidInput {
                field: rule.name.to_string(),
                reason: "contains invalid characters".to_string(),
            });
        }
    }
    Ok(())
}

fn missing(field: &str) -> GatewayError {
    GatewayError::InvalidInput {
        field: field.to_string(),
        reason: "missing required field (string)".to_string(),
    }
}
