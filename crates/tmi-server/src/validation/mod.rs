//! Decode → prohibited-field check → required-field check → custom
//! validators pipeline, plus the note-markdown and metadata-key
//! validators.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
}

pub type CustomValidator = fn(&Map<String, Value>) -> Result<(), String>;

pub struct ValidatorConfig {
    pub prohibited_fields: &'static [(&'static str, &'static str)],
    pub required_fields: &'static [&'static str],
    pub custom_validators: &'static [CustomValidator],
    pub allow_owner_field: bool,
    pub operation: Operation,
}

impl ValidatorConfig {
    /// `POST /threat_models`: rejects `id`, `owner`, timestamps, aggregate
    /// counts, and sub-resource arrays.
    pub const THREAT_MODEL_CREATE: ValidatorConfig = ValidatorConfig {
        prohibited_fields: &[
            ("id", "The id field is set automatically and cannot be provided."),
            ("owner", "The owner field is set automatically to the authenticated user during creation."),
            ("created_at", "The created_at field is set automatically and cannot be provided."),
            ("modified_at", "The modified_at field is set automatically and cannot be provided."),
            ("threats", "Sub-resource arrays cannot be set on create; use the sub-resource endpoints."),
            ("documents", "Sub-resource arrays cannot be set on create; use the sub-resource endpoints."),
            ("repositories", "Sub-resource arrays cannot be set on create; use the sub-resource endpoints."),
        ],
        required_fields: &["name", "framework"],
        custom_validators: &[],
        allow_owner_field: false,
        operation: Operation::Create,
    };

    pub const THREAT_MODEL_UPDATE: ValidatorConfig = ValidatorConfig {
        prohibited_fields: &[
            ("id", "The id field cannot be modified."),
            ("created_at", "The created_at field cannot be modified."),
            ("created_by", "The created_by field cannot be modified."),
        ],
        required_fields: &["name", "framework"],
        custom_validators: &[],
        allow_owner_field: true,
        operation: Operation::Update,
    };

    pub const THREAT_CREATE: ValidatorConfig = ValidatorConfig {
        prohibited_fields: &[
            ("id", "The id field is set automatically and cannot be provided."),
            ("created_at", "The created_at field is set automatically and cannot be provided."),
            ("modified_at", "The modified_at field is set automatically and cannot be provided."),
        ],
        required_fields: &["name", "severity"],
        custom_validators: &[],
        allow_owner_field: false,
        operation: Operation::Create,
    };

    pub const THREAT_UPDATE: ValidatorConfig = ValidatorConfig {
        prohibited_fields: &[("id", "The id field cannot be modified.")],
        required_fields: &["name", "severity"],
        custom_validators: &[],
        allow_owner_field: false,
        operation: Operation::Update,
    };

    pub const DOCUMENT_CREATE: ValidatorConfig = ValidatorConfig {
        prohibited_fields: &[("id", "The id field is set automatically and cannot be provided.")],
        required_fields: &["name", "uri"],
        custom_validators: &[],
        allow_owner_field: false,
        operation: Operation::Create,
    };

    pub const DOCUMENT_UPDATE: ValidatorConfig = ValidatorConfig {
        prohibited_fields: &[("id", "The id field cannot be modified.")],
        required_fields: &["name", "uri"],
        custom_validators: &[],
        allow_owner_field: false,
        operation: Operation::Update,
    };

    pub const REPOSITORY_CREATE: ValidatorConfig = ValidatorConfig {
        prohibited_fields: &[("id", "The id field is set automatically and cannot be provided.")],
        required_fields: &["name", "uri", "type"],
        custom_validators: &[],
        allow_owner_field: false,
        operation: Operation::Create,
    };

    pub const REPOSITORY_UPDATE: ValidatorConfig = ValidatorConfig {
        prohibited_fields: &[("id", "The id field cannot be modified.")],
        required_fields: &["name", "uri", "type"],
        custom_validators: &[],
        allow_owner_field: false,
        operation: Operation::Update,
    };

    pub const DIAGRAM_CREATE: ValidatorConfig = ValidatorConfig {
        prohibited_fields: &[("id", "The id field is set automatically and cannot be provided.")],
        required_fields: &["name", "type"],
        custom_validators: &[],
        allow_owner_field: false,
        operation: Operation::Create,
    };

    pub const DIAGRAM_UPDATE: ValidatorConfig = ValidatorConfig {
        prohibited_fields: &[("id", "The id field cannot be modified.")],
        required_fields: &["name", "type"],
        custom_validators: &[],
        allow_owner_field: false,
        operation: Operation::Update,
    };

    pub const METADATA_CREATE: ValidatorConfig = ValidatorConfig {
        prohibited_fields: &[],
        required_fields: &["key", "value"],
        custom_validators: &[validate_metadata_key],
        allow_owner_field: false,
        operation: Operation::Create,
    };

    pub const METADATA_UPDATE: ValidatorConfig = ValidatorConfig {
        prohibited_fields: &[],
        required_fields: &["value"],
        custom_validators: &[],
        allow_owner_field: false,
        operation: Operation::Update,
    };
}

/// Steps 1–4 of the validation pipeline. `raw` is the already-decoded JSON
/// body (step 1's decode failure is handled by the caller before this runs,
/// since axum's extractor does that uniformly).
pub fn validate_request(cfg: &ValidatorConfig, raw: &Map<String, Value>) -> Result<(), ApiError> {
    for (field, message) in cfg.prohibited_fields {
        if field == &"owner" && cfg.allow_owner_field {
            continue;
        }
        if raw.contains_key(*field) {
            return Err(ApiError::InvalidInput(message.to_string()));
        }
    }

    let missing: Vec<&str> = cfg.required_fields.iter().filter(|f| !raw.contains_key(**f)).copied().collect();
    if !missing.is_empty() {
        let message = match missing.as_slice() {
            [one] => format!("Field '{one}' is required."),
            many => {
                let joined = many.join("' and '");
                format!("Fields '{joined}' are required")
            },
        };
        return Err(ApiError::MissingParameters(message));
    }

    for validator in cfg.custom_validators {
        validator(raw).map_err(ApiError::InvalidInput)?;
    }

    Ok(())
}

static METADATA_KEY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

pub fn validate_metadata_key(raw: &Map<String, Value>) -> Result<(), String> {
    let Some(Value::String(key)) = raw.get("key") else {
        return Ok(());
    };
    if METADATA_KEY_RE.is_match(key) {
        Ok(())
    } else {
        Err(format!("Metadata key '{key}' does not match the required pattern ^[A-Za-z0-9_-]+$"))
    }
}

/// Non-code-block text matching `{{…}}`, `${…}`, or `<%…%>` is rejected;
/// HTML passes through (downstream sanitization handles it).
static TEMPLATE_EXPR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{.*?\}\}|\$\{.*?\}|<%.*?%>").unwrap());
static CODE_BLOCK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```.*?```|`[^`]*`").unwrap());

pub fn validate_note_markdown(content: &str) -> Result<(), ApiError> {
    let stripped = CODE_BLOCK_RE.replace_all(content, "");
    if TEMPLATE_EXPR_RE.is_match(&stripped) {
        return Err(ApiError::InvalidInput(
            "Note content contains a template expression outside a code block.".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prohibited_field_yields_specific_message() {
        let raw = json!({"id": "x", "name": "n", "framework": "STRIDE"}).as_object().unwrap().clone();
        let err = validate_request(&ValidatorConfig::THREAT_MODEL_CREATE, &raw).unwrap_err();
        assert!(err.to_string().contains("set automatically"));
    }

    #[test]
    fn missing_required_fields_are_joined() {
        let raw = Map::new();
        let err = validate_request(&ValidatorConfig::THREAT_MODEL_CREATE, &raw).unwrap_err();
        assert!(err.to_string().contains("'name' and 'framework' are required"));
    }

    #[test]
    fn metadata_key_validator_rejects_bad_characters() {
        let raw = json!({"key": "bad key!", "value": "v"}).as_object().unwrap().clone();
        let err = validate_request(&ValidatorConfig::METADATA_CREATE, &raw).unwrap_err();
        assert!(err.kind() == "invalid_input");
    }

    #[test]
    fn note_markdown_rejects_template_expressions_outside_code() {
        assert!(validate_note_markdown("plain {{evil}} text").is_err());
        assert!(validate_note_markdown("fine `{{not evaluated}}` text").is_ok());
        assert!(validate_note_markdown("<b>html ok</b>").is_ok());
    }

    #[test]
    fn update_config_allows_owner_field() {
        let raw = json!({"owner": "x", "name": "n", "framework": "STRIDE"}).as_object().unwrap().clone();
        assert!(validate_request(&ValidatorConfig::THREAT_MODEL_UPDATE, &raw).is_ok());
    }
}
