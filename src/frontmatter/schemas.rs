use jsonschema::Validator;
use lazy_static::lazy_static;
use serde_json::json;

/// Titles longer than this still load, with a warning
pub const MAX_TITLE_LENGTH: usize = 100;
pub const MIN_TITLE_LENGTH: usize = 3;
pub const MAX_DESCRIPTION_LENGTH: usize = 500;
pub const MAX_TAGS: usize = 10;

lazy_static! {
    /// Advisory schema: every violation becomes a warning, never an error.
    /// The one blocking rule (a non-empty title) is checked by the parser.
    pub static ref ADVISORY_SCHEMA: serde_json::Value = json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "Prompt Metadata (advisory)",
        "type": "object",
        "properties": {
            "title": {
                "type": "string",
                "minLength": MIN_TITLE_LENGTH,
                "maxLength": MAX_TITLE_LENGTH,
                "description": "Prompt title"
            },
            "description": {
                "type": "string",
                "maxLength": MAX_DESCRIPTION_LENGTH
            },
            "category": {
                "type": "string",
                "pattern": "^[A-Za-z0-9 _/-]+$",
                "description": "Letters, digits, spaces, '_', '-' and '/' only"
            },
            "tags": {
                "type": "array",
                "maxItems": MAX_TAGS,
                "uniqueItems": true,
                "items": {
                    "type": "string",
                    "pattern": "^[A-Za-z0-9_-]+$"
                }
            },
            "author": { "type": "string" },
            "version": {
                "type": "string",
                "pattern": "^[0-9]+(\\.[0-9]+){0,2}([-+][0-9A-Za-z.-]+)?$"
            },
            "parameters": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name"],
                    "properties": {
                        "name": {
                            "type": "string",
                            "pattern": "^[A-Za-z_][A-Za-z0-9_]*$"
                        },
                        "type": {
                            "type": "string",
                            "enum": ["string", "number", "boolean", "select", "multiline"]
                        }
                    }
                }
            }
        }
    });

    /// [`ADVISORY_SCHEMA`] compiled on first use, shared by every parse.
    pub static ref ADVISORY_VALIDATOR: Result<Validator, String> =
        Validator::new(&ADVISORY_SCHEMA).map_err(|e| e.to_string());
}
