//! Declarative configuration forms for drive types.
//!
//! Each registered drive type describes the configuration it needs as a
//! list of [`FormItem`]s. A UI renders the form generically; the registry
//! validates submitted values against it before calling the factory.

use serde::{Deserialize, Serialize};

use super::registry::DriveConfig;

/// A single configuration field with metadata for rendering and validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormItem {
    /// Key of the value in the drive's [`DriveConfig`].
    pub field: String,
    /// Human-readable label displayed next to the input.
    pub label: String,
    /// Optional help text shown below the field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The input type and any type-specific constraints.
    pub field_type: FieldType,
    /// Whether the field must be non-empty before the drive is created.
    #[serde(default)]
    pub required: bool,
    /// Default value used when the field is left empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

impl FormItem {
    /// A plain text field.
    pub fn text(field: &str, label: &str, required: bool) -> Self {
        Self {
            field: field.to_string(),
            label: label.to_string(),
            description: None,
            field_type: FieldType::Text,
            required,
            default_value: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

/// Type of a form field, determining the UI widget.
///
/// Serialized as a tagged enum: `{"type": "text"}`, `{"type": "select", "options": [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FieldType {
    Text,
    Password,
    Textarea,
    Checkbox,
    Select {
        options: Vec<SelectOption>,
    },
}

/// An option in a [`FieldType::Select`] dropdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

/// Validate a drive config against its form.
///
/// Returns one message per problem; an empty list means the config is valid.
pub fn validate_config(form: &[FormItem], config: &DriveConfig) -> Vec<String> {
    let mut errors = Vec::new();
    for item in form {
        let value = config
            .get(&item.field)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty());

        let Some(value) = value else {
            if item.required && item.default_value.is_none() {
                errors.push(format!("{} is required", item.label));
            }
            continue;
        };

        match &item.field_type {
            FieldType::Checkbox => {
                if value != "true" && value != "false" {
                    errors.push(format!("{} must be true or false", item.label));
                }
            }
            FieldType::Select { options } => {
                if !options.iter().any(|o| o.value == value) {
                    errors.push(format!("{} has an invalid option: {}", item.label, value));
                }
            }
            FieldType::Text | FieldType::Password | FieldType::Textarea => {}
        }
    }
    errors
}
