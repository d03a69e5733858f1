use std::collections::HashMap;

use axum::{
    Json,
    body::Bytes,
    extract::{FromRequest, Multipart, Request},
    http::header::CONTENT_TYPE,
};
use serde_json::Value;

use crate::{
    error::{AppError, AppResult},
    models::{Compound, NewCompound},
};

/// Name of the multipart part carrying the structure file.
pub const STRUCTURE_FILE_FIELD: &str = "structure_file";

/// parse_bool
///
/// Boolean-ish flag parsing shared by every endpoint: `"1"`, `"true"`, `"yes"` and `"on"`
/// (case-insensitive) are true, anything else is false, absence yields `default`.
pub fn parse_bool(raw: Option<&str>, default: bool) -> bool {
    match raw {
        None => default,
        Some(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
    }
}

/// Flattens a JSON value to the string form a form field would carry.
/// `null` becomes the empty string so that it clears the field like an empty input.
pub fn json_to_field(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// A file received through the `structure_file` multipart part.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// CompoundForm
///
/// Presence-preserving view of a compound create/update payload, from either a JSON object
/// or a `multipart/form-data` submission. `None` means the key was absent; `Some("")` means
/// it was sent empty, which clears the field on update.
#[derive(Debug, Clone, Default)]
pub struct CompoundForm {
    pub name: Option<String>,
    pub formula: Option<String>,
    pub smiles: Option<String>,
    pub description: Option<String>,
    pub molecular_weight: Option<String>,
    pub is_public: Option<String>,
    pub remove_structure_file: Option<String>,
    pub structure_file: Option<UploadedFile>,
}

/// Fields of a validated creation payload; the owner and storage key are filled in later.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundDraft {
    pub name: String,
    pub formula: String,
    pub smiles: String,
    pub molecular_weight: Option<f64>,
    pub description: String,
    pub is_public: bool,
}

impl CompoundDraft {
    pub fn into_new(self, owner_id: i64, structure_file: Option<String>) -> NewCompound {
        NewCompound {
            name: self.name,
            formula: self.formula,
            smiles: self.smiles,
            molecular_weight: self.molecular_weight,
            description: self.description,
            is_public: self.is_public,
            structure_file,
            owner_id,
        }
    }
}

fn trimmed(value: &Option<String>) -> String {
    value.as_deref().map(str::trim).unwrap_or_default().to_string()
}

/// Empty input means "no weight"; anything else must parse as a float.
fn parse_molecular_weight(raw: &str) -> AppResult<Option<f64>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|w| w.is_finite())
        .map(Some)
        .ok_or_else(|| AppError::validation("molecular_weight must be a number"))
}

impl CompoundForm {
    /// Builds the form from a decoded JSON body. Non-object bodies are rejected.
    pub fn from_json(value: Value) -> AppResult<Self> {
        let Value::Object(map) = value else {
            return Err(AppError::invalid_payload());
        };
        let fields = map
            .iter()
            .map(|(k, v)| (k.clone(), json_to_field(v)))
            .collect();
        Ok(Self::from_fields(fields, None))
    }

    /// Builds the form from flat text fields (multipart or JSON) plus an optional file.
    pub fn from_fields(mut fields: HashMap<String, String>, file: Option<UploadedFile>) -> Self {
        Self {
            name: fields.remove("name"),
            formula: fields.remove("formula"),
            smiles: fields.remove("smiles"),
            description: fields.remove("description"),
            molecular_weight: fields.remove("molecular_weight"),
            is_public: fields.remove("is_public"),
            remove_structure_file: fields.remove("remove_structure_file"),
            structure_file: file,
        }
    }

    /// Validates a creation payload: the weight must parse, then name, formula and smiles
    /// must be non-blank, in that order.
    pub fn validate_new(&self) -> AppResult<CompoundDraft> {
        let molecular_weight = match self.molecular_weight.as_deref() {
            Some(raw) => parse_molecular_weight(raw)?,
            None => None,
        };

        let name = trimmed(&self.name);
        let formula = trimmed(&self.formula);
        let smiles = trimmed(&self.smiles);
        for (field, value) in [("name", &name), ("formula", &formula), ("smiles", &smiles)] {
            if value.is_empty() {
                return Err(AppError::validation(format!("{} is required", field)));
            }
        }

        Ok(CompoundDraft {
            name,
            formula,
            smiles,
            molecular_weight,
            description: trimmed(&self.description),
            is_public: parse_bool(self.is_public.as_deref(), true),
        })
    }

    /// Applies the present fields to `compound`, leaving absent ones untouched.
    /// File replacement and removal are handled by the caller, which owns the storage.
    pub fn apply_to(&self, compound: &mut Compound) -> AppResult<()> {
        // Parse first so a bad weight leaves the record unmodified.
        let molecular_weight = match self.molecular_weight.as_deref() {
            Some(raw) => Some(parse_molecular_weight(raw)?),
            None => None,
        };

        if self.name.is_some() {
            compound.name = trimmed(&self.name);
        }
        if self.formula.is_some() {
            compound.formula = trimmed(&self.formula);
        }
        if self.smiles.is_some() {
            compound.smiles = trimmed(&self.smiles);
        }
        if self.description.is_some() {
            compound.description = trimmed(&self.description);
        }
        if let Some(weight) = molecular_weight {
            compound.molecular_weight = weight;
        }
        if let Some(flag) = self.is_public.as_deref() {
            compound.is_public = parse_bool(Some(flag), false);
        }
        Ok(())
    }

    pub fn wants_file_removal(&self) -> bool {
        parse_bool(self.remove_structure_file.as_deref(), false)
    }
}

/// Accepts either `multipart/form-data` or a JSON object body.
/// Anything else (missing content type, malformed JSON, broken multipart) is a generic 400.
impl<S> FromRequest<S> for CompoundForm
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        if !is_multipart {
            let Json(value) = Json::<Value>::from_request(req, state).await?;
            return CompoundForm::from_json(value);
        }

        let mut multipart = Multipart::from_request(req, state).await?;
        let mut fields = HashMap::new();
        let mut file = None;

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            if name == STRUCTURE_FILE_FIELD {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await?;
                // Browsers send an empty part when no file was picked.
                if !file_name.is_empty() && !bytes.is_empty() {
                    file = Some(UploadedFile {
                        file_name,
                        content_type,
                        bytes,
                    });
                }
            } else {
                fields.insert(name, field.text().await?);
            }
        }

        Ok(CompoundForm::from_fields(fields, file))
    }
}
