//! Batch creation of dsvs from a JSON descriptor file.
//!
//! The input is a JSON array of objects with keys `name`, `description`,
//! `tags`, `type`, `value` and optionally `flags`. `value` may be a string
//! (parsed per the type) or a number (narrowed from f64, the form JSON
//! numbers take). One `create` request goes out per element; a bad element
//! is logged and skipped so the rest of the batch still lands.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::client::{DsvClient, NewDsv};
use crate::error::{DsvError, Result};
use crate::registry::Flags;
use crate::value::{DsvType, Value};

/// One element of the batch file.
#[derive(Debug, Deserialize)]
pub struct BatchDsv {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub value: Option<JsonValue>,
    /// Comma-separated flag names, e.g. `"save,track"`.
    #[serde(default)]
    pub flags: String,
}

/// Parse the batch JSON text.
pub fn parse(json: &str) -> Result<Vec<BatchDsv>> {
    serde_json::from_str(json).map_err(|e| DsvError::Invalid(format!("bad batch json: {e}")))
}

pub(crate) fn to_new_dsv(batch: &BatchDsv) -> Result<NewDsv> {
    let ty = DsvType::from_name(&batch.ty)?;
    let value = match &batch.value {
        None | Some(JsonValue::Null) => Value::default_for(ty)?,
        Some(JsonValue::String(s)) => Value::parse(ty, s)?,
        Some(JsonValue::Number(n)) => {
            let df = n
                .as_f64()
                .ok_or_else(|| DsvError::Invalid(format!("unrepresentable number for {}", batch.name)))?;
            Value::from_f64(ty, df)?
        }
        Some(JsonValue::Bool(b)) => Value::from_f64(ty, *b as u8 as f64)?,
        Some(other) => {
            return Err(DsvError::Invalid(format!(
                "value for {} must be a string or number, got {other}",
                batch.name
            )))
        }
    };
    Ok(NewDsv::new(&batch.name, value)
        .with_description(&batch.description)
        .with_tags(&batch.tags)
        .with_flags(Flags::parse(&batch.flags)))
}

/// Create every entry described by the JSON text. Returns how many create
/// requests were issued.
pub fn create_from_str(client: &DsvClient, instance_id: u32, json: &str) -> Result<usize> {
    let entries = parse(json)?;
    let mut created = 0;
    for batch in &entries {
        match to_new_dsv(batch).and_then(|dsv| client.create(instance_id, &dsv)) {
            Ok(_) => created += 1,
            Err(err) => warn!(name = %batch.name, error = %err, "skipping batch element"),
        }
    }
    Ok(created)
}

/// Create every entry described by a JSON file.
pub fn create_from_file(client: &DsvClient, instance_id: u32, file: &Path) -> Result<usize> {
    let json = std::fs::read_to_string(file)?;
    create_from_str(client, instance_id, &json)
}
