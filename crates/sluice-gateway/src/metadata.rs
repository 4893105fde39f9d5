//! Upload metadata checks and the metadata-driven storage layout.
//!
//! Metadata is an opaque JSON object as far as the ledger is concerned. The
//! gateway only insists that a configured set of fields is present as
//! non-empty strings, and the `*_by_metadata` uploads derive their storage
//! path from three of them:
//!
//! ```text
//! plain  : <msmntCampaign>/<format>/<file_name>
//! packed : <msmntCampaign>/<format>/<seq>.seq   (file_name becomes the key)
//! ```

use serde_json::Value;
use sluice_types::names::{validate_file_name, validate_path_part};

use crate::error::ClientError;

pub const CAMPAIGN_FIELD: &str = "msmntCampaign";
pub const FORMAT_FIELD: &str = "format";
pub const SEQ_FIELD: &str = "seq";

/// Extension given to packed containers laid out from metadata.
pub const PACKED_EXTENSION: &str = "seq";

/// Parse a metadata document. It must be a JSON object.
pub fn parse(raw: &str) -> Result<Value, ClientError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| ClientError::InvalidMetadata(format!("invalid JSON: {e}")))?;
    if !value.is_object() {
        return Err(ClientError::InvalidMetadata(
            "metadata must be a JSON object".into(),
        ));
    }
    Ok(value)
}

/// Check that `metadata` is an object carrying every field in `required` as
/// a non-empty string.
pub fn require_fields(metadata: &Value, required: &[String]) -> Result<(), ClientError> {
    let object = metadata.as_object().ok_or_else(|| {
        ClientError::InvalidMetadata("metadata must be a JSON object".into())
    })?;
    for field in required {
        match object.get(field) {
            Some(Value::String(s)) if !s.is_empty() => {}
            Some(Value::String(_)) => {
                return Err(ClientError::InvalidMetadata(format!(
                    "field `{field}` must not be empty"
                )));
            }
            Some(_) => {
                return Err(ClientError::InvalidMetadata(format!(
                    "field `{field}` must be a string"
                )));
            }
            None => {
                return Err(ClientError::InvalidMetadata(format!(
                    "missing required field `{field}`"
                )));
            }
        }
    }
    Ok(())
}

/// Relative path of a plain upload laid out by metadata.
pub fn plain_layout(metadata: &Value, file_name: &str) -> Result<String, ClientError> {
    let campaign = path_part(metadata, CAMPAIGN_FIELD)?;
    let format = path_part(metadata, FORMAT_FIELD)?;
    validate_file_name(file_name).map_err(|e| ClientError::InvalidPath(e.to_string()))?;
    Ok(format!("{campaign}/{format}/{file_name}"))
}

/// Relative path of the packed container a metadata-driven packed upload
/// lands in.
pub fn packed_layout(metadata: &Value) -> Result<String, ClientError> {
    let campaign = path_part(metadata, CAMPAIGN_FIELD)?;
    let format = path_part(metadata, FORMAT_FIELD)?;
    let seq = path_part(metadata, SEQ_FIELD)?;
    Ok(format!("{campaign}/{format}/{seq}.{PACKED_EXTENSION}"))
}

fn path_part<'a>(metadata: &'a Value, field: &str) -> Result<&'a str, ClientError> {
    let part = metadata
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ClientError::InvalidMetadata(format!("missing required field `{field}`")))?;
    validate_path_part(part)
        .map_err(|e| ClientError::InvalidMetadata(format!("field `{field}`: {e}")))?;
    Ok(part)
}
