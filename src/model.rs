//! Config document model.
//! The remote file is hand-editable, so reads are tolerant: missing or
//! mistyped fields fall back to defaults instead of rejecting the document.
//! Writes are strict: validation runs before any network activity and the
//! wire shape (field names and order) is fixed.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::sync::Document;

/// The Off sentinel as stored on the wire. Any other raw value reads as On.
const VIP_OFF: &str = "关";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum Vip {
    #[default]
    #[serde(rename = "开")]
    On,
    #[serde(rename = "关")]
    Off,
}

impl fmt::Display for Vip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vip::On => write!(f, "on"),
            Vip::Off => write!(f, "off"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct License {
    pub id: String,
    /// Calendar date encoded YYYYMMDD. Only the 8-digit shape is enforced,
    /// not that the digits form a real date.
    pub expire: String,
}

impl License {
    fn normalized(raw: &Value) -> Self {
        License {
            id: str_field(raw, "id"),
            expire: str_field(raw, "expire"),
        }
    }
}

/// One remotely-stored app configuration. Field order here is the wire
/// order; licenses keep their stored sequence untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ConfigDocument {
    #[serde(rename = "VIP")]
    pub vip: Vip,
    pub title: String,
    pub body: String,
    #[serde(rename = "enterPackage")]
    pub enter_package: String,
    #[serde(rename = "leftUrl")]
    pub left_url: String,
    #[serde(rename = "rightUrl")]
    pub right_url: String,
    pub licenses: Vec<License>,
}

pub(crate) fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn validate_url(field: &str, raw: &str) -> Result<()> {
    if raw.is_empty() {
        return Ok(());
    }
    // Url::parse only accepts absolute URLs; relative ones fail here
    reqwest::Url::parse(raw)
        .map(|_| ())
        .map_err(|_| SyncError::validation(field, "must be empty or an absolute URL"))
}

fn is_expire_stamp(raw: &str) -> bool {
    raw.len() == 8 && raw.bytes().all(|b| b.is_ascii_digit())
}

impl Document for ConfigDocument {
    fn from_remote(value: &Value) -> Self {
        let vip = match value.get("VIP").and_then(Value::as_str) {
            Some(raw) if raw == VIP_OFF => Vip::Off,
            _ => Vip::On,
        };
        let licenses = value
            .get("licenses")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(License::normalized).collect())
            .unwrap_or_default();

        ConfigDocument {
            vip,
            title: str_field(value, "title"),
            body: str_field(value, "body"),
            enter_package: str_field(value, "enterPackage"),
            left_url: str_field(value, "leftUrl"),
            right_url: str_field(value, "rightUrl"),
            licenses,
        }
    }

    fn to_remote(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Walks the invariants in wire order and aborts on the first violation.
    fn validate(&self) -> Result<()> {
        if self.title.is_empty() {
            return Err(SyncError::validation("title", "must not be empty"));
        }
        validate_url("leftUrl", &self.left_url)?;
        validate_url("rightUrl", &self.right_url)?;
        for (index, license) in self.licenses.iter().enumerate() {
            if license.id.is_empty() {
                return Err(SyncError::validation(
                    format!("licenses[{}].id", index),
                    "must not be empty",
                ));
            }
            if !is_expire_stamp(&license.expire) {
                return Err(SyncError::validation(
                    format!("licenses[{}].expire", index),
                    "must be exactly 8 digits (YYYYMMDD)",
                ));
            }
        }
        Ok(())
    }
}
