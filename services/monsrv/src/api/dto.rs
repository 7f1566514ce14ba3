//! Request and response bodies of the HTTP API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::serde_helpers::{deserialize_optional_bool, deserialize_optional_i64};

use crate::config::{DeviceConfig, DeviceConfigPatch};
use crate::device::{RegisterKind, RegisterValue};
use crate::error::ValidationError;

// === Query Parameters ===

/// `GET /modbus/read` query string
#[derive(Debug, Default, Deserialize)]
pub struct ReadQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_i64")]
    pub address: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_optional_i64")]
    pub quantity: Option<i64>,
}

impl ReadQuery {
    /// Resolve into `(kind, address, quantity)`; quantity defaults to 1
    pub fn resolve(&self) -> Result<(RegisterKind, i64, i64), ValidationError> {
        let kind = self
            .kind
            .as_deref()
            .ok_or(ValidationError::MissingField("type"))?
            .parse::<RegisterKind>()?;
        let address = self.address.ok_or(ValidationError::MissingField("address"))?;
        Ok((kind, address, self.quantity.unwrap_or(1)))
    }
}

// === Request Bodies ===

/// `POST /modbus/config` body
pub type ConfigBody = DeviceConfigPatch;

/// `POST /modbus/write/register` body
#[derive(Debug, Default, Deserialize)]
pub struct WriteRegisterBody {
    #[serde(default, deserialize_with = "deserialize_optional_i64")]
    pub address: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_optional_i64")]
    pub value: Option<i64>,
}

impl WriteRegisterBody {
    pub fn resolve(&self) -> Result<(i64, i64), ValidationError> {
        Ok((
            self.address.ok_or(ValidationError::MissingField("address"))?,
            self.value.ok_or(ValidationError::MissingField("value"))?,
        ))
    }
}

/// `POST /modbus/write/coil` body; `value` is a boolean (0/1 tolerated)
#[derive(Debug, Default, Deserialize)]
pub struct WriteCoilBody {
    #[serde(default, deserialize_with = "deserialize_optional_i64")]
    pub address: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_optional_bool")]
    pub value: Option<bool>,
}

impl WriteCoilBody {
    pub fn resolve(&self) -> Result<(i64, i64), ValidationError> {
        Ok((
            self.address.ok_or(ValidationError::MissingField("address"))?,
            i64::from(self.value.ok_or(ValidationError::MissingField("value"))?),
        ))
    }
}

// === Responses ===

#[derive(Debug, Serialize)]
pub struct ReadResponse {
    #[serde(rename = "type")]
    pub kind: RegisterKind,
    pub values: Vec<RegisterValue>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub config: DeviceConfig,
}

#[derive(Debug, Serialize)]
pub struct ConfigUpdateResponse {
    pub message: String,
    pub config: DeviceConfig,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_read_query_resolution() {
        let query = ReadQuery {
            kind: Some("coil".into()),
            address: Some(5),
            quantity: None,
        };
        assert_eq!(query.resolve().unwrap(), (RegisterKind::Coil, 5, 1));

        let missing = ReadQuery {
            kind: Some("holding".into()),
            ..Default::default()
        };
        assert_eq!(
            missing.resolve(),
            Err(ValidationError::MissingField("address"))
        );

        let bad_kind = ReadQuery {
            kind: Some("analog".into()),
            address: Some(0),
            quantity: Some(1),
        };
        assert!(matches!(
            bad_kind.resolve(),
            Err(ValidationError::InvalidRegisterKind(_))
        ));
    }

    #[test]
    fn test_coil_body_accepts_bool_and_digit() {
        let body: WriteCoilBody = serde_json::from_str(r#"{"address": 3, "value": true}"#).unwrap();
        assert_eq!(body.resolve().unwrap(), (3, 1));

        let body: WriteCoilBody = serde_json::from_str(r#"{"address": "3", "value": 0}"#).unwrap();
        assert_eq!(body.resolve().unwrap(), (3, 0));

        assert!(serde_json::from_str::<WriteCoilBody>(r#"{"address": 3, "value": 2}"#).is_err());
    }

    #[test]
    fn test_register_body_requires_value() {
        let body: WriteRegisterBody = serde_json::from_str(r#"{"address": 10}"#).unwrap();
        assert_eq!(body.resolve(), Err(ValidationError::MissingField("value")));
    }

    #[test]
    fn test_read_response_wire_shape() {
        let response = ReadResponse {
            kind: RegisterKind::Holding,
            values: vec![RegisterValue {
                address: 0,
                raw_value: 10,
            }],
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["type"], "holding");
        assert_eq!(json["values"][0]["rawValue"], 10);
    }
}
