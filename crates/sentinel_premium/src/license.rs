//! License data as exchanged with the licensing server.

use crate::error::LicenseError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const LICENSE_VERSION: u64 = 1;

/// A Premium license.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct License {
    /// License version, only `1` is understood
    #[serde(default)]
    pub lv: Value,
    /// `"active"` or `"expired"`
    #[serde(default)]
    pub status: String,
    /// Only sent by the server in the first checks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl License {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }

    fn code(&self) -> Option<&str> {
        self.code.as_deref().filter(|code| !code.is_empty())
    }

    /// Checks a license received from the server against the current one.
    ///
    /// The server doesn't always send the license code, so a missing code
    /// is taken over from `current`.
    pub fn validated(mut self, current: &License) -> Result<License, LicenseError> {
        if self.lv.as_u64() != Some(LICENSE_VERSION) {
            return Err(LicenseError::InvalidLicense(format!(
                "Invalid license version: {}",
                self.lv
            )));
        }

        if current.is_active() && self.status == "expired" {
            return Err(LicenseError::InvalidLicense("Expired license".to_string()));
        }

        if !self.is_active() {
            return Err(LicenseError::InvalidLicense(format!(
                "Unknown license status: {}",
                self.status
            )));
        }

        if self.code().is_none() {
            match current.code() {
                Some(code) => self.code = Some(code.to_string()),
                None => {
                    return Err(LicenseError::InvalidLicense(
                        "Undefined license code".to_string(),
                    ))
                }
            }
        }

        Ok(self)
    }
}

impl Default for License {
    fn default() -> Self {
        Self {
            lv: Value::from(LICENSE_VERSION),
            status: "expired".to_string(),
            code: Some(String::new()),
            encoded_data: None,
            signature: None,
        }
    }
}

/// Body of a license check request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseCheckPayload {
    pub cmd: String,
    /// Premium user ID
    pub u: String,
    pub v: String,
}

impl LicenseCheckPayload {
    pub fn new(user_id: &str) -> Self {
        Self {
            cmd: "license_check".to_string(),
            u: user_id.to_string(),
            v: "1".to_string(),
        }
    }
}

/// What UI pages learn about Premium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PremiumState {
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn license(value: Value) -> License {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn default_license_is_expired() {
        let default = License::default();
        assert!(!default.is_active());
        assert_eq!(
            serde_json::to_value(&default).unwrap(),
            json!({"lv": 1, "status": "expired", "code": ""})
        );
    }

    #[test]
    fn validation_rules() {
        let active = license(json!({"lv": 1, "status": "active", "code": "C0DE"}));
        let expired = License::default();

        let err = license(json!({"lv": 2, "status": "active", "code": "x"})).validated(&expired);
        assert!(matches!(err, Err(LicenseError::InvalidLicense(_))));

        let err = license(json!({"lv": 1, "status": "expired"})).validated(&active);
        assert!(matches!(err, Err(LicenseError::InvalidLicense(reason)) if reason == "Expired license"));

        let err = license(json!({"lv": 1, "status": "paused", "code": "x"})).validated(&expired);
        assert!(matches!(err, Err(LicenseError::InvalidLicense(_))));

        let err = license(json!({"lv": 1, "status": "active"})).validated(&expired);
        assert!(matches!(err, Err(LicenseError::InvalidLicense(reason)) if reason == "Undefined license code"));

        let renewed = license(json!({"lv": 1, "status": "active", "encodedData": "d", "signature": "s"}))
            .validated(&active)
            .unwrap();
        assert_eq!(renewed.code.as_deref(), Some("C0DE"));
        assert_eq!(renewed.encoded_data.as_deref(), Some("d"));
    }

    #[test]
    fn check_payload_shape() {
        assert_eq!(
            serde_json::to_value(LicenseCheckPayload::new("user-1")).unwrap(),
            json!({"cmd": "license_check", "u": "user-1", "v": "1"})
        );
    }
}
