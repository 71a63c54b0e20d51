//! Wire types of the cert-manager ACME webhook protocol
//! (`webhook.acme.cert-manager.io/v1alpha1`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::secrets::SecretKeySelector;

pub const API_VERSION: &str = "webhook.acme.cert-manager.io/v1alpha1";
pub const KIND: &str = "ChallengePayload";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengePayload {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<ChallengeRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ChallengeResponse>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeAction {
    Present,
    CleanUp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRequest {
    #[serde(default)]
    pub uid: String,
    pub action: ChallengeAction,
    #[serde(default, rename = "type")]
    pub challenge_type: String,
    #[serde(default)]
    pub dns_name: String,
    /// Value the TXT record must carry.
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub resource_namespace: String,
    #[serde(default, rename = "resolvedFQDN")]
    pub resolved_fqdn: String,
    #[serde(default)]
    pub resolved_zone: String,
    #[serde(default)]
    pub allow_ambient_credentials: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    pub uid: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
}

/// Subset of the Kubernetes `meta/v1.Status` object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub code: u16,
}

impl ChallengePayload {
    pub fn respond(uid: &str, result: &Result<()>) -> Self {
        let response = match result {
            Ok(()) => ChallengeResponse {
                uid: uid.to_string(),
                success: true,
                status: None,
            },
            Err(e) => ChallengeResponse {
                uid: uid.to_string(),
                success: false,
                status: Some(Status {
                    status: "Failure".to_string(),
                    message: format!("{:#}", e),
                    reason: Some("InternalError".to_string()),
                    code: 500,
                }),
            },
        };

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            request: None,
            response: Some(response),
        }
    }
}

/// Per-issuer solver configuration, taken from
/// `issuer.spec.acme.solvers[].dns01.webhook.config`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SolverConfig {
    #[serde(default, rename = "secretIdSecretRef")]
    pub secret_id: SecretKeySelector,
    #[serde(default, rename = "secretKeySecretRef")]
    pub secret_key: SecretKeySelector,
    #[serde(default, rename = "disableCNAME")]
    pub disable_cname: Option<bool>,
}

impl SolverConfig {
    pub fn load(config: Option<&serde_json::Value>) -> Result<Self> {
        match config {
            None | Some(serde_json::Value::Null) => Ok(Self::default()),
            Some(value) => {
                serde_json::from_value(value.clone()).context("error decoding solver config")
            }
        }
    }

    pub fn disable_cname(&self) -> bool {
        self.disable_cname.unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_cert_manager_request() {
        let payload: ChallengePayload = serde_json::from_value(serde_json::json!({
            "apiVersion": API_VERSION,
            "kind": KIND,
            "request": {
                "uid": "6c5d1b2e",
                "action": "Present",
                "type": "dns-01",
                "dnsName": "example.com",
                "key": "token-value",
                "resourceNamespace": "cert-manager",
                "resolvedFQDN": "_acme-challenge.example.com.",
                "resolvedZone": "example.com.",
                "allowAmbientCredentials": false,
                "config": {
                    "secretIdSecretRef": {"name": "dnspod", "key": "secret-id"},
                    "secretKeySecretRef": {"name": "dnspod", "key": "secret-key"}
                }
            }
        }))
        .unwrap();

        let request = payload.request.unwrap();
        assert_eq!(request.action, ChallengeAction::Present);
        assert_eq!(request.resolved_fqdn, "_acme-challenge.example.com.");
        assert_eq!(request.resolved_zone, "example.com.");
        assert_eq!(request.resource_namespace, "cert-manager");

        let config = SolverConfig::load(request.config.as_ref()).unwrap();
        assert_eq!(config.secret_id.name, "dnspod");
        assert_eq!(config.secret_key.key, "secret-key");
        assert!(config.disable_cname());
    }

    #[test]
    fn cleanup_action_uses_go_casing() {
        let action: ChallengeAction = serde_json::from_str("\"CleanUp\"").unwrap();
        assert_eq!(action, ChallengeAction::CleanUp);
    }

    #[test]
    fn missing_config_is_default() {
        let config = SolverConfig::load(None).unwrap();
        assert!(config.secret_id.name.is_empty());
        assert!(config.disable_cname());
    }

    #[test]
    fn malformed_config_is_an_error() {
        let value = serde_json::json!({"disableCNAME": "sometimes"});
        let err = SolverConfig::load(Some(&value)).unwrap_err();
        assert!(err.to_string().contains("error decoding solver config"));
    }

    #[test]
    fn failure_response_carries_message() {
        let payload = ChallengePayload::respond("abc", &Err(anyhow::anyhow!("zone not found")));
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["kind"], KIND);
        assert_eq!(json["response"]["uid"], "abc");
        assert_eq!(json["response"]["success"], false);
        assert_eq!(json["response"]["status"]["message"], "zone not found");
        assert!(json.get("request").is_none());
    }
}
