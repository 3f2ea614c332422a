/// Compact signed envelope: `header.payload.signature`
///
/// `header` and `payload` are base64url (no padding) JSON; `signature` is a
/// hex recoverable signature over the v1 signing message built from the
/// payload fields (see [`signing_message`]). The payload bytes themselves are
/// not what gets signed.

use super::EnvelopeError;
use crate::crypto::signature::{SignatureError, SignatureVerifiers};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Version of the signing message layout
pub const MESSAGE_VERSION: u32 = 1;

/// Action assumed when the payload names none
pub const DEFAULT_ACTION: &str = "login";

/// Raw envelope segments, still encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub header: String,
    pub payload: String,
    pub signature: String,
}

impl Envelope {
    /// Split a compact envelope. Exactly three non-empty segments.
    pub fn parse(raw: &str) -> Result<Self, EnvelopeError> {
        let parts: Vec<&str> = raw.trim().split('.').collect();

        if parts.len() != 3 {
            return Err(EnvelopeError::Malformed(
                "expected 3 dot-separated parts".to_string(),
            ));
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(EnvelopeError::Malformed("empty segment".to_string()));
        }

        Ok(Self {
            header: parts[0].to_string(),
            payload: parts[1].to_string(),
            signature: parts[2].to_string(),
        })
    }
}

/// Decoded protected header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    #[serde(rename = "sys", alias = "system", default)]
    pub system: String,
}

/// Fields every payload must carry; anything else is passed through
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopePayload {
    #[serde(rename = "addr", alias = "address", default)]
    pub address: String,
    #[serde(rename = "ts", alias = "timestamp", default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl EnvelopePayload {
    pub fn action(&self) -> &str {
        self.action.as_deref().unwrap_or(DEFAULT_ACTION)
    }
}

/// Successful verification result, before the wallet row is resolved
#[derive(Debug, Clone)]
pub struct VerifiedEnvelope {
    pub system: String,
    /// Canonical signer address as recovered, not as the payload spelled it
    pub address: String,
    pub payload: EnvelopePayload,
    /// Full decoded payload JSON for the handler to interpret
    pub raw_payload: Value,
}

/// Build the exact bytes the client signs (v1).
///
/// ```text
/// <domain> Signed Request
/// Version: 1
/// Action: <action>
/// Address: <address as sent>
/// Timestamp: <unix seconds>
/// Params: <canonical JSON>        (only when params are present)
/// ```
pub fn signing_message(domain: &str, payload: &EnvelopePayload) -> String {
    let mut lines = vec![
        format!("{} Signed Request", domain),
        format!("Version: {}", MESSAGE_VERSION),
        format!("Action: {}", payload.action()),
        format!("Address: {}", payload.address),
        format!("Timestamp: {}", payload.timestamp),
    ];

    if let Some(params) = &payload.params {
        lines.push(format!("Params: {}", canonical_json(params)));
    }

    lines.join("\n")
}

/// JSON with object keys sorted at every level and no whitespace
pub fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let ordered: BTreeMap<&String, Value> =
                    map.iter().map(|(k, v)| (k, sorted(v))).collect();
                Value::Object(ordered.into_iter().map(|(k, v)| (k.clone(), v)).collect())
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }

    sorted(value).to_string()
}

/// Verifies envelopes against the registered signature systems
#[derive(Clone)]
pub struct EnvelopeVerifier {
    verifiers: SignatureVerifiers,
    domain: String,
    max_age: Duration,
}

impl EnvelopeVerifier {
    pub fn new(verifiers: SignatureVerifiers, domain: impl Into<String>, max_age: Duration) -> Self {
        Self {
            verifiers,
            domain: domain.into(),
            max_age,
        }
    }

    /// Verify against the current clock
    pub fn verify(&self, envelope: &Envelope) -> Result<VerifiedEnvelope, EnvelopeError> {
        self.verify_at(envelope, Utc::now().timestamp())
    }

    /// Verify against an explicit "now" (Unix seconds)
    pub fn verify_at(&self, envelope: &Envelope, now: i64) -> Result<VerifiedEnvelope, EnvelopeError> {
        let header: EnvelopeHeader =
            decode_segment(&envelope.header).map_err(EnvelopeError::BadHeader)?;
        if header.system.is_empty() {
            return Err(EnvelopeError::BadHeader("missing system".to_string()));
        }

        let raw_payload: Value =
            decode_segment(&envelope.payload).map_err(EnvelopeError::BadPayload)?;
        let payload: EnvelopePayload = serde_json::from_value(raw_payload.clone())
            .map_err(|_| EnvelopeError::BadPayload("invalid payload".to_string()))?;

        if payload.address.is_empty() {
            return Err(EnvelopeError::BadPayload("missing address".to_string()));
        }
        if payload.timestamp == 0 {
            return Err(EnvelopeError::BadPayload("missing timestamp".to_string()));
        }

        // Symmetric window: stale and future-dated payloads are both refused.
        // This is the only replay defence.
        let age = now.saturating_sub(payload.timestamp);
        if age.unsigned_abs() > self.max_age.as_secs() {
            return Err(EnvelopeError::Expired);
        }

        let message = signing_message(&self.domain, &payload);

        let signer = self
            .verifiers
            .verify(&header.system, &payload.address, message.as_bytes(), &envelope.signature)
            .map_err(|e| match e {
                SignatureError::UnsupportedSystem(system) => EnvelopeError::UnsupportedSystem(system),
                other => {
                    tracing::warn!("Envelope signature rejected: {}", other);
                    EnvelopeError::SignatureMismatch(other.to_string())
                }
            })?;

        Ok(VerifiedEnvelope {
            system: header.system,
            address: signer,
            payload,
            raw_payload,
        })
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| "invalid encoding".to_string())?;
    serde_json::from_slice(&bytes).map_err(|_| "invalid JSON".to_string())
}


#[cfg(test)]
mod tests {
    use super::test_helpers::*;
    use super::*;
    use crate::crypto::signature::test_helpers::wallet;
    use serde_json::json;

    const DOMAIN: &str = "Gatehouse";

    fn verifier() -> EnvelopeVerifier {
        EnvelopeVerifier::new(
            SignatureVerifiers::with_defaults(),
            DOMAIN,
            Duration::from_secs(300),
        )
    }

    fn now() -> i64 {
        Utc::now().timestamp()
    }

    #[test]
    fn test_parse_requires_three_non_empty_parts() {
        assert!(Envelope::parse("a.b.c").is_ok());
        assert!(matches!(Envelope::parse("a.b"), Err(EnvelopeError::Malformed(_))));
        assert!(matches!(Envelope::parse("a.b.c.d"), Err(EnvelopeError::Malformed(_))));
        assert!(matches!(Envelope::parse("a..c"), Err(EnvelopeError::Malformed(_))));
        assert!(matches!(Envelope::parse(""), Err(EnvelopeError::Malformed(_))));
    }

    #[test]
    fn test_signing_message_layout() {
        let payload: EnvelopePayload = serde_json::from_value(json!({
            "addr": "0xAbC",
            "ts": 1700000000,
            "action": "like",
            "params": {"post_id": 9, "liked": false}
        }))
        .unwrap();

        assert_eq!(
            signing_message(DOMAIN, &payload),
            "Gatehouse Signed Request\nVersion: 1\nAction: like\nAddress: 0xAbC\nTimestamp: 1700000000\nParams: {\"liked\":false,\"post_id\":9}"
        );
    }

    #[test]
    fn test_signing_message_defaults_to_login() {
        let payload: EnvelopePayload =
            serde_json::from_value(json!({"address": "0xabc", "timestamp": 5})).unwrap();

        assert_eq!(
            signing_message(DOMAIN, &payload),
            "Gatehouse Signed Request\nVersion: 1\nAction: login\nAddress: 0xabc\nTimestamp: 5"
        );
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let value = json!({"b": {"z": 1, "a": [ {"y": 2, "x": 1} ]}, "a": "s"});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":"s","b":{"a":[{"x":1,"y":2}],"z":1}}"#
        );
    }

    #[test]
    fn test_valid_envelope() {
        let (key, address) = wallet();
        let payload = json!({"addr": address, "ts": now(), "action": "login"});
        let raw = sign_envelope(&key, DOMAIN, "ethereum", &payload);

        let verified = verifier().verify(&Envelope::parse(&raw).unwrap()).unwrap();
        assert_eq!(verified.address, address);
        assert_eq!(verified.system, "ethereum");
        assert_eq!(verified.payload.action(), "login");
        assert_eq!(verified.raw_payload, payload);
    }

    #[test]
    fn test_address_spellings_resolve_to_one_signer() {
        let (key, address) = wallet();
        let ts = now();
        let spellings = [
            address.clone(),
            address[2..].to_string(),
            format!("0x{}", address[2..].to_uppercase()),
            format!("0X{}", &address[2..]),
        ];

        for spelling in spellings {
            let payload = json!({"addr": spelling, "ts": ts});
            let raw = sign_envelope(&key, DOMAIN, "ethereum", &payload);

            let verified = verifier().verify(&Envelope::parse(&raw).unwrap()).unwrap();
            assert_eq!(verified.address, address, "{}", spelling);
            // The address is signed exactly as sent
            assert_eq!(verified.payload.address, spelling);
        }
    }

    #[test]
    fn test_stale_and_future_payloads_expire() {
        let (key, address) = wallet();

        for ts in [now() - 301, now() + 301] {
            let payload = json!({"addr": address, "ts": ts});
            let raw = sign_envelope(&key, DOMAIN, "ethereum", &payload);
            assert!(matches!(
                verifier().verify(&Envelope::parse(&raw).unwrap()),
                Err(EnvelopeError::Expired)
            ));
        }
    }

    #[test]
    fn test_window_edges_accepted() {
        let (key, address) = wallet();
        let at = 1_700_000_000;

        for ts in [at - 300, at + 300] {
            let payload = json!({"addr": address, "ts": ts});
            let raw = sign_envelope(&key, DOMAIN, "ethereum", &payload);
            assert!(verifier().verify_at(&Envelope::parse(&raw).unwrap(), at).is_ok());
        }
    }

    #[test]
    fn test_tampered_fields_break_signature() {
        let (key, address) = wallet();
        let ts = now();
        let original = json!({"addr": address, "ts": ts, "action": "like", "params": {"post_id": 1}});
        let raw = sign_envelope(&key, DOMAIN, "ethereum", &original);
        let envelope = Envelope::parse(&raw).unwrap();

        let (_, other_address) = wallet();
        let tampered = [
            json!({"addr": other_address, "ts": ts, "action": "like", "params": {"post_id": 1}}),
            json!({"addr": address, "ts": ts - 1, "action": "like", "params": {"post_id": 1}}),
            json!({"addr": address, "ts": ts, "action": "delete", "params": {"post_id": 1}}),
            json!({"addr": address, "ts": ts, "action": "like", "params": {"post_id": 2}}),
        ];

        for payload in tampered {
            let forged = Envelope {
                payload: encode_segment(&payload),
                ..envelope.clone()
            };
            assert!(matches!(
                verifier().verify(&forged),
                Err(EnvelopeError::SignatureMismatch(_))
            ));
        }
    }

    #[test]
    fn test_other_domain_breaks_signature() {
        let (key, address) = wallet();
        let raw = sign_envelope(&key, "Elsewhere", "ethereum", &json!({"addr": address, "ts": now()}));

        assert!(matches!(
            verifier().verify(&Envelope::parse(&raw).unwrap()),
            Err(EnvelopeError::SignatureMismatch(_))
        ));
    }

    #[test]
    fn test_header_errors() {
        let payload = encode_segment(&json!({"addr": "0xabc", "ts": now()}));

        let no_system = Envelope {
            header: encode_segment(&json!({})),
            payload: payload.clone(),
            signature: "00".to_string(),
        };
        assert!(matches!(verifier().verify(&no_system), Err(EnvelopeError::BadHeader(_))));

        let not_base64 = Envelope {
            header: "***".to_string(),
            payload: payload.clone(),
            signature: "00".to_string(),
        };
        assert!(matches!(verifier().verify(&not_base64), Err(EnvelopeError::BadHeader(_))));

        let unknown = Envelope {
            header: encode_segment(&json!({"sys": "solana"})),
            payload,
            signature: "00".to_string(),
        };
        assert!(matches!(
            verifier().verify(&unknown),
            Err(EnvelopeError::UnsupportedSystem(_))
        ));
    }

    #[test]
    fn test_payload_errors() {
        let header = encode_segment(&json!({"sys": "ethereum"}));
        let cases = [
            json!({"ts": now()}),
            json!({"addr": "", "ts": now()}),
            json!({"addr": "0xabc"}),
            json!({"addr": "0xabc", "ts": 0}),
            json!("not an object"),
        ];

        for payload in cases {
            let envelope = Envelope {
                header: header.clone(),
                payload: encode_segment(&payload),
                signature: "00".to_string(),
            };
            assert!(matches!(
                verifier().verify(&envelope),
                Err(EnvelopeError::BadPayload(_))
            ));
        }
    }
}
