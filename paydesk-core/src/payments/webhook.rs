//! Signed processor events.
//!
//! The signature header has the form `t=<unix seconds>,v1=<hex mac>` where
//! the MAC is HMAC-SHA256 over `"{t}.{raw body}"` keyed with the shared
//! webhook secret. Several `v1` entries may be present while a secret is
//! being rotated. Nothing in a payload is trusted before verification.

use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::money::from_minor_units;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the event signature.
pub const SIGNATURE_HEADER: &str = "paydesk-signature";

/// Maximum age of a signed event, in seconds.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Verifies `header` against the raw request body.
///
/// Fails with `SignatureInvalid` on a malformed header, a timestamp outside
/// `tolerance_secs` of `now`, or a MAC mismatch. MACs are compared in
/// constant time.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        warn!("Missing timestamp in signature header");
        BillingError::SignatureInvalid
    })?;

    if signatures.is_empty() {
        warn!("Missing v1 signature in signature header");
        return Err(BillingError::SignatureInvalid);
    }

    if (now - timestamp).abs() > tolerance_secs {
        warn!(timestamp, now, "Webhook timestamp outside tolerance");
        return Err(BillingError::SignatureInvalid);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| {
        warn!("Invalid webhook secret key");
        BillingError::SignatureInvalid
    })?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    let matched = signatures.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });

    if !matched {
        warn!("Webhook signature mismatch");
        return Err(BillingError::SignatureInvalid);
    }
    Ok(())
}

/// Produces a signature header for `payload`. Used to sign test events and
/// by tooling that replays events against a local server.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> BillingResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BillingError::Internal(format!("invalid webhook secret: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes())))
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub created: i64,
    #[serde(default)]
    pub data: EventData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventData {
    pub invoice_id: Option<Uuid>,
    pub amount_minor: Option<i64>,
    pub currency: Option<String>,
    pub transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    /// Connected account the charge was split to, when it was
    pub destination_account: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Paid {
        amount: Decimal,
        currency: Option<String>,
        transaction_id: String,
        paid_at: DateTime<Utc>,
        destination_account: Option<String>,
    },
    Failed {
        transaction_id: Option<String>,
        reason: String,
    },
    /// Event types the platform does not act on
    Ignored,
}

/// A verified event resolved to an invoice.
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmation {
    pub event_id: String,
    pub invoice_id: Option<Uuid>,
    pub outcome: Outcome,
}

/// Verifies and interprets one processor event.
///
/// The caller acts on the outcome: a `Paid` confirmation is applied with
/// [`crate::invoices::mark_paid`]. Verification failures are terminal for
/// the event.
pub fn on_external_confirmation(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
    now: i64,
) -> BillingResult<Confirmation> {
    verify_signature(payload, signature_header, secret, now, DEFAULT_TOLERANCE_SECS)?;

    let event: ProcessorEvent = serde_json::from_slice(payload)
        .map_err(|e| BillingError::InvalidEvent(format!("unreadable payload: {}", e)))?;

    let outcome = match event.kind.as_str() {
        "checkout.completed" | "payment.succeeded" => {
            let amount_minor = event
                .data
                .amount_minor
                .ok_or_else(|| BillingError::InvalidEvent("paid event without amount".into()))?;
            let transaction_id = event
                .data
                .transaction_id
                .clone()
                .ok_or_else(|| BillingError::InvalidEvent("paid event without transaction id".into()))?;
            if event.data.invoice_id.is_none() {
                return Err(BillingError::InvalidEvent("paid event without invoice id".into()));
            }
            Outcome::Paid {
                amount: from_minor_units(amount_minor),
                currency: event.data.currency.as_ref().map(|c| c.to_ascii_uppercase()),
                transaction_id,
                paid_at: Utc.timestamp_opt(event.created, 0).single().unwrap_or_else(Utc::now),
                destination_account: event.data.destination_account.clone(),
            }
        }
        "payment.failed" => Outcome::Failed {
            transaction_id: event.data.transaction_id.clone(),
            reason: event
                .data
                .failure_reason
                .clone()
                .unwrap_or_else(|| "unspecified".to_string()),
        },
        other => {
            info!(event_id = %event.id, kind = %other, "Ignoring processor event");
            Outcome::Ignored
        }
    };

    Ok(Confirmation {
        event_id: event.id,
        invoice_id: event.data.invoice_id,
        outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SECRET: &str = "whsec_test123secret456";
    const NOW: i64 = 1_700_000_000;

    fn paid_event(invoice_id: Uuid) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "id": "evt_1",
            "type": "checkout.completed",
            "created": NOW,
            "data": {
                "invoice_id": invoice_id,
                "amount_minor": 13750,
                "currency": "usd",
                "transaction_id": "pi_123"
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_signature_is_accepted() {
        let payload = b"{\"type\":\"checkout.completed\"}";
        let header = sign_payload(payload, SECRET, NOW).unwrap();
        assert!(verify_signature(payload, &header, SECRET, NOW, 300).is_ok());
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let header = sign_payload(b"{\"amount_minor\":100}", SECRET, NOW).unwrap();
        let err = verify_signature(b"{\"amount_minor\":999}", &header, SECRET, NOW, 300).unwrap_err();
        assert!(matches!(err, BillingError::SignatureInvalid));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let payload = b"{}";
        let header = sign_payload(payload, "whsec_other", NOW).unwrap();
        assert!(verify_signature(payload, &header, SECRET, NOW, 300).is_err());
    }

    #[test]
    fn test_stale_timestamp_is_rejected() {
        let payload = b"{}";
        let header = sign_payload(payload, SECRET, NOW - 600).unwrap();
        assert!(verify_signature(payload, &header, SECRET, NOW, 300).is_err());
        assert!(verify_signature(payload, &header, SECRET, NOW - 500, 300).is_ok());
    }

    #[test]
    fn test_malformed_headers_are_rejected() {
        let payload = b"{}";
        for header in ["", "garbage", "t=abc,v1=00", "v1=deadbeef", "t=1700000000", "t=1700000000,v1=not-hex"] {
            assert!(
                verify_signature(payload, header, SECRET, NOW, 300).is_err(),
                "header {:?} should be rejected",
                header
            );
        }
    }

    #[test]
    fn test_any_matching_v1_entry_is_enough() {
        let payload = b"{}";
        let good = sign_payload(payload, SECRET, NOW).unwrap();
        let mac = good.split("v1=").nth(1).unwrap();
        let header = format!("t={},v1={},v1={}", NOW, "00".repeat(32), mac);
        assert!(verify_signature(payload, &header, SECRET, NOW, 300).is_ok());
    }

    #[test]
    fn test_paid_event_resolves_to_invoice() {
        let invoice_id = Uuid::new_v4();
        let payload = paid_event(invoice_id);
        let header = sign_payload(&payload, SECRET, NOW).unwrap();

        let confirmation = on_external_confirmation(&payload, &header, SECRET, NOW).unwrap();
        assert_eq!(confirmation.event_id, "evt_1");
        assert_eq!(confirmation.invoice_id, Some(invoice_id));
        match confirmation.outcome {
            Outcome::Paid {
                amount,
                currency,
                transaction_id,
                destination_account,
                ..
            } => {
                assert_eq!(amount, dec!(137.50));
                assert_eq!(currency.as_deref(), Some("USD"));
                assert_eq!(transaction_id, "pi_123");
                assert_eq!(destination_account, None);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_split_charge_reports_destination() {
        let payload = serde_json::to_vec(&serde_json::json!({
            "id": "evt_5",
            "type": "payment.succeeded",
            "created": NOW,
            "data": {
                "invoice_id": Uuid::new_v4(),
                "amount_minor": 10000,
                "currency": "usd",
                "transaction_id": "pi_split",
                "destination_account": "acct_42"
            }
        }))
        .unwrap();
        let header = sign_payload(&payload, SECRET, NOW).unwrap();
        let confirmation = on_external_confirmation(&payload, &header, SECRET, NOW).unwrap();
        assert!(matches!(
            confirmation.outcome,
            Outcome::Paid { ref destination_account, .. } if destination_account.as_deref() == Some("acct_42")
        ));
    }

    #[test]
    fn test_unsigned_event_is_never_parsed() {
        let payload = paid_event(Uuid::new_v4());
        let header = sign_payload(&payload, "whsec_attacker", NOW).unwrap();
        let err = on_external_confirmation(&payload, &header, SECRET, NOW).unwrap_err();
        assert!(matches!(err, BillingError::SignatureInvalid));
    }

    #[test]
    fn test_failed_and_unknown_events() {
        let payload = serde_json::to_vec(&serde_json::json!({
            "id": "evt_2",
            "type": "payment.failed",
            "created": NOW,
            "data": { "invoice_id": Uuid::new_v4(), "failure_reason": "card_declined" }
        }))
        .unwrap();
        let header = sign_payload(&payload, SECRET, NOW).unwrap();
        let confirmation = on_external_confirmation(&payload, &header, SECRET, NOW).unwrap();
        assert!(matches!(confirmation.outcome, Outcome::Failed { ref reason, .. } if reason == "card_declined"));

        let payload = br#"{"id":"evt_3","type":"account.updated","created":1700000000}"#;
        let header = sign_payload(payload, SECRET, NOW).unwrap();
        let confirmation = on_external_confirmation(payload, &header, SECRET, NOW).unwrap();
        assert_eq!(confirmation.outcome, Outcome::Ignored);
    }

    #[test]
    fn test_paid_event_missing_fields_is_invalid() {
        let payload = serde_json::to_vec(&serde_json::json!({
            "id": "evt_4",
            "type": "checkout.completed",
            "created": NOW,
            "data": { "amount_minor": 100, "transaction_id": "pi_9" }
        }))
        .unwrap();
        let header = sign_payload(&payload, SECRET, NOW).unwrap();
        let err = on_external_confirmation(&payload, &header, SECRET, NOW).unwrap_err();
        assert!(matches!(err, BillingError::InvalidEvent(_)));
    }
}
