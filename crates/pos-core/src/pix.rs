//! # PIX BR Code
//!
//! EMV-style TLV payload for static PIX charges ("BR Code") plus the charge
//! lifecycle. Each TLV field is `id(2) len(2) value`; the payload ends with
//! `6304` followed by a CRC16-CCITT over everything up to and including
//! that tag.
//!
//! Charge lifecycle: `Pending → Paid` (network webhook or operator
//! assertion) or `Pending → Expired` after the TTL. A webhook for an
//! expired charge is rejected; only an explicit operator assertion can
//! override expiry, and the override is recorded.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;

/// GUI of the PIX arrangement inside the merchant-account template.
pub const PIX_GUI: &str = "br.gov.bcb.pix";

/// Default charge validity window.
pub const DEFAULT_TTL_MINUTES: i64 = 30;

/// Longest PIX key that still fits the nested merchant-account template:
/// the TLV length field is two digits, and the GUI sub-field takes 22 of
/// the 99 chars available under tag 26.
pub const MAX_PIX_KEY_LEN: usize = 77;

// =============================================================================
// BR Code payload
// =============================================================================

/// Inputs for a BR Code payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrCodeRequest<'a> {
    /// PIX key of the receiving account (email, phone, CNPJ or EVP).
    pub pix_key: &'a str,
    pub amount: Money,
    /// Merchant display name, truncated to 25 chars.
    pub merchant_name: &'a str,
    /// Merchant city, truncated to 15 chars.
    pub merchant_city: &'a str,
    /// Transaction id, max 25 chars.
    pub tx_id: &'a str,
}

/// Builds the copy-and-paste / QR payload for a charge.
pub fn build_br_code(req: &BrCodeRequest<'_>) -> CoreResult<String> {
    if req.pix_key.is_empty() {
        return Err(ValidationError::Required { field: "pix_key" }.into());
    }
    if req.pix_key.len() > MAX_PIX_KEY_LEN {
        return Err(ValidationError::TooLong {
            field: "pix_key",
            max: MAX_PIX_KEY_LEN,
            len: req.pix_key.len(),
        }
        .into());
    }
    if req.tx_id.is_empty() {
        return Err(ValidationError::Required { field: "tx_id" }.into());
    }
    if req.tx_id.len() > 25 {
        return Err(ValidationError::TooLong {
            field: "tx_id",
            max: 25,
            len: req.tx_id.len(),
        }
        .into());
    }
    if !req.amount.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: "amount",
            value: req.amount.cents(),
        }
        .into());
    }

    // Merchant account information: GUI + key nested under tag 26.
    let account = format!("{}{}", tlv("00", PIX_GUI), tlv("01", req.pix_key));

    let amount = format!("{}.{:02}", req.amount.cents() / 100, req.amount.cents() % 100);
    let name = truncate(req.merchant_name, 25);
    let city = truncate(req.merchant_city, 15);
    let additional = tlv("05", req.tx_id);

    let mut payload = String::new();
    payload.push_str(&tlv("00", "01")); // payload format indicator
    payload.push_str(&tlv("26", &account));
    payload.push_str(&tlv("52", "0000")); // merchant category code
    payload.push_str(&tlv("53", "986")); // BRL
    payload.push_str(&tlv("54", &amount));
    payload.push_str(&tlv("58", "BR"));
    payload.push_str(&tlv("59", name));
    payload.push_str(&tlv("60", city));
    payload.push_str(&tlv("62", &additional));
    payload.push_str("6304");
    let crc = crc16_ccitt(payload.as_bytes());
    payload.push_str(&format!("{crc:04X}"));

    Ok(payload)
}

/// Checks that a payload's trailing CRC matches its content.
pub fn validate_br_code(payload: &str) -> bool {
    if payload.len() < 8 {
        return false;
    }
    let (body, crc) = payload.split_at(payload.len() - 4);
    if !body.ends_with("6304") {
        return false;
    }
    u16::from_str_radix(crc, 16)
        .map(|given| given == crc16_ccitt(body.as_bytes()))
        .unwrap_or(false)
}

fn tlv(id: &str, value: &str) -> String {
    format!("{id}{:02}{value}", value.len())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// CRC16-CCITT (polynomial 0x1021, initial 0xFFFF), per the BR Code spec.
fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

// =============================================================================
// Charge lifecycle
// =============================================================================

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Pending,
    Paid,
    Expired,
}

/// How a charge was confirmed paid.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentConfirmation {
    /// Confirmation arrived from the payment network.
    Network,
    /// Operator asserted the payment (saw it in the bank app). Overrides
    /// expiry and is kept for audit.
    Operator,
}

/// A PIX charge for one payment leg.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PixCharge {
    /// 25-char hex transaction id; correlation key with the network.
    pub tx_id: String,
    pub sale_local_id: String,
    pub amount: Money,
    pub payload: String,
    pub status: ChargeStatus,
    pub confirmation: Option<PaymentConfirmation>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PixCharge {
    /// Creates a pending charge with the given TTL.
    pub fn create(
        tx_id: impl Into<String>,
        sale_local_id: impl Into<String>,
        req: &BrCodeRequest<'_>,
        ttl_minutes: i64,
        now: DateTime<Utc>,
    ) -> CoreResult<Self> {
        let payload = build_br_code(req)?;
        Ok(PixCharge {
            tx_id: tx_id.into(),
            sale_local_id: sale_local_id.into(),
            amount: req.amount,
            payload,
            status: ChargeStatus::Pending,
            confirmation: None,
            created_at: now,
            expires_at: now + Duration::minutes(ttl_minutes),
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ChargeStatus::Pending && now >= self.expires_at
    }

    /// Marks the charge paid from a network confirmation. Fails if the
    /// charge already expired - a late webhook does not resurrect it.
    pub fn mark_paid_network(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        if self.status == ChargeStatus::Expired || self.is_expired(now) {
            self.status = ChargeStatus::Expired;
            return Err(CoreError::ChargeExpired {
                tx_id: self.tx_id.clone(),
                expired_at: self.expires_at.to_rfc3339(),
            });
        }
        self.status = ChargeStatus::Paid;
        self.confirmation = Some(PaymentConfirmation::Network);
        Ok(())
    }

    /// Marks the charge paid on the operator's word. Allowed even after
    /// expiry; the confirmation source records the override.
    pub fn mark_paid_operator(&mut self) {
        self.status = ChargeStatus::Paid;
        self.confirmation = Some(PaymentConfirmation::Operator);
    }

    /// Transitions a pending charge past its TTL to `Expired`.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_expired(now) {
            self.status = ChargeStatus::Expired;
            true
        } else {
            false
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn req(amount_cents: i64) -> BrCodeRequest<'static> {
        BrCodeRequest {
            pix_key: "loja@exemplo.com.br",
            amount: Money::from_cents(amount_cents),
            merchant_name: "Mercado Exemplo",
            merchant_city: "Sao Paulo",
            tx_id: "a1b2c3d4e5f6a7b8c9d0e1f2a",
        }
    }

    #[test]
    fn test_payload_structure() {
        let payload = build_br_code(&req(12_345)).unwrap();

        assert!(payload.starts_with("000201")); // tag 00, len 02, "01"
        assert!(payload.contains("br.gov.bcb.pix"));
        assert!(payload.contains("5303986")); // currency BRL
        assert!(payload.contains("5406123.45")); // tag 54, len 06, "123.45"
        assert!(payload.contains("5802BR"));
        assert!(validate_br_code(&payload));
    }

    #[test]
    fn test_crc_known_vector() {
        // "123456789" is the standard CCITT-FALSE check string.
        assert_eq!(crc16_ccitt(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_corrupted_payload_fails_validation() {
        let payload = build_br_code(&req(500)).unwrap();
        let mut bytes = payload.into_bytes();
        bytes[6] = if bytes[6] == b'z' { b'a' } else { b'z' };
        assert!(!validate_br_code(&String::from_utf8(bytes).unwrap()));
    }

    #[test]
    fn test_merchant_fields_truncated() {
        let long = BrCodeRequest {
            merchant_name: "Supermercado Com Nome Excessivamente Comprido LTDA",
            merchant_city: "Sao Jose dos Campos Grande",
            ..req(100)
        };
        let payload = build_br_code(&long).unwrap();
        assert!(payload.contains("5925Supermercado Com Nome Exc"));
        assert!(payload.contains("6015Sao Jose dos Ca"));
        assert!(validate_br_code(&payload));
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        assert!(build_br_code(&BrCodeRequest { pix_key: "", ..req(100) }).is_err());
        assert!(build_br_code(&BrCodeRequest { tx_id: "", ..req(100) }).is_err());
        assert!(build_br_code(&BrCodeRequest {
            tx_id: "aaaaaaaaaaaaaaaaaaaaaaaaaa", // 26 chars
            ..req(100)
        })
        .is_err());
        assert!(build_br_code(&req(0)).is_err());
    }

    #[test]
    fn test_pix_key_length_cap() {
        // 77 chars fills tag 26 exactly (99-char nested value).
        let longest = "k".repeat(MAX_PIX_KEY_LEN);
        let payload = build_br_code(&BrCodeRequest {
            pix_key: &longest,
            ..req(100)
        })
        .unwrap();
        assert!(payload.contains("2699"));
        assert!(validate_br_code(&payload));

        // One more and the two-digit TLV length would overflow.
        let too_long = "k".repeat(MAX_PIX_KEY_LEN + 1);
        let err = build_br_code(&BrCodeRequest {
            pix_key: &too_long,
            ..req(100)
        })
        .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::TooLong { field: "pix_key", .. })
        ));
    }

    #[test]
    fn test_charge_expiry_rules() {
        let now = Utc::now();
        let mut charge =
            PixCharge::create("tx1", "sale-1", &req(1000), DEFAULT_TTL_MINUTES, now).unwrap();

        assert!(!charge.is_expired(now + Duration::minutes(29)));
        assert!(charge.is_expired(now + Duration::minutes(30)));

        // Late webhook is rejected and the charge lands in Expired.
        let err = charge.mark_paid_network(now + Duration::minutes(31)).unwrap_err();
        assert!(matches!(err, CoreError::ChargeExpired { .. }));
        assert_eq!(charge.status, ChargeStatus::Expired);

        // Operator assertion still works and is recorded as such.
        charge.mark_paid_operator();
        assert_eq!(charge.status, ChargeStatus::Paid);
        assert_eq!(charge.confirmation, Some(PaymentConfirmation::Operator));
    }

    #[test]
    fn test_network_confirmation_within_ttl() {
        let now = Utc::now();
        let mut charge = PixCharge::create("tx2", "sale-2", &req(1000), 30, now).unwrap();
        charge.mark_paid_network(now + Duration::minutes(5)).unwrap();
        assert_eq!(charge.status, ChargeStatus::Paid);
        assert_eq!(charge.confirmation, Some(PaymentConfirmation::Network));
        // Expiry sweep never downgrades a paid charge.
        assert!(!charge.expire_if_due(now + Duration::minutes(60)));
        assert_eq!(charge.status, ChargeStatus::Paid);
    }
}
