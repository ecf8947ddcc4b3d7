//! # Fiscal Documents
//!
//! Construction of consumer fiscal documents (NFC-e model 65) and their
//! 44-digit access key. Sequence numbers are a legal invariant: strictly
//! increasing, gapless within a series, never reused - reservation is
//! serialized elsewhere (pos-db for the contingency pool, the sequence
//! authority for online series); this module only builds and validates.
//!
//! ## Access key layout (44 digits)
//! ```text
//! UF(2) AAMM(4) CNPJ(14) model(2) series(3) number(9) tpEmis(1) cNF(8) DV(1)
//! ```
//! `tpEmis` is 1 for normal issuance and 9 for offline contingency. The
//! check digit is module-11 over the first 43 digits with weights cycling
//! 2..9 from the right.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreResult, ValidationError};

/// Document model for consumer receipts (NFC-e).
pub const DOCUMENT_MODEL: &str = "65";

// =============================================================================
// Types
// =============================================================================

/// Authorization status of a fiscal document.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FiscalStatus {
    /// Sequence number reserved, document not yet built/sent.
    Reserved,
    /// Issued offline; awaiting authorization after reconnect.
    ContingencyIssued,
    /// Sent to the authority, awaiting the verdict.
    Submitted,
    /// Authorized; `authority_protocol` holds the protocol number.
    Authorized,
    /// Rejected. Terminal rejections need operator correction; the sale is
    /// never discarded (the goods already left) and the number is never
    /// reused - the row itself is the auditable gap record.
    Rejected,
}

/// How the document was emitted; becomes the `tpEmis` digit of the key.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmissionKind {
    Normal,
    Contingency,
}

impl EmissionKind {
    pub const fn digit(&self) -> char {
        match self {
            EmissionKind::Normal => '1',
            EmissionKind::Contingency => '9',
        }
    }
}

/// Issuer identification needed to derive the access key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitterInfo {
    /// 14-digit CNPJ, digits only.
    pub cnpj: String,
    /// Two-digit IBGE state code (e.g. "35" for SP).
    pub uf_code: String,
    pub name: String,
    pub fantasy_name: Option<String>,
}

/// A fiscal document tied to one sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiscalDocument {
    pub sequence_number: i64,
    pub series: i64,
    pub access_key: String,
    /// The owning sale's idempotency key.
    pub sale_local_id: String,
    pub emission: EmissionKind,
    pub status: FiscalStatus,
    /// Authority protocol number, set on authorization.
    pub authority_protocol: Option<String>,
    pub issued_at: DateTime<Utc>,
}

impl FiscalDocument {
    /// Builds a document with a freshly reserved sequence number.
    ///
    /// `random_code` is the 8-digit cNF; the caller supplies the entropy so
    /// this stays deterministic and testable.
    pub fn build(
        emitter: &EmitterInfo,
        series: i64,
        sequence_number: i64,
        sale_local_id: impl Into<String>,
        emission: EmissionKind,
        random_code: u32,
        issued_at: DateTime<Utc>,
    ) -> CoreResult<Self> {
        let access_key = AccessKey::generate(
            emitter,
            series,
            sequence_number,
            emission,
            random_code,
            issued_at,
        )?;

        let status = match emission {
            EmissionKind::Normal => FiscalStatus::Reserved,
            EmissionKind::Contingency => FiscalStatus::ContingencyIssued,
        };

        Ok(FiscalDocument {
            sequence_number,
            series,
            access_key,
            sale_local_id: sale_local_id.into(),
            emission,
            status,
            authority_protocol: None,
            issued_at,
        })
    }

    /// Consultation URL encoded into the printed QR code.
    pub fn consultation_url(&self, base_url: &str) -> String {
        format!("{}?chNFe={}&nVersao=100", base_url, self.access_key)
    }
}

// =============================================================================
// Access Key
// =============================================================================

/// Access key construction and validation.
pub struct AccessKey;

impl AccessKey {
    /// Generates the 44-digit access key.
    pub fn generate(
        emitter: &EmitterInfo,
        series: i64,
        number: i64,
        emission: EmissionKind,
        random_code: u32,
        issued_at: DateTime<Utc>,
    ) -> CoreResult<String> {
        if emitter.cnpj.len() != 14 || !emitter.cnpj.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ValidationError::Required { field: "emitter.cnpj" }.into());
        }
        if number <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "sequence_number",
                value: number,
            }
            .into());
        }

        let aamm = format!("{:02}{:02}", issued_at.year() % 100, issued_at.month());
        let base = format!(
            "{uf}{aamm}{cnpj}{model}{series:03}{number:09}{emission}{cnf:08}",
            uf = emitter.uf_code,
            aamm = aamm,
            cnpj = emitter.cnpj,
            model = DOCUMENT_MODEL,
            series = series,
            number = number,
            emission = emission.digit(),
            cnf = random_code % 100_000_000,
        );
        debug_assert_eq!(base.len(), 43);

        let dv = Self::check_digit(&base);
        Ok(format!("{base}{dv}"))
    }

    /// Module-11 check digit: weights cycle 2..9 from the rightmost digit.
    pub fn check_digit(base: &str) -> char {
        let sum: u32 = base
            .bytes()
            .rev()
            .enumerate()
            .map(|(i, b)| {
                let weight = 2 + (i as u32 % 8);
                (b - b'0') as u32 * weight
            })
            .sum();

        let remainder = sum % 11;
        let dv = if remainder < 2 { 0 } else { 11 - remainder };
        char::from_digit(dv, 10).unwrap_or('0')
    }

    /// Structural validation: 44 digits and a matching check digit.
    pub fn validate(key: &str) -> bool {
        key.len() == 44
            && key.bytes().all(|b| b.is_ascii_digit())
            && key.ends_with(Self::check_digit(&key[..43]))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
