//! Normalization and validation of customer identifiers.
//!
//! Every identifier is brought to one canonical form at intake, so stored and
//! incoming values can be compared with plain equality.

use crate::errors::AppError;
use crate::models::RawIdentifiers;
use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

const MAX_REFERENCE_LEN: usize = 64;

fn pan_regex() -> &'static Regex {
    static PAN: OnceLock<Regex> = OnceLock::new();
    PAN.get_or_init(|| Regex::new(r"^[A-Z]{5}[0-9]{4}[A-Z]$").expect("PAN pattern is valid"))
}

fn mobile_regex() -> &'static Regex {
    static MOBILE: OnceLock<Regex> = OnceLock::new();
    MOBILE.get_or_init(|| Regex::new(r"^[6-9][0-9]{9}$").expect("mobile pattern is valid"))
}

fn aadhaar_ref_regex() -> &'static Regex {
    static AADHAAR_REF: OnceLock<Regex> = OnceLock::new();
    AADHAAR_REF
        .get_or_init(|| Regex::new(r"^[0-9a-f]{64}$").expect("aadhaar ref pattern is valid"))
}

/// The normalized identifiers of one customer or lead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierSet {
    pub mobile: Option<String>,
    pub pan: Option<String>,
    pub aadhaar_ref: Option<String>,
    pub ucid: Option<String>,
    pub previous_lan: Option<String>,
}

impl IdentifierSet {
    /// Normalizes raw input. Blank fields count as absent; malformed ones are rejected.
    pub fn from_raw(raw: &RawIdentifiers) -> Result<Self, AppError> {
        let aadhaar_ref = match (non_blank(&raw.aadhaar), non_blank(&raw.aadhaar_ref)) {
            (Some(number), Some(reference)) => {
                let derived = aadhaar_reference(number)?;
                if derived != normalize_aadhaar_ref(reference)? {
                    return Err(AppError::BadRequest(
                        "aadhaar and aadhaar_ref refer to different numbers".to_string(),
                    ));
                }
                Some(derived)
            }
            (Some(number), None) => Some(aadhaar_reference(number)?),
            (None, Some(reference)) => Some(normalize_aadhaar_ref(reference)?),
            (None, None) => None,
        };

        Ok(Self {
            mobile: non_blank(&raw.mobile).map(normalize_mobile).transpose()?,
            pan: non_blank(&raw.pan).map(normalize_pan).transpose()?,
            aadhaar_ref,
            ucid: non_blank(&raw.ucid)
                .map(|v| normalize_reference("ucid", v))
                .transpose()?,
            previous_lan: non_blank(&raw.previous_lan)
                .map(|v| normalize_reference("previous_lan", v))
                .transpose()?,
        })
    }

    /// Like [`IdentifierSet::from_raw`], but also requires at least one identifier.
    pub fn require_from_raw(raw: &RawIdentifiers) -> Result<Self, AppError> {
        let set = Self::from_raw(raw)?;
        if set.is_empty() {
            return Err(AppError::BadRequest(
                "At least one identifier required (mobile, pan, aadhaar, ucid, or previous_lan)"
                    .to_string(),
            ));
        }
        Ok(set)
    }

    pub fn is_empty(&self) -> bool {
        self.mobile.is_none()
            && self.pan.is_none()
            && self.aadhaar_ref.is_none()
            && self.ucid.is_none()
            && self.previous_lan.is_none()
    }

    /// Short description safe for logs.
    pub fn masked(&self) -> String {
        let mut parts = Vec::new();
        if let Some(ref m) = self.mobile {
            parts.push(format!("mobile={}", mask(m)));
        }
        if let Some(ref p) = self.pan {
            parts.push(format!("pan={}", mask(p)));
        }
        if self.aadhaar_ref.is_some() {
            parts.push("aadhaar_ref=<set>".to_string());
        }
        if let Some(ref u) = self.ucid {
            parts.push(format!("ucid={}", u));
        }
        if let Some(ref l) = self.previous_lan {
            parts.push(format!("previous_lan={}", l));
        }
        parts.join(" ")
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Normalizes an Indian mobile number to its 10-digit national form.
///
/// Accepts `+91`, `91` and `0` prefixes along with spaces, dashes and brackets.
pub fn normalize_mobile(raw: &str) -> Result<String, AppError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let national = match digits.len() {
        10 => digits.as_str(),
        11 if digits.starts_with('0') => &digits[1..],
        12 if digits.starts_with("91") => &digits[2..],
        _ => {
            return Err(AppError::BadRequest(format!(
                "Invalid mobile number: {}",
                mask(raw.trim())
            )))
        }
    };

    // Explicit country code: a national number starting with 91 stays intact.
    let number = phonenumber::parse(Some(CountryId::IN), format!("+91{}", national))
        .map_err(|e| {
            tracing::warn!("Failed to parse mobile '{}': {:?}", mask(national), e);
            AppError::BadRequest(format!("Invalid mobile number: {}", mask(national)))
        })?;

    let e164 = number.format().mode(Mode::E164).to_string();
    let normalized = e164.strip_prefix("+91").unwrap_or(national).to_string();

    if !mobile_regex().is_match(&normalized) {
        return Err(AppError::BadRequest(format!(
            "Invalid mobile number: {}",
            mask(national)
        )));
    }
    Ok(normalized)
}

/// Uppercases and validates a Permanent Account Number.
pub fn normalize_pan(raw: &str) -> Result<String, AppError> {
    let pan = raw.trim().to_ascii_uppercase();
    if !pan_regex().is_match(&pan) {
        return Err(AppError::BadRequest(format!(
            "Invalid PAN: {}",
            mask(&pan)
        )));
    }
    Ok(pan)
}

/// Derives the stored Aadhaar reference from the 12-digit number.
pub fn aadhaar_reference(number: &str) -> Result<String, AppError> {
    let digits: String = number.chars().filter(|c| !c.is_whitespace() && *c != '-').collect();
    if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::BadRequest(
            "Aadhaar number must have 12 digits".to_string(),
        ));
    }
    if digits.starts_with('0') || digits.starts_with('1') {
        return Err(AppError::BadRequest(
            "Aadhaar number cannot start with 0 or 1".to_string(),
        ));
    }
    let mut hasher = Sha256::new();
    hasher.update(digits.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

fn normalize_aadhaar_ref(raw: &str) -> Result<String, AppError> {
    let reference = raw.trim().to_ascii_lowercase();
    if !aadhaar_ref_regex().is_match(&reference) {
        return Err(AppError::BadRequest(
            "aadhaar_ref must be 64 hexadecimal characters".to_string(),
        ));
    }
    Ok(reference)
}

fn normalize_reference(field: &str, raw: &str) -> Result<String, AppError> {
    let value = raw.trim();
    if value.len() > MAX_REFERENCE_LEN {
        return Err(AppError::BadRequest(format!(
            "{} longer than {} characters",
            field, MAX_REFERENCE_LEN
        )));
    }
    Ok(value.to_string())
}

/// Keeps the last four characters visible.
pub fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), visible)
}
