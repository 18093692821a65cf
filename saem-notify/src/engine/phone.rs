//! Phone number normalization
//!
//! Musicians' phones are stored as typed by coordinators ("(11) 99999-8888",
//! "+55 11 ..."). The transport wants bare digits with the country prefix.

/// Default country prefix (Brazil)
pub const DEFAULT_COUNTRY_PREFIX: &str = "55";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneNormalizer {
    prefix: String,
}

impl Default for PhoneNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_COUNTRY_PREFIX)
    }
}

impl PhoneNormalizer {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        Self {
            prefix: prefix.chars().filter(char::is_ascii_digit).collect(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Strip every non-digit and prepend the country prefix unless already present.
    ///
    /// No length or plausibility checks are made.
    pub fn normalize(&self, raw: &str) -> String {
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        if digits.starts_with(&self.prefix) {
            digits
        } else {
            format!("{}{}", self.prefix, digits)
        }
    }

    /// Whether `raw` has anything to dial
    pub fn is_usable(raw: &str) -> bool {
        raw.chars().any(|c| c.is_ascii_digit())
    }
}
