//! 32-bit rolling string hash.
//!
//! `h = h * 31 + unit` over the UTF-16 code units of the text, wrapped to a
//! signed 32-bit integer and rendered as the hexadecimal absolute value.
//! This is NOT a cryptographic digest: the `algorithm` field is carried
//! through as a label and does not select anything.

use crate::Result;
use serde::{Deserialize, Serialize};

fn default_algorithm() -> String {
    "sha256".to_owned()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashPayload {
    pub text: String,
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
}

impl HashPayload {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            algorithm: default_algorithm(),
        }
    }

    #[allow(clippy::unnecessary_wraps)]
    pub(crate) fn check(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HashOutput {
    pub hash: String,
    pub algorithm: String,
    pub input_length: usize,
}

/// Signed 32-bit rolling hash of `text`.
pub fn rolling_hash(text: &str) -> i32 {
    text.encode_utf16()
        .fold(0_i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

pub(crate) fn run(payload: &HashPayload) -> HashOutput {
    HashOutput {
        hash: format!("{:x}", rolling_hash(&payload.text).unsigned_abs()),
        algorithm: payload.algorithm.clone(),
        input_length: payload.text.chars().count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(text: &str) -> String {
        run(&HashPayload::new(text)).hash
    }

    #[test]
    fn matches_known_values() {
        assert_eq!(hex(""), "0");
        assert_eq!(hex("a"), "61");
        assert_eq!(hex("hello"), "5e918d2");
        assert_eq!(hex("Hello, World!"), "5955b815");
    }

    #[test]
    fn wraps_to_signed_32_bit() {
        // Hashes to i32::MIN; its absolute value needs the full 32 bits.
        assert_eq!(rolling_hash("polygenelubricants"), i32::MIN);
        assert_eq!(hex("polygenelubricants"), "80000000");
    }

    #[test]
    fn hashes_utf16_code_units() {
        // One scalar value, two UTF-16 units.
        assert_eq!(hex("😀"), "1b0d63");
    }

    #[test]
    fn algorithm_is_only_a_label() {
        let mut payload = HashPayload::new("hello");
        assert_eq!(payload.algorithm, "sha256");
        payload.algorithm = "md5".to_owned();
        let out = run(&payload);
        assert_eq!(out.hash, "5e918d2");
        assert_eq!(out.algorithm, "md5");
        assert_eq!(out.input_length, 5);
    }
}
