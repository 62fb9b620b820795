//! Credential primitives: email validation, OTP codes and magic-link tokens.

use lazy_static::lazy_static;
use rand::{Rng, RngCore};
use regex::Regex;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

/// OTP validity window.
pub const OTP_EXPIRATION_MINUTES: i64 = 10;

/// Magic link validity window.
pub const MAGIC_TOKEN_EXPIRATION_MINUTES: i64 = 15;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Random fixed-width numeric one-time code.
pub fn generate_otp() -> i32 {
    rand::thread_rng().gen_range(100_000..=999_999)
}

/// 32 random bytes, hex-encoded. This plaintext goes into the email; only its
/// hash is ever stored.
pub fn generate_magic_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// One-way hash of a presented magic token, hex-encoded.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpOutcome {
    Match,
    Mismatch,
    Expired,
}

/// OTP verification decision. Mismatch is checked before expiry so neither
/// outcome reveals the state of the other field.
pub fn check_otp(
    stored: Option<i32>,
    expires: Option<OffsetDateTime>,
    presented: i32,
    now: OffsetDateTime,
) -> OtpOutcome {
    match stored {
        Some(code) if code == presented => match expires {
            Some(expiry) if now > expiry => OtpOutcome::Expired,
            _ => OtpOutcome::Match,
        },
        _ => OtpOutcome::Mismatch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn email_validation() {
        assert!(is_valid_email("a@x.com"));
        assert!(is_valid_email("first.last@sub.example.org"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("missing@tld"));
        assert!(!is_valid_email("spaces in@x.com"));
    }

    #[test]
    fn otp_is_six_digits() {
        for _ in 0..100 {
            let otp = generate_otp();
            assert!((100_000..=999_999).contains(&otp));
        }
    }

    #[test]
    fn magic_token_is_64_hex_chars() {
        let token = generate_magic_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn magic_tokens_are_unique() {
        assert_ne!(generate_magic_token(), generate_magic_token());
    }

    #[test]
    fn hash_is_deterministic_and_distinct() {
        let h1 = hash_token("token1");
        let h2 = hash_token("token1");
        let h3 = hash_token("token2");
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn hash_never_equals_plaintext() {
        let token = generate_magic_token();
        assert_ne!(hash_token(&token), token);
    }

    #[test]
    fn otp_check_match() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(
            check_otp(Some(123456), Some(now + Duration::minutes(5)), 123456, now),
            OtpOutcome::Match
        );
    }

    #[test]
    fn otp_check_mismatch_before_expiry() {
        // A wrong code against an expired field still reports Mismatch.
        let now = OffsetDateTime::now_utc();
        assert_eq!(
            check_otp(Some(123456), Some(now - Duration::minutes(5)), 654321, now),
            OtpOutcome::Mismatch
        );
    }

    #[test]
    fn otp_check_expired() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(
            check_otp(Some(123456), Some(now - Duration::minutes(1)), 123456, now),
            OtpOutcome::Expired
        );
    }

    #[test]
    fn otp_check_without_pending_code_is_mismatch() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(check_otp(None, None, 123456, now), OtpOutcome::Mismatch);
    }
}
