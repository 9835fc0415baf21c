//! Slack request signing: `v0=hex(HMAC-SHA256(secret, "v0:<ts>:<body>"))`.

use super::SlackError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

pub const SIGNATURE_HEADER: &str = "x-slack-signature";
pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
pub const MAX_CLOCK_SKEW_SECS: u64 = 300;

type HmacSha256 = Hmac<Sha256>;

pub fn compute_signature(secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    let digest = mac.finalize().into_bytes();
    let hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
    format!("v0={hex}")
}

/// Checks the timestamp window and the signature in constant time.
pub fn verify_signature(
    secret: &str,
    timestamp: &str,
    signature: &str,
    body: &[u8],
    now_secs: i64,
) -> Result<(), SlackError> {
    let ts: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| SlackError::Signature("missing or invalid timestamp".to_string()))?;
    if now_secs.abs_diff(ts) > MAX_CLOCK_SKEW_SECS {
        return Err(SlackError::Signature(
            "timestamp outside the 5 minute window".to_string(),
        ));
    }
    let Some(hex) = signature.trim().strip_prefix("v0=") else {
        return Err(SlackError::Signature("unsupported signature version".to_string()));
    };
    let expected = decode_hex(hex)
        .ok_or_else(|| SlackError::Signature("signature is not hex".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|err| SlackError::Signature(err.to_string()))?;
    mac.update(b"v0:");
    mac.update(timestamp.trim().as_bytes());
    mac.update(b":");
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| SlackError::Signature("signature mismatch".to_string()))
}

fn decode_hex(raw: &str) -> Option<Vec<u8>> {
    if raw.len() % 2 != 0 {
        return None;
    }
    (0..raw.len())
        .step_by(2)
        .map(|index| u8::from_str_radix(raw.get(index..index + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "8f742231b10e8888abcd99yyyzzz85a5";
    const BODY: &[u8] = b"token=xyzz0WbapA4vBCDEFasx0q6G&team_id=T1DC2JH3J&command=%2Fweather&text=94070";

    #[test]
    fn signature_matches_known_vector() {
        assert_eq!(
            compute_signature(SECRET, "1531420618", BODY),
            "v0=a45771c0f181b7fb1752e9a26cc1ffb2c428f52ac8ab774ffa4adf8cf2874576"
        );
        verify_signature(
            SECRET,
            "1531420618",
            "v0=a45771c0f181b7fb1752e9a26cc1ffb2c428f52ac8ab774ffa4adf8cf2874576",
            BODY,
            1531420618 + 10,
        )
        .expect("valid");
    }

    #[test]
    fn rejects_stale_tampered_and_malformed_requests() {
        let good = compute_signature(SECRET, "1000", BODY);
        assert!(verify_signature(SECRET, "1000", &good, BODY, 1000 + 301).is_err());
        assert!(verify_signature(SECRET, "1000", &good, b"tampered", 1000).is_err());
        assert!(verify_signature("other", "1000", &good, BODY, 1000).is_err());
        assert!(verify_signature(SECRET, "1000", "v1=abcd", BODY, 1000).is_err());
        assert!(verify_signature(SECRET, "1000", "v0=zz", BODY, 1000).is_err());
        assert!(verify_signature(SECRET, "soon", &good, BODY, 1000).is_err());
        verify_signature(SECRET, "1000", &good, BODY, 1000 - 299).expect("within window");
    }

    #[test]
    fn extreme_timestamps_are_stale_not_overflows() {
        for ts in [i64::MIN, i64::MAX] {
            let ts = ts.to_string();
            let signature = compute_signature(SECRET, &ts, BODY);
            let err = verify_signature(SECRET, &ts, &signature, BODY, 1_700_000_000)
                .expect_err("outside window");
            assert!(err.to_string().contains("window"), "{err}");
        }
        assert!(verify_signature(SECRET, "-9223372036854775808", "v0=00", b"x", i64::MAX).is_err());
    }
}
