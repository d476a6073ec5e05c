use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;

/// Query field carrying the HMAC signature. Always excluded from the
/// canonical string and from cache keys.
pub const SIGNATURE_FIELD: &str = "s";

/// Query field carrying the unix-seconds expiry.
pub const EXPIRES_FIELD: &str = "expires";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature")]
    Missing,
    #[error("invalid signature")]
    Invalid,
    #[error("signature expired")]
    Expired,
    #[error("malformed expires parameter")]
    MalformedExpires,
}

/// Canonical string for signing: `path?k1=v1&…&kn=vn` with keys sorted
/// lexicographically and the signature field excluded. A request with no
/// remaining parameters signs the bare path.
pub fn canonical_string(path: &str, params: &BTreeMap<String, String>) -> String {
    let pairs: Vec<String> = params
        .iter()
        .filter(|(k, _)| k.as_str() != SIGNATURE_FIELD)
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    if pairs.is_empty() {
        path.to_string()
    } else {
        format!("{}?{}", path, pairs.join("&"))
    }
}

/// Sign a canonical string, returning the hex-lowercase MAC.
pub fn sign(path: &str, params: &BTreeMap<String, String>, secret: &str) -> String {
    let canonical = canonical_string(path, params);
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(canonical.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verify the request signature against the shared secret.
///
/// The `expires` parameter, when present, is checked before the MAC so an
/// expired URL is rejected even if its signature is otherwise valid.
/// Comparison is constant-time via `Mac::verify_slice` over the decoded
/// signature bytes.
pub fn verify_signature(
    path: &str,
    params: &BTreeMap<String, String>,
    secret: &str,
) -> std::result::Result<(), SignatureError> {
    let sig = params
        .get(SIGNATURE_FIELD)
        .filter(|s| !s.is_empty())
        .ok_or(SignatureError::Missing)?;

    if let Some(raw) = params.get(EXPIRES_FIELD) {
        let expires: i64 = raw.parse().map_err(|_| SignatureError::MalformedExpires)?;
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        if now > expires {
            return Err(SignatureError::Expired);
        }
    }

    let provided = hex::decode(sig).map_err(|_| SignatureError::Invalid)?;

    let canonical = canonical_string(path, params);
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(canonical.as_bytes());
    mac.verify_slice(&provided)
        .map_err(|_| SignatureError::Invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn canonical_sorts_and_excludes_signature() {
        let p = params(&[("w", "200"), ("h", "100"), ("s", "deadbeef")]);
        assert_eq!(canonical_string("/img/a.jpg", &p), "/img/a.jpg?h=100&w=200");
    }

    #[test]
    fn verify_accepts_valid_signature() {
        let mut p = params(&[("w", "200"), ("h", "100")]);
        let sig = sign("/img/a.jpg", &p, "k");
        p.insert("s".into(), sig);
        assert_eq!(verify_signature("/img/a.jpg", &p, "k"), Ok(()));
    }

    #[test]
    fn verify_rejects_tampered_params() {
        let mut p = params(&[("w", "200")]);
        let sig = sign("/img/a.jpg", &p, "k");
        p.insert("s".into(), sig);
        p.insert("w".into(), "999".into());
        assert_eq!(
            verify_signature("/img/a.jpg", &p, "k"),
            Err(SignatureError::Invalid)
        );
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let mut p = params(&[("w", "200")]);
        let sig = sign("/img/a.jpg", &p, "k");
        p.insert("s".into(), sig);
        assert_eq!(
            verify_signature("/img/a.jpg", &p, "other"),
            Err(SignatureError::Invalid)
        );
    }

    #[test]
    fn expired_rejected_before_mac() {
        let mut p = params(&[("expires", "1000000000")]);
        let sig = sign("/img/a.jpg", &p, "k");
        p.insert("s".into(), sig);
        assert_eq!(
            verify_signature("/img/a.jpg", &p, "k"),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn malformed_expires_rejected() {
        let p = params(&[("expires", "soon"), ("s", "00")]);
        assert_eq!(
            verify_signature("/img/a.jpg", &p, "k"),
            Err(SignatureError::MalformedExpires)
        );
    }

    #[test]
    fn missing_signature_rejected() {
        let p = params(&[("w", "200")]);
        assert_eq!(
            verify_signature("/img/a.jpg", &p, "k"),
            Err(SignatureError::Missing)
        );
    }
}
