use async_trait::async_trait;

/// Verifies a decoded SASL identity/secret pair (spec §6: "AUTH credential
/// verification is delegated to a pluggable backend"). Only `PLAIN` and
/// `LOGIN` are driven through this trait directly, since both reduce to a
/// bare username/password exchange once base64-decoded; `CRAM-MD5` and
/// `XOAUTH2` are advertised as mechanism identifiers only (spec §6 "mechanism
/// identifiers only; mechanism logic is external") because their exchanges
/// carry a server-issued challenge or OAuth bearer token rather than a
/// plain secret, and implementing that negotiation is out of scope here.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn verify(&self, mechanism: &str, username: &str, secret: &str) -> bool;
}

/// Decodes a `PLAIN` initial-response/continuation: `\0authzid\0user\0pass`
/// (RFC 4616).
pub fn decode_plain(encoded: &str) -> Option<(String, String)> {
    let raw = base64::decode(encoded).ok()?;
    let mut parts = raw.split(|&b| b == 0);
    let _authzid = parts.next()?;
    let user = parts.next()?;
    let pass = parts.next()?;
    Some((
        String::from_utf8(user.to_vec()).ok()?,
        String::from_utf8(pass.to_vec()).ok()?,
    ))
}

pub fn decode_base64_field(encoded: &str) -> Option<String> {
    let raw = base64::decode(encoded).ok()?;
    String::from_utf8(raw).ok()
}

pub fn encode_base64_field(plain: &str) -> String {
    base64::encode(plain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plain_response() {
        let encoded = base64::encode(b"\0jdoe\0secret");
        let (user, pass) = decode_plain(&encoded).unwrap();
        assert_eq!(user, "jdoe");
        assert_eq!(pass, "secret");
    }

    #[test]
    fn login_fields_round_trip() {
        let encoded = encode_base64_field("jdoe");
        assert_eq!(decode_base64_field(&encoded).unwrap(), "jdoe");
    }
}
