/// Credentials to present via `AUTH`, selected by the caller from whatever
/// the remote `EHLO` advertised. Only `PLAIN` and `LOGIN` are driven to
/// completion; `CRAM-MD5` and `XOAUTH2` are recognized as advertised
/// mechanism identifiers only and are never selected here.
#[derive(Clone, Debug)]
pub enum Credentials {
    Plain { authzid: String, username: String, password: String },
    Login { username: String, password: String },
}

impl Credentials {
    pub(crate) fn mechanism(&self) -> &'static str {
        match self {
            Credentials::Plain { .. } => "PLAIN",
            Credentials::Login { .. } => "LOGIN",
        }
    }

    /// The initial-response payload sent alongside `AUTH PLAIN`, already
    /// base64-encoded (RFC 4616: `authzid\0user\0pass`).
    pub(crate) fn plain_initial_response(&self) -> Option<String> {
        match self {
            Credentials::Plain { authzid, username, password } => {
                let mut raw = Vec::new();
                raw.extend_from_slice(authzid.as_bytes());
                raw.push(0);
                raw.extend_from_slice(username.as_bytes());
                raw.push(0);
                raw.extend_from_slice(password.as_bytes());
                Some(base64::encode(raw))
            }
            Credentials::Login { .. } => None,
        }
    }
}

pub(crate) fn encode_field(plain: &str) -> String {
    base64::encode(plain)
}

pub(crate) fn decode_field(encoded: &str) -> Option<String> {
    let raw = base64::decode(encoded.trim()).ok()?;
    String::from_utf8(raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_initial_response_matches_rfc4616_layout() {
        let creds = Credentials::Plain {
            authzid: String::new(),
            username: "jdoe".to_owned(),
            password: "secret".to_owned(),
        };
        let decoded = base64::decode(creds.plain_initial_response().unwrap()).unwrap();
        assert_eq!(decoded, b"\0jdoe\0secret");
    }

    #[test]
    fn field_round_trips() {
        let encoded = encode_field("jdoe");
        assert_eq!(decode_field(&encoded).unwrap(), "jdoe");
    }
}
