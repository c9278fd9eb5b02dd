//! RFC 1891 `xtext` encoding, used inside envelope values (`AUTH=`,
//! `X-MailRelay-MailFromAuthIn`/`Out`, etc.) wherever a value might contain
//! non-printable or delimiter bytes.

/// Encodes `raw` as xtext: printable ASCII except `+` and `=` pass through
/// unchanged; everything else becomes `+XX` (two uppercase hex digits).
pub fn encode(raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len());
    for &b in raw {
        if b == b'+' || b == b'=' || !(0x21..=0x7e).contains(&b) {
            out.push('+');
            out.push_str(&format!("{:02X}", b));
        } else {
            out.push(b as char);
        }
    }
    out
}

/// Decodes an xtext string back to raw bytes. Returns `None` on malformed
/// `+XX` escapes.
pub fn decode(xtext: &str) -> Option<Vec<u8>> {
    let bytes = xtext.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'+' {
            let hex = bytes.get(i + 1..i + 3)?;
            let hex_str = std::str::from_utf8(hex).ok()?;
            let value = u8::from_str_radix(hex_str, 16).ok()?;
            out.push(value);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let raw = b"hello world\r\n+=weird";
        let enc = encode(raw);
        assert_eq!(decode(&enc).unwrap(), raw);
    }

    #[test]
    fn plain_ascii_passes_through() {
        assert_eq!(encode(b"simple-addr"), "simple-addr");
    }
}
