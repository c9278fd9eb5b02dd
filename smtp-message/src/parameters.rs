use nom::{
    bytes::complete::{is_a, is_not, tag},
    character::complete::{alphanumeric1, one_of},
    combinator::{complete, opt, recognize},
    multi::many0,
    sequence::{pair, preceded},
    IResult,
};

/// The `MAIL FROM`/`RCPT TO` parameter list: `key[=value]` pairs separated
/// by spaces, e.g. ` SIZE=1024 BODY=8BITMIME SMTPUTF8`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Parameters(pub Vec<(String, Option<String>)>);

impl Parameters {
    pub fn none() -> Parameters {
        Parameters(Vec::new())
    }

    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_deref())
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn push(&mut self, key: impl Into<String>, value: Option<String>) {
        self.0.push((key.into(), value));
    }

    /// Renders back to the ` key=value key2` form, for forwarding a MAIL/RCPT
    /// parameter list unchanged on the outbound connection.
    pub fn to_line(&self) -> String {
        let mut out = String::new();
        for (k, v) in &self.0 {
            out.push(' ');
            out.push_str(k);
            if let Some(v) = v {
                out.push('=');
                out.push_str(v);
            }
        }
        out
    }
}

fn key_value(input: &[u8]) -> IResult<&[u8], (String, Option<String>)> {
    let (input, _) = one_of(" \t")(input)?;
    let mut input = input;
    while let Ok((rest, _)) = one_of::<_, _, nom::error::Error<&[u8]>>(" \t")(input) {
        input = rest;
    }
    let (input, key) = recognize(pair(
        alphanumeric1,
        opt(is_a("ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-")),
    ))(input)?;
    let (input, value) = opt(complete(preceded(tag("="), is_not(" \t"))))(input)?;
    Ok((
        input,
        (
            String::from_utf8_lossy(key).into_owned(),
            value.map(|v| String::from_utf8_lossy(v).into_owned()),
        ),
    ))
}

/// Parses a leading run of ` key=value` pairs (e.g. after `MAIL FROM:<a@b>`).
pub fn parse_parameters(input: &[u8]) -> IResult<&[u8], Parameters> {
    let (input, params) = many0(key_value)(input)?;
    Ok((input, Parameters(params)))
}

/// Body transfer-encoding requested via the `BODY=` MAIL parameter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BodyType {
    Unknown,
    SevenBit,
    EightBitMime,
    BinaryMime,
}

impl BodyType {
    pub fn from_param(value: Option<&str>) -> BodyType {
        match value {
            Some(v) if v.eq_ignore_ascii_case("8BITMIME") => BodyType::EightBitMime,
            Some(v) if v.eq_ignore_ascii_case("BINARYMIME") => BodyType::BinaryMime,
            Some(v) if v.eq_ignore_ascii_case("7BIT") => BodyType::SevenBit,
            _ => BodyType::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_parameters() {
        let (rest, params) = parse_parameters(b" SIZE=1024 BODY=8BITMIME SMTPUTF8").unwrap();
        assert_eq!(rest, b"");
        assert_eq!(params.get("size"), Some(Some("1024")));
        assert_eq!(params.get("BODY"), Some(Some("8BITMIME")));
        assert_eq!(params.get("smtputf8"), Some(None));
        assert_eq!(params.get("missing"), None);
    }

    #[test]
    fn no_parameters() {
        let (rest, params) = parse_parameters(b"").unwrap();
        assert_eq!(rest, b"");
        assert_eq!(params, Parameters::none());
    }

    #[test]
    fn body_type_classification() {
        assert_eq!(BodyType::from_param(Some("8BITMIME")), BodyType::EightBitMime);
        assert_eq!(BodyType::from_param(Some("BINARYMIME")), BodyType::BinaryMime);
        assert_eq!(BodyType::from_param(None), BodyType::Unknown);
    }
}
