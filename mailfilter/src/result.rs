use smtp_message::Reply;

/// The three outcomes a [`crate::Filter`] can settle on (spec §4.3).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FilterResult {
    /// Processing may continue; the message is unaffected.
    Ok,
    /// Processing should stop for this message but it is not a failure
    /// (e.g. a scanner filter decided to quietly drop it).
    Abandon,
    /// Processing failed; `response`/`reason` describe why.
    Fail,
}

/// Side-channel flag set alongside a [`FilterResult`], interpreted
/// differently depending on where the filter runs (spec §4.3 `special()`):
/// a server-side filter uses it to ask the store to rescan, a client-side
/// filter uses it to ask the forwarder to stop scanning for more work this
/// pass.
pub type Special = bool;

/// What a completed filter has to say for itself.
#[derive(Clone, Debug)]
pub struct FilterOutcome {
    pub result: FilterResult,
    pub special: Special,
    /// Short machine-oriented string, suitable as the SMTP reply text.
    pub response: String,
    /// Longer human-oriented explanation, suitable for a log line or the
    /// `Reason:` trailing header.
    pub reason: String,
    /// An SMTP-style reply code to surface to the client, if the filter
    /// wants to override the caller's default.
    pub response_code: Option<u16>,
}

impl FilterOutcome {
    pub fn ok() -> FilterOutcome {
        FilterOutcome {
            result: FilterResult::Ok,
            special: false,
            response: String::new(),
            reason: String::new(),
            response_code: None,
        }
    }

    pub fn abandon(reason: impl Into<String>) -> FilterOutcome {
        FilterOutcome {
            result: FilterResult::Abandon,
            special: false,
            response: String::new(),
            reason: reason.into(),
            response_code: None,
        }
    }

    pub fn fail(response: impl Into<String>, reason: impl Into<String>, code: u16) -> FilterOutcome {
        FilterOutcome {
            result: FilterResult::Fail,
            special: false,
            response: response.into(),
            reason: reason.into(),
            response_code: Some(code),
        }
    }

    pub fn with_special(mut self, special: bool) -> FilterOutcome {
        self.special = special;
        self
    }

    /// Renders a default SMTP reply for this outcome, used when no more
    /// specific message is available from the caller.
    pub fn to_reply(&self, default_code: u16) -> Reply {
        let code = self.response_code.unwrap_or(default_code);
        let text = if self.response.is_empty() {
            "rejected by filter".to_owned()
        } else {
            self.response.clone()
        };
        Reply::new(smtp_message::ReplyCode::custom(code), None, text)
    }
}
