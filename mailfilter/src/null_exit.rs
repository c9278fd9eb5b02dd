use async_trait::async_trait;
use mailstore::MessageId;

use crate::{
    exitcode::{classify, FilterSide},
    filter::Filter,
    result::FilterOutcome,
};

/// Always succeeds immediately; used as a no-op placeholder in a chain
/// (spec §4.3 "NullFilter").
pub struct NullFilter;

#[async_trait]
impl Filter for NullFilter {
    async fn run(&self, _id: &MessageId) -> FilterOutcome {
        FilterOutcome::ok()
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Settles immediately on a preconfigured exit code, run through the same
/// mapping an [`crate::ExecutableFilter`] would apply — useful for testing
/// and for statically forcing a particular outcome in configuration (spec
/// §4.3 "ExitFilter").
pub struct ExitFilter {
    side: FilterSide,
    code: i32,
    response: String,
    reason: String,
}

impl ExitFilter {
    pub fn new(side: FilterSide, code: i32, response: impl Into<String>, reason: impl Into<String>) -> ExitFilter {
        ExitFilter { side, code, response: response.into(), reason: reason.into() }
    }
}

#[async_trait]
impl Filter for ExitFilter {
    async fn run(&self, _id: &MessageId) -> FilterOutcome {
        classify(self.side, self.code, self.response.clone(), self.reason.clone())
    }

    fn name(&self) -> &str {
        "exit"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::FilterResult;

    #[test]
    fn null_filter_always_ok() {
        smol::block_on(async {
            let id = MessageId::from_token("m");
            assert_eq!(NullFilter.run(&id).await.result, FilterResult::Ok);
        });
    }

    #[test]
    fn exit_filter_uses_configured_code() {
        smol::block_on(async {
            let id = MessageId::from_token("m");
            let f = ExitFilter::new(FilterSide::Server, 1, "blocked", "policy");
            let outcome = f.run(&id).await;
            assert_eq!(outcome.result, FilterResult::Fail);
            assert_eq!(outcome.response, "blocked");
        });
    }
}
