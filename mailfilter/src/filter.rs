use async_trait::async_trait;
use mailstore::MessageId;

use crate::result::FilterOutcome;

/// A pluggable per-message processor (spec §4.3).
///
/// Implementations drive themselves to completion asynchronously;
/// [`Filter::run`] resolves once [`FilterOutcome`] is available, folding the
/// start/done-signal pair from spec.md into a single awaited call — the
/// natural shape once "done" is modelled as `Future` completion rather than
/// a signal object (see DESIGN.md's "legacy vs. newer filter interface"
/// resolution).
#[async_trait]
pub trait Filter: Send + Sync {
    /// Runs the filter against the given message and returns once it has
    /// settled on an outcome.
    async fn run(&self, id: &MessageId) -> FilterOutcome;

    /// A short name used in logs and in `Reason:` trailing headers.
    fn name(&self) -> &str;
}

/// Runs filters in order; propagates `Ok` through the chain and stops at
/// the first non-`Ok` result (spec §8 invariant 4). `special` is the OR of
/// every child that actually ran.
pub struct FilterChain {
    filters: Vec<Box<dyn Filter>>,
}

impl FilterChain {
    pub fn new(filters: Vec<Box<dyn Filter>>) -> FilterChain {
        FilterChain { filters }
    }

    pub fn empty() -> FilterChain {
        FilterChain { filters: Vec::new() }
    }

    pub async fn run(&self, id: &MessageId) -> FilterOutcome {
        let mut special = false;
        for filter in &self.filters {
            let outcome = filter.run(id).await;
            special = special || outcome.special;
            if outcome.result != crate::result::FilterResult::Ok {
                return outcome.with_special(special);
            }
        }
        FilterOutcome::ok().with_special(special)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use mailstore::MessageId;

    use super::*;
    use crate::result::FilterResult;

    struct Scripted {
        name: &'static str,
        outcome: FilterOutcome,
    }

    #[async_trait]
    impl Filter for Scripted {
        async fn run(&self, _id: &MessageId) -> FilterOutcome {
            self.outcome.clone()
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    #[test]
    fn chain_stops_at_first_non_ok() {
        smol::block_on(async {
            let chain = FilterChain::new(vec![
                Box::new(Scripted { name: "a", outcome: FilterOutcome::ok() }),
                Box::new(Scripted {
                    name: "b",
                    outcome: FilterOutcome::fail("blocked", "policy violation", 550),
                }),
                Box::new(Scripted {
                    name: "c",
                    outcome: FilterOutcome::abandon("should never run"),
                }),
            ]);
            let id = MessageId::from_token("m1");
            let outcome = chain.run(&id).await;
            assert_eq!(outcome.result, FilterResult::Fail);
            assert_eq!(outcome.response, "blocked");
        });
    }

    #[test]
    fn chain_ors_special_across_executed_children() {
        smol::block_on(async {
            let chain = FilterChain::new(vec![
                Box::new(Scripted {
                    name: "a",
                    outcome: FilterOutcome::ok().with_special(true),
                }),
                Box::new(Scripted { name: "b", outcome: FilterOutcome::ok() }),
            ]);
            let id = MessageId::from_token("m1");
            let outcome = chain.run(&id).await;
            assert_eq!(outcome.result, FilterResult::Ok);
            assert!(outcome.special);
        });
    }

    #[test]
    fn empty_chain_is_ok() {
        smol::block_on(async {
            let chain = FilterChain::empty();
            let id = MessageId::from_token("m1");
            let outcome = chain.run(&id).await;
            assert_eq!(outcome.result, FilterResult::Ok);
        });
    }
}
