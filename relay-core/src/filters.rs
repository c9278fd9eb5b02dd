use mailfilter::{
    CopyFilter, DeliveryFilter, ExecutableFilter, Filter, FilterChain, FilterSide, MessageIdFilter,
    NetworkFilter, NullFilter, SpamFilter, SpamMode, SplitFilter,
};
use mailstore::MessageStore;

use crate::config::FilterSpec;

/// Instantiates a [`mailfilter::FilterChain`] from a list of
/// [`FilterSpec`]s, picking the server- or client-side exit-code ranges for
/// [`ExecutableFilter`] as appropriate (spec §4.3, §9 Open Question #2).
pub fn build_chain(specs: &[FilterSpec], side: FilterSide, store: &MessageStore) -> FilterChain {
    let filters: Vec<Box<dyn Filter>> = specs
        .iter()
        .map(|spec| build_one(spec, side, store))
        .collect();
    FilterChain::new(filters)
}

fn build_one(spec: &FilterSpec, side: FilterSide, store: &MessageStore) -> Box<dyn Filter> {
    match spec {
        FilterSpec::Null => Box::new(NullFilter),
        FilterSpec::Exit { code, response, reason } => {
            Box::new(mailfilter::ExitFilter::new(side, *code, response.clone(), reason.clone()))
        }
        FilterSpec::Executable { path, timeout_secs } => Box::new(ExecutableFilter::new(
            side,
            path.clone(),
            store.spool_dir().to_path_buf(),
            std::time::Duration::from_secs(*timeout_secs),
        )),
        FilterSpec::Network { address } => Box::new(NetworkFilter::new(address.clone())),
        FilterSpec::Spam { address, rewrite } => Box::new(SpamFilter::new(
            address.clone(),
            if *rewrite { SpamMode::RewriteAndPass } else { SpamMode::Scan },
            store.clone(),
        )),
        FilterSpec::MessageId => Box::new(MessageIdFilter::new(store.clone())),
        FilterSpec::Copy { targets } => Box::new(CopyFilter::new(store.clone(), targets.clone())),
        FilterSpec::Delivery { forward_to, forward_to_address } => Box::new(DeliveryFilter::new(
            store.clone(),
            forward_to.clone(),
            forward_to_address.clone(),
        )),
        FilterSpec::Split => Box::new(SplitFilter::new(store.clone())),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn builds_an_empty_chain_from_no_specs() {
        let dir = tempdir().unwrap();
        let store = MessageStore::open(dir.path(), None).unwrap();
        let chain = build_chain(&[], FilterSide::Server, &store);
        let id = mailstore::MessageId::from_token("m1");
        let outcome = smol::block_on(chain.run(&id));
        assert_eq!(outcome.result, mailfilter::FilterResult::Ok);
    }

    #[test]
    fn builds_an_exit_filter_that_fails() {
        let dir = tempdir().unwrap();
        let store = MessageStore::open(dir.path(), None).unwrap();
        let specs = vec![FilterSpec::Exit {
            code: 1,
            response: "blocked".to_owned(),
            reason: "policy".to_owned(),
        }];
        let chain = build_chain(&specs, FilterSide::Server, &store);
        let id = mailstore::MessageId::from_token("m1");
        let outcome = smol::block_on(chain.run(&id));
        assert_eq!(outcome.result, mailfilter::FilterResult::Fail);
    }
}
