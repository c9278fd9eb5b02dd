//! Pluggable per-message filter chain (spec §4.3): a tri-state
//! ok/abandon/fail result, six concrete variants, and the [`FilterChain`]
//! that runs them in order and short-circuits on the first non-`Ok`.

mod editors;
mod executable;
mod exitcode;
mod filter;
mod network;
mod null_exit;
mod result;
mod spam;

pub use editors::{CopyFilter, DeliveryFilter, MessageIdFilter, SplitFilter};
pub use executable::ExecutableFilter;
pub use exitcode::{classify, FilterSide, CLIENT_ABANDON_RANGE, SERVER_ABANDON_RANGE};
pub use filter::{Filter, FilterChain};
pub use network::NetworkFilter;
pub use null_exit::{ExitFilter, NullFilter};
pub use result::{FilterOutcome, FilterResult, Special};
pub use spam::{SpamFilter, SpamMode};
