#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

pub mod chained;
pub mod cuckoo;
pub mod hash;
pub mod key;
pub mod kick;
pub mod probe;
pub mod probing;
pub mod reduce;

mod error;
mod spinlock;

pub use chained::Chained;
pub use cuckoo::Cuckoo;
pub use error::BuildError;
pub use kick::BalancedKicking;
pub use kick::BiasedKicking;
pub use kick::UnbiasedKicking;
pub use probing::Probing;
pub use probing::RobinHood;

/// Named numeric metrics describing a table's internal layout.
///
/// Every engine exposes an introspection operation returning one of these;
/// the key set is engine-specific and documented on the method.
pub type Statistics = std::collections::BTreeMap<&'static str, f64>;
