//! Policy resolution: from (policy, claims) to desired state

mod instance;
mod key;
mod resolution;
mod resolver;

pub use instance::{ComponentInstance, CLUSTER_LABEL};
pub use key::ComponentKey;
pub use resolution::{ClaimStatus, Resolution};
pub use resolver::{Resolver, ResolverOptions};
