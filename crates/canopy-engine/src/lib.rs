//! Canopy engine - policy resolution, diff, and apply
//!
//! The reconciliation core of Canopy:
//!
//! - [`resolve::Resolver`] turns (policy, claims, external data) into the
//!   desired [`resolve::Resolution`] deterministically.
//! - [`diff::diff`] compares the actual and desired resolutions into an
//!   ordered action [`diff::Plan`].
//! - [`apply::ApplyEngine`] executes the plan against the plugin registry,
//!   committing each successful action to actual state and isolating
//!   failures to their dependent branches.
//!
//! The resolver and differ are pure; only apply performs I/O.

#![deny(unsafe_code)]

pub mod actual;
pub mod apply;
pub mod diff;
pub mod error;
pub mod external;
pub mod progress;
pub mod resolve;


pub use actual::{InMemoryStateUpdater, StateError, StateUpdater};
pub use apply::{
    refresh_endpoints, ActionOutcome, ActionRecord, ApplyContext, ApplyEngine, ApplyOptions,
    ApplyReport,
};
pub use diff::{diff, Action, Plan};
pub use error::{ApplyError, Breadcrumb, PlanError, ResolutionError};
pub use external::{
    ExternalData, ExternalError, SecretLoader, StaticSecretLoader, StaticUserLoader, UserLoader,
};
pub use progress::Progress;
pub use resolve::{
    ClaimStatus, ComponentInstance, ComponentKey, Resolution, Resolver, ResolverOptions,
    CLUSTER_LABEL,
};
