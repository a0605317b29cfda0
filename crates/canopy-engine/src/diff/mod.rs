//! Diff and planning: from two resolutions to an ordered action plan

mod action;
mod differ;
mod plan;

pub use action::Action;
pub use differ::diff;
pub use plan::Plan;
