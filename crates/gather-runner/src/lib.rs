//! Gather stage: runs configured passes against a [`Driver`] and turns
//! what each gatherer produced into an [`Artifacts`] bundle.
//!
//! [`Driver`]: pagegauge_driver::Driver
//! [`Artifacts`]: pagegauge_core_types::Artifacts

pub mod gatherer;
pub mod gatherers;
pub mod runner;

pub use gatherer::{Gatherer, LoadData, PassContext, PassDefinition};
pub use gatherers::GathererFactory;
pub use runner::{GatherOptions, GatherRunner};
