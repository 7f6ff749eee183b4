//! Check, persist, propagate: the BreachWatch pipeline.
//!
//! This crate ties the lookup client, the two finding stores, and the asset
//! annotator into the daily run (see [`pipeline::run_daily`]), plus the
//! reconciliation pass that repairs drift between the stores.

pub mod pipeline;
pub mod reconcile;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;
