//! # Maintenance Admission Controller
//!
//! Watches a fleet of worker units (Kubernetes pods) and decides, under a
//! global unavailability budget, which units that asked for disruptive
//! maintenance may proceed now.
//!
//! A unit asks by carrying the `needs-maintenance` annotation. When fewer than
//! `max_unavailable` units are unavailable (not ready, approved, or under
//! maintenance) the controller writes `maintenance-approved` onto it; an
//! external agent performs the maintenance and removes the annotations when
//! done.
//!
//! ## Pipeline
//!
//! ```text
//! fleet watch -> FleetCache -> WorkQueue -> workers -> Reconciler -> fleet update
//!                                  ^                       |
//!                                  +---- retry policy -----+
//! ```
//!
//! Tests are included in the module files and under `tests/`.

pub mod cli;
pub mod config;
pub mod constants;
pub mod controller;
pub mod fleet;
pub mod observability;
pub mod prelude;
pub mod runtime;
