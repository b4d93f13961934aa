#![doc = "clickhelper-core: workflow orchestration and action pipeline engine for clickhelper."]

//! This crate holds all business logic for clickhelper: the publication action model, the
//! engines that drive actions against the documentation platform, backup retention, and the
//! workflow runner that ties them together into a run report.
//!
//! Network transports are not part of this crate. They plug in through the traits in
//! [`contract`], which are mockable for tests.

pub mod clock;
pub mod contract;
pub mod error;
pub mod model;
pub mod poll;
pub mod project;
pub mod publication;
pub mod report;
pub mod retention;
pub mod workflow;
