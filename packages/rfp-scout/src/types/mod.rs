//! Data types for the RFP discovery pipeline.

pub mod bid;
pub mod candidate;
pub mod config;
pub mod entity;
pub mod run;
pub mod site;
