//! Stratus core library exports

pub mod adapter;
pub mod engine;
pub mod provider;
pub mod report;
pub mod scan;
