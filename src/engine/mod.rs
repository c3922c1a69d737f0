//! Core engine: the aggregate → metrics → profitability → decision pass.

pub mod aggregator;
pub mod metrics;
pub mod profitability;
pub mod decision;
pub mod scheduler;
