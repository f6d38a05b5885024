//! Numerical helpers shared by the correction engines.

pub mod statistics;
