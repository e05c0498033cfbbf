//! Application layer: the engines that orchestrate pricing, orders, quotes
//! and payment reconciliation on top of the domain ports.

pub mod locking;
pub mod orders;
pub mod payments;
pub mod pricing;
pub mod quote;
