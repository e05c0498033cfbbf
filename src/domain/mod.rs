//! Domain entities, value objects and the ports the engines depend on.

pub mod catalog;
pub mod money;
pub mod order;
pub mod page;
pub mod payment;
pub mod ports;
