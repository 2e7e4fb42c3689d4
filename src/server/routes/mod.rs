//! Route handlers module.

pub mod health;
