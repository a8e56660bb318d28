//! Constants shared across the bridge

pub mod names;
pub mod sizes;
