pub mod clearance;
pub mod fingerprint;
pub mod schema;

pub use clearance::ClearanceStore;
