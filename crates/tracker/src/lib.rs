pub mod pending;
pub mod tracker;

pub use pending::PendingDeltas;
pub use tracker::Tracker;
