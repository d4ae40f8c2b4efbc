pub mod aggregate;
pub mod clock;
pub mod dates;
pub mod types;
pub mod words;

pub use clock::IncrementClock;
pub use types::{DailySummary, DeviceLog, Increment, Settings, SharedState};
pub use words::{EditDelta, count_words};
