pub mod types;

pub use types::{Coordinates, EventId, JobId};
