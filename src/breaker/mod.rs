mod circuit;
mod state;

pub use circuit::{BreakerConfig, BreakerSnapshot, CircuitBreaker};
pub use state::{Admission, BreakerRecord, BreakerState, Transition};
