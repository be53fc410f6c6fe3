pub mod sampled;
pub mod value;

pub use sampled::{Quality, SampledValue, TimeSeries};
pub use value::{ResourceValue, Value, ValueKind};
