pub mod values;
pub mod storage;
pub mod graph;
pub mod transactions;

pub use crate::graph::db::ResourceDatabase;
pub use crate::graph::model::{AccessMode, AccessPriority, ResourcePath, ResourceRef, ResourceType};
pub use crate::storage::mem_store::MemGraph;
pub use crate::storage::{Authority, GraphError, ResourceGraph};
pub use crate::transactions::{
    BatchTransaction, ReadConfiguration, ResourceTransaction, TransactionConfig, TransactionError,
    WriteConfiguration,
};
pub use crate::values::{SampledValue, TimeSeries, Value, ValueKind};
