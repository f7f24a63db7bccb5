//! In-memory storage engine: the ordered sample vector, the tag index, the
//! timeseries aggregate built on top of them, the process-wide registry, and
//! the query/aggregation engine.

pub mod query;
pub mod record;
pub mod registry;
pub mod sample;
pub mod tagindex;
pub mod timeseries;

pub use query::{execute, get_range_indexes, QuerySpec, Row};
pub use record::{Label, Record};
pub use registry::{Created, Registry};
pub use sample::SampleVec;
pub use timeseries::{NewPoint, Timeseries};
