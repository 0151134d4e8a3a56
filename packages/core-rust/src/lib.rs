//! Essaybook Core: record types, collection schemas, record keys, and clocks.

pub mod clock;
pub mod key;
pub mod schema;
pub mod traits;
pub mod types;

pub use clock::{ClockSource, ManualClock, Stamper, SystemClock};
pub use key::RecordKey;
pub use schema::{CollectionSchema, DatabaseSchema, IndexDef, ValidationResult};
pub use traits::{ApiKeys, Collection, Evaluations};
pub use types::{ApiKey, Evaluation, NewApiKey, NewEvaluation};
