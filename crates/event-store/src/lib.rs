pub mod change;
pub mod error;
pub mod key;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;

pub use change::{ChangeKind, ChangeRecord, RowImage, SequenceNumber, StoredItem};
pub use common::{DayBucket, Source};
pub use error::{EventStoreError, Result};
pub use key::StoreKey;
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use record::{DailyAggregate, EventId, RawEvent};
pub use store::{ChangeStream, EventStore, EventStoreExt};
