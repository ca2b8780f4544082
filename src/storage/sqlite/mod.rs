//! SQLite implementations of storage interfaces.

mod command_store;
mod operation_store;

pub use command_store::SqliteCommandStore;
pub use operation_store::SqliteOperationStore;
