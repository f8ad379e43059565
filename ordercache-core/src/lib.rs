//! ordercache Core - Order Record Model and Error Types
//!
//! Pure data types shared by every ordercache crate. Nothing in here performs
//! I/O: the storage crate owns the cache and adapters, the API crate owns the
//! transports.

pub mod error;
pub mod record;

pub use error::{ErrorKind, OrderError, OrderResult, StoreError, StreamError, ValidationError};
pub use record::{OrderKey, OrderRecord, ORDER_KEY_FIELD};
