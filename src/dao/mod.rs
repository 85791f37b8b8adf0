/// Store path layout shared by every client process.
pub mod paths;
/// Typed access to race data on top of a [`store::KvStore`].
pub mod race;
/// Entities persisted under the store paths.
pub mod models;
/// Storage abstraction layer for database operations.
pub mod storage;
/// Key-value store backends.
pub mod store;
