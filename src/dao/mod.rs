/// Key/value storage backends with revision-checked writes.
pub mod kv_store;
/// Persisted record layouts.
pub mod models;
/// Typed access to quiz records and current-quiz pointers.
pub mod quiz_repository;
/// Storage abstraction layer for database operations.
pub mod storage;
