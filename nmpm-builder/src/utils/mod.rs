//! Utility modules for the playlist builder

pub mod db_retry;

pub use db_retry::retry_on_lock;
