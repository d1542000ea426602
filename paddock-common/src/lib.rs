//! # Paddock Common Library
//!
//! Shared code for the paddock schedule-sync services:
//! - Common error type
//! - Configuration loading and data folder resolution
//! - Event types (PaddockEvent enum) and event bus
//! - Database initialization and schema creation

pub mod config;
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
