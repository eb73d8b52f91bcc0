//! Core data types for realtime market prices.

pub mod currency;
pub mod error;
pub mod price;

pub use currency::*;
pub use error::*;
pub use price::*;
