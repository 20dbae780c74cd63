//! Exchange Common Types
//!
//! Currency, pair and exchange rate definitions shared by the rate cache
//! and the HTTP service.

pub mod currency;
pub mod rate;
pub mod error;

pub use currency::*;
pub use rate::*;
pub use error::*;
