//! Core types for the CQL driver: error taxonomy, consistency levels,
//! partition tokens and native values.

#![warn(missing_docs)]

pub mod consistency;
pub mod error;
pub mod token;
pub mod types;

pub use consistency::{Consistency, WriteType};
pub use error::{DriverError, ResponseErrorCode, Result};
pub use token::Token;
pub use types::{
    ColumnSelector, ColumnSet, ColumnSpec, ColumnType, CqlDuration, CqlValue, Row, Tuple,
};
