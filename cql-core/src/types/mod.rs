//! Native value types: scalar values, tuples, rows and column metadata.

mod column;
mod row;
mod tuple;
mod value;

pub use column::{ColumnSpec, ColumnType};
pub use row::{ColumnSelector, ColumnSet, Row};
pub use tuple::Tuple;
pub use value::{CqlDuration, CqlValue};
