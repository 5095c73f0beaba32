//! Fixed-arity tuple values.

use std::fmt;

use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};

use super::value::CqlValue;
use crate::error::{DriverError, Result};

/// An ordered, fixed-length, heterogeneous sequence of values.
///
/// A tuple owns its elements: construction copies the input and
/// [`Tuple::values`] returns a copy, so callers can never alias or mutate
/// the backing storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    elements: Box<[CqlValue]>,
}

impl Tuple {
    /// Creates a tuple taking ownership of `elements`.
    ///
    /// Fails with [`DriverError::Construction`] when `elements` is empty.
    pub fn new(elements: Vec<CqlValue>) -> Result<Self> {
        if elements.is_empty() {
            return Err(DriverError::Construction(
                "a tuple must have at least one element".to_string(),
            ));
        }
        Ok(Self {
            elements: elements.into_boxed_slice(),
        })
    }

    /// Creates a tuple by copying `elements`.
    pub fn from_slice(elements: &[CqlValue]) -> Result<Self> {
        Self::new(elements.to_vec())
    }

    /// Returns the element at `index`, or `None` when out of range.
    pub fn get(&self, index: usize) -> Option<&CqlValue> {
        self.elements.get(index)
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Always false; tuples are never empty.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Returns a copy of the elements.
    pub fn values(&self) -> Vec<CqlValue> {
        self.elements.to_vec()
    }

    /// Iterates over the elements in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &CqlValue> {
        self.elements.iter()
    }
}

impl TryFrom<Vec<CqlValue>> for Tuple {
    type Error = DriverError;

    fn try_from(elements: Vec<CqlValue>) -> Result<Self> {
        Tuple::new(elements)
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, element) in self.elements.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", element)?;
        }
        f.write_str(")")
    }
}

impl Serialize for Tuple {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.elements.len()))?;
        for element in self.elements.iter() {
            seq.serialize_element(element)?;
        }
        seq.end()
    }
}
