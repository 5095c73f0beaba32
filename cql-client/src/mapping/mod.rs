//! Row-to-model adaptation.
//!
//! A [`MappingInfo`] describes how a model is built; a [`RowAdapter`] is
//! derived from it once per result-set shape and then applied to every row.

mod result_mapper;

pub use result_mapper::{map_rows, JsonMappingInfo, MappingInfo, NameMapping, RowAdapter, ToModelFn};
