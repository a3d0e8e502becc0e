//! Custom Resource Definitions for ambassador-shim

mod mapping;

pub use mapping::{Mapping, MappingSpec, MappingStatus};
