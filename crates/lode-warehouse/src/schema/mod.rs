/// Common converters (dates, numerics, identifiers)
pub mod common;
pub mod infer;
pub mod stock;
