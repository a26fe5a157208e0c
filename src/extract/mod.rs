//! Identity key extraction and fallback resolution.

mod resolver;
mod strategy;

pub use resolver::KeyResolver;
pub use strategy::{CustomExtractor, KeyExtractionStrategy, ParamType};
