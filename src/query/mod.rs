// Symbol queries over the index

pub mod engine;

pub use engine::{QueryEngine, QueryResult};
