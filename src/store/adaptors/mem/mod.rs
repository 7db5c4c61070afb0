pub mod mem_store_engine;

pub use mem_store_engine::*;

#[cfg(test)]
mod mem_engine_test;
