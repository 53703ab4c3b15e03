pub mod batch;
pub mod config;
pub mod issuer;
pub mod mock;
pub mod pool;

#[cfg(test)]
mod testing;
