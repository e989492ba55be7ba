pub mod error;
pub mod locks;
pub mod shell;
pub mod types;

#[cfg(test)]
pub mod testing;
