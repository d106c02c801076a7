pub mod config;
pub mod discover;
pub mod document;
pub mod filesystem;
pub mod markdown;
pub mod notion;
pub mod runtime;
pub mod sync;

#[cfg(test)]
mod testing;
