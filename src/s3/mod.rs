pub mod types;
pub mod signing;
pub mod client;

pub use types::*;
pub use client::{ObjectStore, S3Client};
