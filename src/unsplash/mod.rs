pub mod api_types;
mod cache;
pub mod client;
pub mod types;

pub use client::{PhotoSource, UnsplashClient};
pub use types::Photo;
