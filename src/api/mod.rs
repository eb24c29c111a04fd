mod client;
mod error;

pub use client::{ApiClient, API_KEY_HEADER};
pub use error::ApiError;
