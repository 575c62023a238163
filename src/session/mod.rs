//! Authenticated session core: shared HTTP client, rotating cookie jar,
//! cookie-file persistence.

pub mod client;
pub mod error;
pub mod jar;

pub use client::{CONNECT_TIMEOUT, GetOptions, READ_TIMEOUT, SessionClient};
pub use error::SessionError;
pub use jar::RotatingJar;
