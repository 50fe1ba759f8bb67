pub mod analyzer;
pub mod config;
pub mod response;
pub mod routes;
pub mod storage;

#[cfg(test)]
mod test_support;

pub use config::AppConfig;
pub use routes::{AppState, configure_routes};
