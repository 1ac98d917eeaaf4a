pub mod config;
pub mod detector;
pub mod error;
pub mod payload;
pub mod routes;

pub use error::DetectorError;
