pub mod capture;
pub mod config;
pub mod detection;
pub mod error;
pub mod geometry;
pub mod system;
pub mod tracking;
#[cfg(feature = "viz")]
pub mod viz;
