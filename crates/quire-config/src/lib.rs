//! # Quire Configuration Library
//!
//! Typed configuration for the Quire file lifecycle engine.
//!
//! ## Features
//!
//! - Multi-format support (TOML, YAML, JSON)
//! - Serde defaults for every section, so partial files are valid
//! - Validation of cross-field constraints before the engine starts
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quire_config::ConfigLoader;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::load_from_file("quire.toml").await?;
//!     println!("autosave every {}ms", config.autosave.interval_ms);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod loader;

pub use config::*;
pub use loader::*;
