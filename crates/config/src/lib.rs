//! # Meridian Configuration
//!
//! One `meridian.toml` file configures a whole node. This crate owns the
//! schema, the parsing, and the validation that keeps impossible values
//! (a zero block period, an empty witness roster) out of the runtime.
//!
//! ```rust
//! use meridian_config::Config;
//!
//! let config = Config::from_str(
//!     r#"
//!     [chain]
//!     chain_id = 1405
//!     chain_name = "Meridian Testnet"
//!
//!     [dpos]
//!     period = 2
//!     witnesses_num = 4
//!
//!     [logging]
//!     level = "info"
//!     format = "pretty"
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.dpos.update_interval(), 24);
//! ```

mod config;
mod error;

pub use config::*;
pub use error::*;
