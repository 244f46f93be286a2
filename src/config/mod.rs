//! Tiered configuration.
//!
//! Configuration merges field by field across four tiers:
//! 1. **Defaults** - compiled in
//! 2. **Project** - `$CWD/rpi-tracker/config.yaml`
//! 3. **User** - `~/.rpi-tracker/config.yaml`
//! 4. **Environment** - variables below
//!
//! ## Environment Variables
//! - `RPI_TRACKER_CONFIG_PATH` - Explicit config file (replaces the file tiers)
//! - `RPI_TRACKER_DB_PATH` - Database path
//! - `RPI_TRACKER_USER_DIR` - User config dir (default: `~/.rpi-tracker`)
//! - `RPI_TRACKER_PROJECT_DIR` - Project config dir (default: `./rpi-tracker`)

mod loader;
mod types;

pub use loader::{ConfigLoader, ConfigPaths, ConfigTier, deep_merge};
pub use types::*;
