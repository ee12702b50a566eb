pub mod artifacts;
pub mod blob;
pub mod frame;
pub mod loaders;
pub mod metrics_store;
pub mod paths;
pub mod prepare;

pub use artifacts::*;
pub use blob::*;
pub use frame::*;
pub use loaders::*;
pub use metrics_store::*;
pub use paths::*;
pub use prepare::*;

use std::path::PathBuf;

/// Root for TripWise local state: `<platform data dir>/tripwise`, or
/// `./tripwise` when the platform has none.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tripwise")
}
