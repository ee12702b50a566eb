pub mod errors;
pub mod features;
pub mod trips;

pub use errors::*;
pub use features::*;
pub use trips::*;
