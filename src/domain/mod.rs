pub mod allocation;
pub mod indicators;
pub mod observation;
pub mod types;

pub use allocation::*;
pub use observation::*;
pub use types::*;
