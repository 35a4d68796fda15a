pub mod equal;
pub mod mesa;
pub mod momentum;
pub mod random;
pub mod strategy;

pub use equal::*;
pub use mesa::*;
pub use momentum::*;
pub use random::*;
pub use strategy::*;
