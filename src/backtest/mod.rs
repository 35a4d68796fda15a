pub mod env;
pub mod interrupt;
pub mod live;
pub mod market;
pub mod runner;

pub use env::*;
pub use interrupt::*;
pub use live::*;
pub use market::*;
pub use runner::*;
