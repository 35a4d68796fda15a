pub mod search;
pub mod solver;
pub mod space;

pub use search::*;
pub use solver::*;
pub use space::*;
