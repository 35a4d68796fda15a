pub mod backtest;
pub mod data;
pub mod domain;
pub mod engine;
pub mod error;
pub mod evaluation;
pub mod optimize;

pub use error::{AgentError, EnvError};
