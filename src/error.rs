use thiserror::Error;

/// Faults raised by an agent while acting, fitting or receiving parameters.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    /// Strategy state has not been fitted or set.
    #[error("model not fitted: fit the model or provide indicator parameters first")]
    NotFitted,

    #[error("missing parameter `{name}`")]
    MissingParam { name: String },

    #[error("invalid parameter `{name}`: {message}")]
    InvalidParam { name: String, message: String },

    /// Any other failure inside `act` or `fit`.
    #[error("strategy fault: {message}")]
    Strategy { message: String },

    /// Environment failure outside of a step (reset, observation building).
    #[error("environment fault: {0}")]
    Environment(#[from] EnvError),
}

impl AgentError {
    pub fn missing_param(name: impl Into<String>) -> Self {
        Self::MissingParam { name: name.into() }
    }

    pub fn invalid_param(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParam {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn strategy(message: impl Into<String>) -> Self {
        Self::Strategy {
            message: message.into(),
        }
    }

    /// Short classification used in run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFitted => "NotFitted",
            Self::MissingParam { .. } => "MissingParam",
            Self::InvalidParam { .. } => "InvalidParam",
            Self::Strategy { .. } => "StrategyError",
            Self::Environment(_) => "EnvironmentError",
        }
    }
}

/// Faults captured by an environment, either in a step status or on reset.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnvError {
    #[error("invalid action: {message}")]
    InvalidAction { message: String },

    #[error("out of data at index {index}")]
    OutOfData { index: usize },

    #[error("market data error: {message}")]
    Market { message: String },
}

impl EnvError {
    pub fn invalid_action(message: impl Into<String>) -> Self {
        Self::InvalidAction {
            message: message.into(),
        }
    }

    pub fn market(message: impl Into<String>) -> Self {
        Self::Market {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidAction { .. } => "InvalidAction",
            Self::OutOfData { .. } => "OutOfData",
            Self::Market { .. } => "MarketError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_error_kinds() {
        assert_eq!(AgentError::NotFitted.kind(), "NotFitted");
        assert_eq!(AgentError::missing_param("ma1").kind(), "MissingParam");
        assert_eq!(AgentError::strategy("boom").kind(), "StrategyError");
    }

    #[test]
    fn test_env_error_converts_into_agent_error() {
        let err: AgentError = EnvError::market("empty series").into();
        assert_eq!(err.kind(), "EnvironmentError");
        assert!(err.to_string().contains("empty series"));
    }

    #[test]
    fn test_error_messages() {
        let err = AgentError::invalid_param("ma1", "must be at least 1");
        assert_eq!(err.to_string(), "invalid parameter `ma1`: must be at least 1");
        let env = EnvError::OutOfData { index: 12 };
        assert_eq!(env.to_string(), "out of data at index 12");
        assert_eq!(env.kind(), "OutOfData");
    }
}
