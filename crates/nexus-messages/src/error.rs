use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessagesError {
    #[error("invalid value '{value}' for {var}")]
    InvalidConfig { var: &'static str, value: String },

    #[error("{var} must be greater than zero")]
    ZeroConfig { var: &'static str },
}
