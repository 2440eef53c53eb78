use crate::launcher::LaunchError;
use nimbus_network::CommunicationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WrapperError {
    #[error("service {service} is already registered")]
    AlreadyRegistered { service: String },
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error(transparent)]
    Communication(#[from] CommunicationError),
}

impl From<WrapperError> for CommunicationError {
    fn from(error: WrapperError) -> Self {
        match error {
            WrapperError::Communication(error) => error,
            other => CommunicationError::rejected(other.to_string()),
        }
    }
}
