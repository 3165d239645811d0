use crate::types::{
    Action, BAD_REQUEST, INTERNAL_SERVER_ERROR, NOT_FOUND, Resolution, SanctionKind,
    SanctionState, UNAUTHORIZED,
};

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("Embargo end date must fall after its initiation date")]
    InvalidEndDate,
    #[error("Registration {registration_id} already has an active {kind}")]
    SanctionExists {
        kind: SanctionKind,
        registration_id: String,
    },
    #[error("Registration {0} has been deleted")]
    RegistrationDeleted(String),
    #[error("A sanction needs at least one authorizer")]
    NoAuthorizers,
}

/// Failures of the approve/reject entry points and the stores behind them.
#[derive(thiserror::Error, Debug)]
pub enum SanctionError {
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    #[error("{message_short}: {message_long}")]
    Token {
        message_short: String,
        message_long: String,
    },
    #[error("There is no {} associated with this token.", .kind.display_name())]
    SanctionNotFound {
        kind: SanctionKind,
        sanction_id: String,
    },
    #[error("{kind} {sanction_id} is already {resolution:?}")]
    AlreadyResolved {
        kind: SanctionKind,
        sanction_id: String,
        resolution: Resolution,
    },
    #[error("User {user_id} is not authorized to {action} this sanction")]
    Permissions { user_id: String, action: Action },
    #[error("No sanction handler for kind '{0}'")]
    UnsupportedHandlerKind(String),
    #[error("Registration {0} not found")]
    RegistrationNotFound(String),
    #[error("Invalid sanction transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: SanctionState,
        to: SanctionState,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("Encoding error: {0}")]
    Encoding(String),
}

impl SanctionError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidToken(_)
            | Self::Token { .. }
            | Self::InvalidTransition { .. }
            | Self::Validation(_) => BAD_REQUEST,
            Self::SanctionNotFound { .. } | Self::RegistrationNotFound(_) => NOT_FOUND,
            Self::AlreadyResolved {
                kind, resolution, ..
            } => kind.already_resolved_status(*resolution),
            Self::Permissions { .. } => UNAUTHORIZED,
            Self::UnsupportedHandlerKind(_) | Self::Storage(_) | Self::Encoding(_) => {
                INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn message_short(&self) -> String {
        match self {
            Self::InvalidToken(_) => "Invalid token".to_string(),
            Self::Token { message_short, .. } => message_short.clone(),
            Self::Permissions { .. } => "Unauthorized access".to_string(),
            Self::SanctionNotFound { .. } | Self::RegistrationNotFound(_) => {
                "Not found".to_string()
            }
            Self::AlreadyResolved { .. } | Self::InvalidTransition { .. } => {
                "Action not allowed".to_string()
            }
            Self::Validation(_) => "Invalid request".to_string(),
            Self::UnsupportedHandlerKind(_) | Self::Storage(_) | Self::Encoding(_) => {
                "Internal error".to_string()
            }
        }
    }

    pub fn message_long(&self) -> String {
        match self {
            Self::Token { message_long, .. } => message_long.clone(),
            Self::AlreadyResolved {
                kind,
                resolution: Resolution::Approved,
                ..
            } => format!("This registration is not pending {}.", kind.display_name()),
            Self::AlreadyResolved {
                kind,
                resolution: Resolution::Rejected,
                ..
            } => format!("This registration {} has been rejected.", kind.display_name()),
            other => other.to_string(),
        }
    }

    pub(crate) fn encoding(err: impl std::fmt::Display) -> Self {
        Self::Encoding(err.to_string())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TokenCodecError {
    #[error("failed to encode token: {0}")]
    Encoding(String),
}
