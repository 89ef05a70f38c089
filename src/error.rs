use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    // Configuration errors
    #[error("Failed to load config file '{path}': {source}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config: {message}")]
    ConfigValidation { message: String },

    // State errors
    #[error("Failed to save state to '{path}': {source}")]
    StateSave {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load state from '{path}': {source}")]
    StateLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse state file '{path}': {source}")]
    StateParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    // Lookups
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    // Discord errors
    #[error("Discord API error: {message}")]
    Discord { message: String },

    #[error("Failed to deliver notification: {message}")]
    Notification { message: String },

    // Generic errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl TrackerError {
    pub fn curator_not_found(actor_id: &str) -> Self {
        TrackerError::NotFound {
            entity: "Curator",
            id: actor_id.to_string(),
        }
    }

    pub fn server_not_found(server_id: &str) -> Self {
        TrackerError::NotFound {
            entity: "Server",
            id: server_id.to_string(),
        }
    }
}

impl From<serenity::Error> for TrackerError {
    fn from(err: serenity::Error) -> Self {
        TrackerError::Discord {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for TrackerError {
    fn from(err: std::io::Error) -> Self {
        TrackerError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        TrackerError::Internal {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
