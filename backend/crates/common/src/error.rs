use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormsyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),
}

pub type FormsyncResult<T> = Result<T, FormsyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_kind() {
        let err = FormsyncError::Config("DB_TABLE_NAME is required but not set".to_owned());
        assert_eq!(
            err.to_string(),
            "configuration error: DB_TABLE_NAME is required but not set"
        );
        assert_eq!(
            FormsyncError::Database("timeout".into()).to_string(),
            "database error: timeout"
        );
    }
}
