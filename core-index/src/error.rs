use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Tracked item {0} not found")]
    NotFound(String),

    #[error("Invalid tracked item: {field} - {message}")]
    InvalidItem { field: String, message: String },

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for IndexError {
    fn from(e: sqlx::Error) -> Self {
        IndexError::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
