#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Input rejected by a `validator` rule.
    #[error("Validation failed: {0}")]
    Validation(String),
}

impl From<validator::ValidationErrors> for CoreError {
    fn from(errors: validator::ValidationErrors) -> Self {
        CoreError::Validation(crate::validation::describe(&errors))
    }
}
