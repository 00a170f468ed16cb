//! Domain errors raised while parsing stage ids, classes and settings.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FulltextError {
    /// Settings failed to load or validate
    #[error("Invalid settings: {0}")]
    Config(String),

    /// Stage id is not of the form `<name>-v<version>`
    #[error("Malformed stage id {0:?}, expected <name>-v<version>")]
    InvalidStageId(String),

    /// Unknown parent class or an `extends` cycle
    #[error("Bad class hierarchy: {0}")]
    Hierarchy(String),
}
