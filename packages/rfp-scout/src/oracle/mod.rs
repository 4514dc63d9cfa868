//! Semantic oracle implementations.

pub mod credentials;
pub mod openai;

pub use credentials::{OracleCredentials, SecretString};
pub use openai::OpenAiOracle;
