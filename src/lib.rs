pub mod config;
pub mod decipher;
pub mod error;
pub mod guess;
pub mod llm;
pub mod metadata;
pub mod server;
pub mod variations;

#[cfg(test)]
mod config_tests;

pub use config::Config;
pub use decipher::{should_fetch_preview, DecipherOptions, DecipherReport, Decipherer, Session};
pub use error::AppError;
pub use guess::{Confidence, GuessRequestor, GuessResult};
pub use metadata::{MetadataClient, ValidationAttempt, ValidationOutcome};
pub use variations::generate_url_variations;
