//! Error types for selspeak.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SelspeakError {
    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio output errors
    #[error("Audio output device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio output failed: {message}")]
    AudioOutput { message: String },

    #[error("Audio device write failed: {message}")]
    AudioWrite { message: String },

    // Synthesis errors
    #[error("Speech synthesis engine not found: {command}")]
    SynthesisEngineNotFound { command: String },

    #[error("Speech synthesis failed: {message}")]
    Synthesis { message: String },

    #[error("Speech synthesis cancelled")]
    SynthesisCancelled,

    // Selection capture errors
    #[error("Selection tool not found: {tool}")]
    SelectionToolNotFound { tool: String },

    #[error("Timed out after {timeout_ms}ms waiting for {tool}")]
    SelectionTimeout { tool: String, timeout_ms: u64 },

    #[error("Command '{command}' exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    // Instance lock errors
    #[error("Another instance is already speaking (pid {pid}, lock {path})")]
    InstanceLocked { pid: u32, path: String },

    #[error("Instance lock error: {message}")]
    Lock { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, SelspeakError>;
