//! Getting text to speak: reading the selection and cleaning it up.

pub mod capture;
pub mod normalize;

pub use capture::{
    CommandExecutor, MockCommandExecutor, SelectionSource, SystemCommandExecutor, read_selection,
};
pub use normalize::normalize_for_speech;
