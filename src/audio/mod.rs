//! Audio output: device abstraction, sample conversion and the cpal backend.

pub mod convert;
#[cfg(feature = "cpal-audio")]
pub mod cpal_output;
pub mod device;

#[cfg(feature = "cpal-audio")]
pub use cpal_output::{CpalBackend, list_output_devices};
pub use device::{CloseMode, MockOutput, OutputBackend, OutputDevice, OutputFormat};
