//! Scripted collaborators for exercising the replay pipeline without a real
//! decoder.
pub mod mocks;

pub use mocks::{MockBackend, RecordingDelegate};
