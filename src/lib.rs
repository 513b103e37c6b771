// src/lib.rs
pub mod config;
pub mod core;
pub mod decoders;
pub mod library;
pub mod replay;
pub mod testing;
pub mod types;

// Re-export the most used types
pub use crate::core::{ComponentLogger, LogContext, ReplayError, ReplayResult};
pub use library::{ReplayLibrary, SavedReplay};
pub use replay::{
    Completion, DataSegment, DecodeContext, ReplayBuffer, ReplayDelegate, ReplayFile,
    ReplayFrameExtractor, ReplayPlayback, ReplayQueue,
};
pub use types::{Image, PixelFormat};
