//! Concrete query definitions for the signal-enhancement service.
//!
//! | Query | Scope | Chunked by |
//! |-------|-------|------------|
//! | [`FilterDefinitionsForSignalDetections`] | processing stage | signal detections |
//! | [`ProcessingMaskDefinitions`] | station group | channels, per operation and phase set |

pub mod filter_definitions;
pub mod processing_masks;

pub use filter_definitions::{
    FilterDefinitionCache, FilterDefinitionsArgs, FilterDefinitionsForSignalDetections,
    FilterDefinitionsResponse, MAX_SIGNAL_DETECTIONS_PER_REQUEST,
};
pub use processing_masks::{
    ProcessingMaskCache, ProcessingMaskDefinitions, ProcessingMaskDefinitionsArgs,
    ProcessingMaskDefinitionsResponse, MAX_CHANNELS_PER_REQUEST,
};
