//! Protocol Stack Layers Library
//!
//! This crate implements the eNodeB PHY layer worker subsystem: per-TTI
//! uplink/downlink processing for one component carrier.

pub mod phy;

use thiserror::Error;

/// Common errors for protocol layers
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Layer not initialized")]
    NotInitialized,

    #[error("Unknown RNTI {0}")]
    UnknownRnti(common::Rnti),

    #[error("Configuration unavailable: {0}")]
    ConfigUnavailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Processing error: {0}")]
    ProcessingError(String),

    /// Unrecoverable resource condition. The application layer decides
    /// whether to terminate the process on this variant.
    #[error("Fatal resource failure: {0}")]
    Fatal(String),
}
