//! Atomic KMS plumbing.
//!
//! This module owns everything that talks to the DRM subsystem:
//! - `device` - device node access and client capabilities
//! - `inventory` - connector/CRTC/plane discovery and selection
//! - `props` - property resolution by name
//! - `framebuffer` - scanout buffer allocation (dumb and GBM backends)
//! - `transaction` - atomic request assembly and submission
//! - `compositor` - pipeline assembly and the per-frame commit loop

pub mod compositor;
pub mod device;
pub mod framebuffer;
pub mod inventory;
pub mod props;
pub mod transaction;

use std::io;

use drm::control::PlaneType;
use drm::ClientCapability;
use thiserror::Error;

use self::props::KmsObject;

pub type KmsResult<T> = Result<T, KmsError>;

/// Everything that can go wrong between opening the device and scanning out
/// a frame.
///
/// All variants are fatal during initialization. During the frame loop only
/// `CommitRejected` is expected; it is reported per frame and the loop moves
/// on.
#[derive(Debug, Error)]
pub enum KmsError {
    #[error("error opening {path:?}")]
    DeviceOpen {
        path: std::path::PathBuf,
        source: io::Error,
    },
    #[error("no usable DRM device found")]
    NoDevice,
    #[error("client capability {0:?} is not supported")]
    CapabilityUnsupported(ClientCapability, #[source] io::Error),
    #[error("error querying display resources")]
    ResourceUnavailable(#[source] io::Error),
    #[error("no connected connector with modes")]
    NoConnectorFound,
    #[error("no usable CRTC")]
    NoCrtcFound,
    #[error("no {0:?} plane compatible with the selected CRTC")]
    NoPlaneFound(PlaneType),
    #[error("object {object:?} has no property named {name:?}")]
    PropertyNotFound { object: KmsObject, name: String },
    #[error("framebuffer allocation failed")]
    AllocationFailure(#[source] io::Error),
    #[error("atomic commit rejected")]
    CommitRejected(#[source] io::Error),
}
