//! DRM device access.

use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use drm::control::Device as ControlDevice;
use drm::{ClientCapability, Device};
use tracing::debug;

use super::{KmsError, KmsResult};

/// An open DRM device node.
///
/// Clones share one file description, so GEM handles and framebuffer ids
/// obtained through any clone refer to the same kernel objects.
#[derive(Debug, Clone)]
pub struct Card(Rc<File>);

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl Device for Card {}
impl ControlDevice for Card {}

impl Card {
    /// Open a device node read/write in non-blocking mode.
    pub fn open(path: &Path) -> KmsResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|source| KmsError::DeviceOpen {
                path: path.to_owned(),
                source,
            })?;
        Ok(Self(Rc::new(file)))
    }

    /// Open the first card node that accepts us.
    pub fn open_default() -> KmsResult<Self> {
        for idx in 0..4 {
            let path = PathBuf::from(format!("/dev/dri/card{idx}"));
            match Self::open(&path) {
                Ok(card) => {
                    debug!("opened {path:?}");
                    return Ok(card);
                }
                Err(err) => debug!("skipping {path:?}: {err:?}"),
            }
        }
        Err(KmsError::NoDevice)
    }

    /// Request the client capabilities every plane/atomic call depends on.
    /// Either one missing makes the device unusable for us.
    pub fn require_atomic_caps(&self) -> KmsResult<()> {
        for cap in [ClientCapability::UniversalPlanes, ClientCapability::Atomic] {
            self.set_client_capability(cap, true)
                .map_err(|err| KmsError::CapabilityUnsupported(cap, err))?;
        }
        Ok(())
    }
}
