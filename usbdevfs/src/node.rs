use std::fs::{self, File};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;
use std::{fmt, io};

use rustix::ioctl::{ioctl, opcode, NoArg, Opcode};

/// `_IO('U', 20)` from `<linux/usbdevice_fs.h>`.
const USBDEVFS_RESET: Opcode = opcode::none(b'U', 20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Block,
    Char,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Block => "b",
            Self::Char => "c",
        })
    }
}

/// Type and `major:minor` of a device special file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceNumber {
    pub kind: DeviceKind,
    pub major: u32,
    pub minor: u32,
}

impl fmt::Display for DeviceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}", self.kind, self.major, self.minor)
    }
}

impl DeviceNumber {
    /// Returns `None` if the metadata is not of a block or character device.
    #[must_use]
    pub fn from_metadata(meta: &fs::Metadata) -> Option<Self> {
        let ft = meta.file_type();
        let kind = if ft.is_block_device() {
            DeviceKind::Block
        } else if ft.is_char_device() {
            DeviceKind::Char
        } else {
            return None;
        };
        let rdev = meta.rdev();
        Some(Self {
            kind,
            major: rustix::fs::major(rdev),
            minor: rustix::fs::minor(rdev),
        })
    }

    /// Stat `path`, following symlinks.
    ///
    /// Returns `Ok(None)` if it exists but is not a block or character device.
    pub fn of(path: impl AsRef<Path>) -> io::Result<Option<Self>> {
        Ok(Self::from_metadata(&fs::metadata(path)?))
    }
}

/// Issue a port reset to the USB device behind the usbfs node `path`.
///
/// The kernel re-enumerates the device afterward but keeps its bus address, so the node stays
/// valid. Interfaces bound to kernel drivers are unbound and rebound around the reset.
pub fn reset(path: impl AsRef<Path>) -> io::Result<()> {
    let path = path.as_ref();
    let f = File::options().write(true).open(path)?;
    tracing::debug!("resetting {}", path.display());
    // SAFETY: `USBDEVFS_RESET` takes no argument and `f` is a valid open fd.
    unsafe { ioctl(&f, NoArg::<USBDEVFS_RESET>::new()) }?;
    Ok(())
}
