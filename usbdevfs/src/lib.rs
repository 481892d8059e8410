//! Kernel-facing pieces of USB device handling on Linux.
//!
//! A USB device is addressed in sysfs by its topology name `<bus>-<port>[.<port>]*`, eg. `2-1.4`.
//! The kernel exposes the bus and device numbers of it in `/sys/bus/usb/devices/<name>/busnum`
//! and `devnum`, which in turn name the usbfs character device node
//! `/dev/bus/usb/<bus:03>/<dev:03>`.
mod node;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::{error, fmt, io};

use regex::Regex;

pub use node::*;

pub const SYSFS_USB_DEVICES: &str = "/sys/bus/usb/devices";
pub const USB_DEV_ROOT: &str = "/dev/bus/usb";

static DEVICE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+-[0-9]+(\.[0-9]+)*$").unwrap());

/// A validated USB topology address, eg. `2-2` or `1-3.1.2`.
///
/// The root hub names (`usb1`) and interface names (`1-3:1.0`) share the same sysfs directory
/// but are rejected here, since they have no usbfs device node of their own.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidDeviceId(String);

impl fmt::Display for InvalidDeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unexpected device node: {:?}", self.0)
    }
}

impl error::Error for InvalidDeviceId {}

impl FromStr for DeviceId {
    type Err = InvalidDeviceId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if DEVICE_ID_RE.is_match(s) {
            Ok(Self(s.to_owned()))
        } else {
            Err(InvalidDeviceId(s.to_owned()))
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl DeviceId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `busnum` attribute file of this device under the sysfs devices directory `root`.
    #[must_use]
    pub fn busnum_path(&self, root: impl AsRef<Path>) -> PathBuf {
        root.as_ref().join(&self.0).join("busnum")
    }

    /// The `devnum` attribute file of this device under the sysfs devices directory `root`.
    #[must_use]
    pub fn devnum_path(&self, root: impl AsRef<Path>) -> PathBuf {
        root.as_ref().join(&self.0).join("devnum")
    }
}

/// Bus number and device number on that bus, as assigned by the kernel on enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusAddr {
    pub bus: u32,
    pub dev: u32,
}

impl fmt::Display for BusAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}/{:03}", self.bus, self.dev)
    }
}

impl BusAddr {
    /// Parse from the contents of `busnum` and `devnum` attribute files.
    pub fn from_sysfs(busnum: &str, devnum: &str) -> io::Result<Self> {
        Ok(Self {
            bus: parse_sysfs_int(busnum)?,
            dev: parse_sysfs_int(devnum)?,
        })
    }

    /// The usbfs node of this device under the default `/dev/bus/usb`.
    #[must_use]
    pub fn dev_path(self) -> PathBuf {
        self.dev_path_in(USB_DEV_ROOT)
    }

    #[must_use]
    pub fn dev_path_in(self, root: impl AsRef<Path>) -> PathBuf {
        root.as_ref()
            .join(format!("{:03}", self.bus))
            .join(format!("{:03}", self.dev))
    }
}

/// Path of usbfs node `/dev/bus/usb/<bus:03>/<dev:03>`.
#[must_use]
pub fn dev_path(bus: u32, dev: u32) -> PathBuf {
    BusAddr { bus, dev }.dev_path()
}

/// Parse the integer on the first line of a sysfs attribute.
pub fn parse_sysfs_int(content: &str) -> io::Result<u32> {
    let line = content.lines().next().unwrap_or_default().trim();
    line.parse::<u32>().map_err(|err| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid integer attribute {line:?}: {err}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rstest::rstest]
    #[case("2-2")]
    #[case("1-3.1")]
    #[case("10-1.2.3")]
    fn valid_device_id(#[case] s: &str) {
        let id = s.parse::<DeviceId>().unwrap();
        assert_eq!(id.as_str(), s);
        assert_eq!(id.to_string(), s);
    }

    #[rstest::rstest]
    #[case("")]
    #[case("usb1")]
    #[case("2")]
    #[case("2-")]
    #[case("-2")]
    #[case("2-2.")]
    #[case("2-2..1")]
    #[case("1-3:1.0")]
    #[case("2-2\n")]
    #[case("../2-2")]
    #[case("2-2/../../x")]
    fn invalid_device_id(#[case] s: &str) {
        let err = s.parse::<DeviceId>().unwrap_err();
        assert_eq!(err, InvalidDeviceId(s.to_owned()));
    }

    #[test]
    fn attribute_paths() {
        let id = "2-2".parse::<DeviceId>().unwrap();
        assert_eq!(
            id.busnum_path(SYSFS_USB_DEVICES),
            Path::new("/sys/bus/usb/devices/2-2/busnum"),
        );
        assert_eq!(
            id.devnum_path("/tmp/sys"),
            Path::new("/tmp/sys/2-2/devnum"),
        );
    }

    #[test]
    fn format_dev_path() {
        assert_eq!(dev_path(2, 5), Path::new("/dev/bus/usb/002/005"));
        assert_eq!(dev_path(1, 127), Path::new("/dev/bus/usb/001/127"));
        assert_eq!(dev_path(1000, 1), Path::new("/dev/bus/usb/1000/001"));
        let addr = BusAddr { bus: 3, dev: 14 };
        assert_eq!(addr.dev_path_in("/x"), Path::new("/x/003/014"));
        assert_eq!(addr.to_string(), "003/014");
    }

    #[test]
    fn sysfs_int() {
        assert_eq!(parse_sysfs_int("2\n").unwrap(), 2);
        assert_eq!(parse_sysfs_int(" 17 \nignored\n").unwrap(), 17);
        for bad in ["", "\n", "x\n", "-1\n", "1.5\n"] {
            let err = parse_sysfs_int(bad).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidData, "{bad:?}");
        }
        assert_eq!(
            BusAddr::from_sysfs("2\n", "5\n").unwrap(),
            BusAddr { bus: 2, dev: 5 },
        );
    }
}
