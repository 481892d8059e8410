//! Host layout the device hand-over operates on.
//!
//! All fields default to the layout of a Xen host running device models in per-guest chroots
//! under `/var/xen/qemu/<domid>`, with a cgroup v1 `devices` hierarchy. A config file only
//! needs to mention what differs:
//!
//! ```toml
//! guest_root = "/run/qemu-chroot"
//! base_account = "qemu_guest_base"
//!
//! [[whitelist]]
//! path = "/dev/null"
//! access = "r"
//! ```
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use serde::Deserialize;

use crate::cgroup::Access;

/// Block major of the storage backend the device model depends on.
pub const STORAGE_BACKEND_MAJOR: u32 = 254;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory of sysfs USB device entries holding `busnum` and `devnum`.
    pub sysfs_usb_devices: PathBuf,
    /// Root of usbfs device nodes.
    pub usb_dev_root: PathBuf,
    /// Host `/dev`, bind-mounted into a guest root on its first attach.
    pub host_dev: PathBuf,
    /// Parent of per-guest roots `<guest_root>/<domid>`.
    pub guest_root: PathBuf,
    /// Mount point of the cgroup v1 `devices` controller.
    pub cgroup_root: PathBuf,
    /// Per-guest control groups are named `<cgroup_prefix><domid>`.
    pub cgroup_prefix: String,
    /// The account whose uid and gid are offset by the domain id to get the guest's identity.
    pub base_account: String,
    pub mount_program: PathBuf,
    pub storage_backend_major: u32,
    /// Devices always allowed in a freshly created control group, if they exist.
    pub whitelist: Vec<WhitelistEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WhitelistEntry {
    pub path: PathBuf,
    pub access: Access,
}

impl WhitelistEntry {
    fn new(path: &str, access: Access) -> Self {
        Self {
            path: path.into(),
            access,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sysfs_usb_devices: usbdevfs::SYSFS_USB_DEVICES.into(),
            usb_dev_root: usbdevfs::USB_DEV_ROOT.into(),
            host_dev: "/dev".into(),
            guest_root: "/var/xen/qemu".into(),
            cgroup_root: "/sys/fs/cgroup/devices".into(),
            cgroup_prefix: "qemu-".into(),
            base_account: "qemu_base".into(),
            mount_program: "/usr/bin/mount".into(),
            storage_backend_major: STORAGE_BACKEND_MAJOR,
            whitelist: vec![
                WhitelistEntry::new("/dev/urandom", Access::Read),
                WhitelistEntry::new("/dev/xen/privcmd", Access::ReadWrite),
                WhitelistEntry::new("/dev/net/tun", Access::ReadWrite),
                WhitelistEntry::new("/dev/xen/evtchn", Access::ReadWrite),
                WhitelistEntry::new("/dev/mem", Access::ReadWrite),
                WhitelistEntry::new("/dev/null", Access::Read),
            ],
        }
    }
}

impl Config {
    /// Load from `path` if given, or use the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let buf = fs::read_to_string(path).context("failed to read config file")?;
                toml::from_str::<Self>(&buf).context("failed to parse config file")?
            }
            None => Self::default(),
        };
        config.validate().context("invalid config")?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, path) in [
            ("sysfs_usb_devices", &self.sysfs_usb_devices),
            ("usb_dev_root", &self.usb_dev_root),
            ("host_dev", &self.host_dev),
            ("guest_root", &self.guest_root),
            ("cgroup_root", &self.cgroup_root),
            ("mount_program", &self.mount_program),
        ] {
            ensure!(path.is_absolute(), "`{name}` must be an absolute path");
        }
        for entry in &self.whitelist {
            ensure!(
                entry.path.is_absolute(),
                "whitelist path {} must be absolute",
                entry.path.display(),
            );
        }
        ensure!(
            !self.cgroup_prefix.is_empty() && !self.cgroup_prefix.contains('/'),
            "`cgroup_prefix` must be a non-empty single path component",
        );
        ensure!(
            !self.base_account.is_empty(),
            "`base_account` must not be empty",
        );
        Ok(())
    }

    /// The private root directory of guest `dom_id`, eg. `/var/xen/qemu/12`.
    #[must_use]
    pub fn guest_dir(&self, dom_id: u32) -> PathBuf {
        self.guest_root.join(dom_id.to_string())
    }

    /// The device control group of guest `dom_id`, eg. `/sys/fs/cgroup/devices/qemu-12`.
    #[must_use]
    pub fn cgroup_dir(&self, dom_id: u32) -> PathBuf {
        self.cgroup_root
            .join(format!("{}{dom_id}", self.cgroup_prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.guest_dir(12), Path::new("/var/xen/qemu/12"));
        assert_eq!(
            config.cgroup_dir(12),
            Path::new("/sys/fs/cgroup/devices/qemu-12"),
        );
        assert_eq!(config.whitelist.len(), 6);
        assert_eq!(config.storage_backend_major, 254);
    }

    #[test]
    fn parse_partial() {
        let config = toml::from_str::<Config>(
            r#"
            guest_root = "/run/qemu"
            cgroup_prefix = "dm-"

            [[whitelist]]
            path = "/dev/zero"
            access = "rw"
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.guest_dir(3), Path::new("/run/qemu/3"));
        assert_eq!(
            config.cgroup_dir(3),
            Path::new("/sys/fs/cgroup/devices/dm-3"),
        );
        assert_eq!(
            config.whitelist,
            [WhitelistEntry::new("/dev/zero", Access::ReadWrite)],
        );
        assert_eq!(config.base_account, "qemu_base");
    }

    #[test]
    fn reject_invalid() {
        toml::from_str::<Config>("unknown_key = 1").unwrap_err();
        toml::from_str::<Config>("[[whitelist]]\npath = \"/dev/null\"\naccess = \"x\"")
            .unwrap_err();

        for src in [
            r#"guest_root = "relative""#,
            r#"cgroup_prefix = """#,
            r#"cgroup_prefix = "a/b""#,
            r#"base_account = """#,
            "[[whitelist]]\npath = \"null\"\naccess = \"r\"",
        ] {
            let config = toml::from_str::<Config>(src).unwrap();
            config.validate().unwrap_err();
        }
    }
}
