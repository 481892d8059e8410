//! Per-guest cgroup v1 `devices` controller.
//!
//! The controller keeps a whitelist per group. Each write to `devices.allow` or `devices.deny`
//! adds or removes one rule of the form `<a|b|c> <major|*>:<minor|*> <r|w|m...>`, and a write
//! of a pid to `tasks` moves that process into the group. None of these files are read back.
use std::path::{Path, PathBuf};
use std::{fmt, io};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use usbdevfs::{DeviceKind, DeviceNumber};

use crate::config::Config;
use crate::system::System;

const TASKS: &str = "tasks";
const DEVICES_ALLOW: &str = "devices.allow";
const DEVICES_DENY: &str = "devices.deny";

/// Rule matching all devices of both kinds with any access.
pub const ALL_DEVICES: &str = "a";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum Access {
    #[serde(rename = "r")]
    Read,
    #[serde(rename = "w")]
    Write,
    #[serde(rename = "rw")]
    ReadWrite,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "r",
            Self::Write => "w",
            Self::ReadWrite => "rw",
        })
    }
}

/// A device whitelist rule. `None` numbers are wildcards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceRule {
    pub kind: DeviceKind,
    pub major: Option<u32>,
    pub minor: Option<u32>,
    pub access: Access,
}

impl fmt::Display for DeviceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        struct Num(Option<u32>);
        impl fmt::Display for Num {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.0 {
                    Some(n) => n.fmt(f),
                    None => f.write_str("*"),
                }
            }
        }

        write!(
            f,
            "{} {}:{} {}",
            self.kind,
            Num(self.major),
            Num(self.minor),
            self.access,
        )
    }
}

impl DeviceRule {
    #[must_use]
    pub fn for_device(num: DeviceNumber, access: Access) -> Self {
        Self {
            kind: num.kind,
            major: Some(num.major),
            minor: Some(num.minor),
            access,
        }
    }

    #[must_use]
    pub fn all_minors(kind: DeviceKind, major: u32, access: Access) -> Self {
        Self {
            kind,
            major: Some(major),
            minor: None,
            access,
        }
    }
}

/// Build the rule for the device node at `path`.
///
/// Returns `None`, without failing, if it cannot be stat-ed or is not a block or character device.
pub fn rule_for(sys: &impl System, path: &Path, access: Access) -> Option<DeviceRule> {
    match sys.device_number(path) {
        Ok(Some(num)) => Some(DeviceRule::for_device(num, access)),
        Ok(None) => {
            tracing::debug!("{} is not a device node, skipped", path.display());
            None
        }
        Err(err) => {
            tracing::debug!("failed to stat {}, skipped: {err}", path.display());
            None
        }
    }
}

/// The device control group of one guest.
#[derive(Debug)]
pub struct DeviceCgroup<'a, S> {
    sys: &'a S,
    dir: PathBuf,
}

impl<'a, S: System> DeviceCgroup<'a, S> {
    pub fn new(sys: &'a S, config: &Config, dom_id: u32) -> Self {
        Self {
            sys,
            dir: config.cgroup_dir(dom_id),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.sys.is_dir(&self.dir)
    }

    /// Create the group directory.
    ///
    /// This is an exclusive create, thus an existing group is an error. Of concurrent first
    /// attaches to the same guest, only one can succeed here.
    pub fn create(&self) -> Result<()> {
        match self.sys.create_dir(&self.dir) {
            Ok(()) => {
                tracing::debug!("created control group {}", self.dir.display());
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => bail!(
                "control group {} already exists, concurrent or half-done first attach?",
                self.dir.display(),
            ),
            Err(err) => Err(err)
                .with_context(|| format!("failed to create control group {}", self.dir.display())),
        }
    }

    /// Deny everything, allow the storage backend and the whitelist, then move `pid` in.
    pub fn populate(&self, config: &Config, pid: u32) -> Result<()> {
        self.write(DEVICES_DENY, ALL_DEVICES)?;

        let storage = DeviceRule::all_minors(
            DeviceKind::Block,
            config.storage_backend_major,
            Access::ReadWrite,
        );
        self.write(DEVICES_ALLOW, &storage.to_string())?;

        for entry in &config.whitelist {
            if let Some(rule) = rule_for(self.sys, &entry.path, entry.access) {
                self.write(DEVICES_ALLOW, &rule.to_string())?;
            }
        }

        self.write(TASKS, &pid.to_string())?;
        tracing::debug!("process {pid} joined {}", self.dir.display());
        Ok(())
    }

    /// Allow read-write access to the device node at `path`. No-op if it is not a device.
    pub fn allow(&self, path: &Path) -> Result<()> {
        self.edit(DEVICES_ALLOW, path)
    }

    /// Revoke access to the device node at `path`. No-op if it is not a device.
    pub fn deny(&self, path: &Path) -> Result<()> {
        self.edit(DEVICES_DENY, path)
    }

    fn edit(&self, file: &str, path: &Path) -> Result<()> {
        match rule_for(self.sys, path, Access::ReadWrite) {
            Some(rule) => self.write(file, &rule.to_string()),
            None => Ok(()),
        }
    }

    fn write(&self, file: &str, data: &str) -> Result<()> {
        let path = self.dir.join(file);
        tracing::debug!("{} <- {data:?}", path.display());
        self.sys
            .write_control(&path, data)
            .with_context(|| format!("failed to write {data:?} to {}", path.display()))
    }
}
