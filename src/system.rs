//! OS effects of the hand-over, behind a trait so the state machine can run against a fake host.
use std::fs::{self, DirBuilder};
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::process::Command;

use nix::unistd::{Group, User};
use usbdevfs::DeviceNumber;

/// User and group id pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ids {
    pub uid: u32,
    pub gid: u32,
}

pub trait System {
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
    fn is_dir(&self, path: &Path) -> bool;
    /// Create a single directory with mode 0755. Fails with `AlreadyExists` if it exists.
    fn create_dir(&self, path: &Path) -> io::Result<()>;
    /// Write one control action into an existing pseudo-file.
    fn write_control(&self, path: &Path, data: &str) -> io::Result<()>;
    /// Returns `Ok(None)` if `path` exists but is not a block or character device.
    fn device_number(&self, path: &Path) -> io::Result<Option<DeviceNumber>>;
    fn owner(&self, path: &Path) -> io::Result<Ids>;
    fn chown(&self, path: &Path, ids: Ids) -> io::Result<()>;
    fn reset_usb(&self, path: &Path) -> io::Result<()>;
    fn bind_mount(&self, src: &Path, dst: &Path) -> io::Result<()>;
    fn mount_sysfs(&self, dst: &Path) -> io::Result<()>;
    /// The uid of user `name` and the gid of group `name`.
    fn lookup_account(&self, name: &str) -> io::Result<Ids>;
}

/// The real host.
#[derive(Debug)]
pub struct Host {
    mount_program: PathBuf,
}

impl Host {
    pub fn new(mount_program: impl Into<PathBuf>) -> Self {
        Self {
            mount_program: mount_program.into(),
        }
    }

    fn mount_cmd(&self) -> Command {
        Command::new(&self.mount_program)
    }
}

fn run_mount(cmd: &mut Command) -> io::Result<()> {
    let status = cmd.status()?;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::other(format!("{cmd:?} failed with {status}")))
    }
}

impl System for Host {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        DirBuilder::new().mode(0o755).create(path)
    }

    fn write_control(&self, path: &Path, data: &str) -> io::Result<()> {
        // Each `write(2)` is one action for cgroup files. Do not buffer.
        fs::File::options()
            .write(true)
            .open(path)?
            .write_all(data.as_bytes())
    }

    fn device_number(&self, path: &Path) -> io::Result<Option<DeviceNumber>> {
        DeviceNumber::of(path)
    }

    fn owner(&self, path: &Path) -> io::Result<Ids> {
        let meta = fs::metadata(path)?;
        Ok(Ids {
            uid: meta.uid(),
            gid: meta.gid(),
        })
    }

    fn chown(&self, path: &Path, ids: Ids) -> io::Result<()> {
        std::os::unix::fs::chown(path, Some(ids.uid), Some(ids.gid))
    }

    fn reset_usb(&self, path: &Path) -> io::Result<()> {
        usbdevfs::reset(path)
    }

    fn bind_mount(&self, src: &Path, dst: &Path) -> io::Result<()> {
        run_mount(self.mount_cmd().args(["-o", "bind"]).arg(src).arg(dst))
    }

    fn mount_sysfs(&self, dst: &Path) -> io::Result<()> {
        run_mount(self.mount_cmd().args(["-t", "sysfs", "sys"]).arg(dst))
    }

    fn lookup_account(&self, name: &str) -> io::Result<Ids> {
        let not_found = |what: &str| {
            io::Error::new(io::ErrorKind::NotFound, format!("{what} {name:?} not found"))
        };
        let user = User::from_name(name)?.ok_or_else(|| not_found("user"))?;
        let group = Group::from_name(name)?.ok_or_else(|| not_found("group"))?;
        Ok(Ids {
            uid: user.uid.as_raw(),
            gid: group.gid.as_raw(),
        })
    }
}
