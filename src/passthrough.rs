//! One invocation: locate the device, optionally reset it, change its owner, then attach it to
//! or detach it from a guest.
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use usbdevfs::{BusAddr, DeviceId};

use crate::cgroup::DeviceCgroup;
use crate::cli::Cli;
use crate::config::Config;
use crate::sandbox::Sandbox;
use crate::system::{Ids, System};

/// Who the device node should belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// The identity derived from a guest domain id.
    Guest(u32),
    Ids(Ids),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub device: String,
    pub reset: bool,
    /// The device model process to attach to. `None` means detach.
    pub attach: Option<NonZeroU32>,
    pub owner: Option<Owner>,
}

impl Request {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let owner = match (cli.dom_id, cli.ids.as_deref()) {
            (Some(_), Some(_)) => bail!("-d and -i are mutually exclusive"),
            (Some(dom_id), None) => Some(Owner::Guest(dom_id)),
            (None, Some(&[uid, gid])) => Some(Owner::Ids(Ids { uid, gid })),
            (None, Some(ids)) => bail!("-i takes exactly UID and GID, got {ids:?}"),
            (None, None) => None,
        };
        Ok(Self {
            device: cli.device.clone(),
            reset: cli.reset,
            attach: cli.pid,
            owner,
        })
    }
}

/// The identity of guest `dom_id`: the base account's ids offset by `dom_id`.
pub fn guest_ids(base: Ids, dom_id: u32) -> Result<Ids> {
    let overflow = || format!("ids of guest {dom_id} overflow");
    Ok(Ids {
        uid: base.uid.checked_add(dom_id).with_context(overflow)?,
        gid: base.gid.checked_add(dom_id).with_context(overflow)?,
    })
}

/// Inverse of [`guest_ids`], if `ids` belongs to a guest at all.
#[must_use]
pub fn guest_of(base: Ids, ids: Ids) -> Option<u32> {
    let dom_id = ids.uid.checked_sub(base.uid)?;
    (ids.gid.checked_sub(base.gid)? == dom_id).then_some(dom_id)
}

/// Resolve the usbfs node of `id` from its sysfs bus address.
pub fn locate(sys: &impl System, config: &Config, id: &DeviceId) -> Result<PathBuf> {
    let read = |path: PathBuf| {
        sys.read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))
    };
    let busnum = read(id.busnum_path(&config.sysfs_usb_devices))?;
    let devnum = read(id.devnum_path(&config.sysfs_usb_devices))?;
    let addr = BusAddr::from_sysfs(&busnum, &devnum)
        .with_context(|| format!("invalid bus address of device {id}"))?;
    let node = addr.dev_path_in(&config.usb_dev_root);
    tracing::debug!("device {id} is {}", node.display());
    Ok(node)
}

pub fn run(sys: &impl System, config: &Config, req: &Request) -> Result<()> {
    if req.attach.is_some() && !matches!(req.owner, Some(Owner::Guest(_))) {
        bail!("attaching requires a guest domain id");
    }

    let id = req.device.parse::<DeviceId>()?;
    let node = locate(sys, config, &id)?;

    if req.reset {
        sys.reset_usb(&node)
            .with_context(|| format!("failed to reset {}", node.display()))?;
        tracing::info!("reset device {id}");
    }

    let guest = match req.owner {
        Some(Owner::Guest(dom_id)) => {
            let base = base_ids(sys, config)?;
            chown(sys, &node, guest_ids(base, dom_id)?)?;
            Some(Guest::Given(dom_id))
        }
        Some(Owner::Ids(ids)) => {
            let guest = current_guest(sys, config, &node)?.map(Guest::Inferred);
            chown(sys, &node, ids)?;
            guest
        }
        None => None,
    };

    match (req.attach, guest) {
        (Some(pid), Some(Guest::Given(dom_id))) => {
            Sandbox::new(sys, config, dom_id).attach(pid.get(), &node)?;
            tracing::info!("attached device {id} to guest {dom_id} process {pid}");
        }
        (Some(_), _) => unreachable!("checked above"),
        (None, Some(guest)) => detach(sys, config, guest, &node)?,
        (None, None) => tracing::debug!("no guest to detach device {id} from"),
    }
    Ok(())
}

fn base_ids(sys: &impl System, config: &Config) -> Result<Ids> {
    sys.lookup_account(&config.base_account)
        .with_context(|| format!("failed to look up account {:?}", config.base_account))
}

fn chown(sys: &impl System, node: &Path, ids: Ids) -> Result<()> {
    sys.chown(node, ids).with_context(|| {
        format!(
            "failed to change owner of {} to {}:{}",
            node.display(),
            ids.uid,
            ids.gid,
        )
    })?;
    tracing::debug!("changed owner of {} to {}:{}", node.display(), ids.uid, ids.gid);
    Ok(())
}

/// The guest currently owning the device node, before its owner is restored.
fn current_guest(sys: &impl System, config: &Config, node: &Path) -> Result<Option<u32>> {
    let owner = sys
        .owner(node)
        .with_context(|| format!("failed to stat {}", node.display()))?;
    let base = match base_ids(sys, config) {
        Ok(base) => base,
        Err(err) => {
            tracing::warn!("cannot tell the guest owning {}: {err:#}", node.display());
            return Ok(None);
        }
    };
    Ok(guest_of(base, owner))
}

/// The guest to attach to or detach from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Guest {
    /// Named by `-d`. Its control group must exist.
    Given(u32),
    /// Told from the current owner of the node. It may have gone away.
    Inferred(u32),
}

fn detach(sys: &impl System, config: &Config, guest: Guest, node: &Path) -> Result<()> {
    let (Guest::Given(dom_id) | Guest::Inferred(dom_id)) = guest;
    let cgroup = DeviceCgroup::new(sys, config, dom_id);
    if matches!(guest, Guest::Inferred(_)) && !cgroup.exists() {
        tracing::warn!(
            "control group {} does not exist, nothing to revoke",
            cgroup.dir().display(),
        );
        return Ok(());
    }
    cgroup.deny(node)?;
    tracing::info!("detached {} from guest {dom_id}", node.display());
    Ok(())
}
