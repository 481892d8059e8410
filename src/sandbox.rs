//! Bootstrap of a guest's private root, the chroot its device model runs in.
//!
//! The guest root `<guest_root>/<domid>` and its `dev/` are provisioned by the toolstack before
//! the device model starts. Passing through USB devices additionally needs:
//!
//! | Step       | Done when          | Action                                                    |
//! |------------|--------------------|-----------------------------------------------------------|
//! | `ShareDev` | `dev/bus/` exists  | create the control group, bind `/dev`, populate the group |
//! | `MountSys` | `sys/` exists      | create `sys/`, mount a sysfs instance on it               |
//!
//! Steps are checked in order on every attach, so attaching more devices to the same guest only
//! adds them to its control group. A half-done step is not rolled back.
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};

use crate::cgroup::DeviceCgroup;
use crate::config::Config;
use crate::system::System;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    ShareDev,
    MountSys,
}

impl Step {
    pub const ALL: [Self; 2] = [Self::ShareDev, Self::MountSys];

    /// The path whose existence marks this step as done.
    #[must_use]
    pub fn marker(self, root: &Path) -> PathBuf {
        match self {
            Self::ShareDev => root.join("dev/bus"),
            Self::MountSys => root.join("sys"),
        }
    }
}

#[derive(Debug)]
pub struct Sandbox<'a, S> {
    sys: &'a S,
    config: &'a Config,
    dom_id: u32,
    root: PathBuf,
}

impl<'a, S: System> Sandbox<'a, S> {
    pub fn new(sys: &'a S, config: &'a Config, dom_id: u32) -> Self {
        Self {
            sys,
            config,
            dom_id,
            root: config.guest_dir(dom_id),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn cgroup(&self) -> DeviceCgroup<'a, S> {
        DeviceCgroup::new(self.sys, self.config, self.dom_id)
    }

    /// Steps not done yet, in order.
    #[must_use]
    pub fn pending(&self) -> Vec<Step> {
        Step::ALL
            .into_iter()
            .filter(|step| !self.sys.is_dir(&step.marker(&self.root)))
            .collect()
    }

    /// Bring up the sandbox for device model `pid` and allow the device node `node` in it.
    pub fn attach(&self, pid: u32, node: &Path) -> Result<()> {
        let dev = self.root.join("dev");
        ensure!(
            self.sys.is_dir(&self.root) && self.sys.is_dir(&dev),
            "guest root {} is not provisioned",
            dev.display(),
        );

        for step in Step::ALL {
            if self.sys.is_dir(&step.marker(&self.root)) {
                tracing::debug!("{step:?} of guest {} is already done", self.dom_id);
                continue;
            }
            tracing::debug!("running {step:?} for guest {}", self.dom_id);
            self.run(step, pid)
                .with_context(|| format!("failed {step:?} for guest {}", self.dom_id))?;
        }

        self.cgroup().allow(node)
    }

    fn run(&self, step: Step, pid: u32) -> Result<()> {
        match step {
            Step::ShareDev => {
                // First device of this guest. Creating the group claims the bootstrap.
                let cgroup = self.cgroup();
                cgroup.create()?;
                let dev = self.root.join("dev");
                self.sys
                    .bind_mount(&self.config.host_dev, &dev)
                    .with_context(|| {
                        format!(
                            "failed to bind mount {} to {}",
                            self.config.host_dev.display(),
                            dev.display(),
                        )
                    })?;
                cgroup.populate(self.config, pid)
            }
            Step::MountSys => {
                let sys_dir = step.marker(&self.root);
                self.sys
                    .create_dir(&sys_dir)
                    .with_context(|| format!("failed to create {}", sys_dir.display()))?;
                self.sys
                    .mount_sysfs(&sys_dir)
                    .with_context(|| format!("failed to mount sysfs on {}", sys_dir.display()))
            }
        }
    }
}
