use std::num::NonZeroU32;
use std::path::PathBuf;

/// Reset a USB device and hand it over to the device model of a guest.
///
/// With `-p PID`, the device is attached: the guest's sandbox root gets `/dev` and `/sys` mounted
/// on the first attach, the device-model process PID joins a device control group, and the
/// device is allowed in it. Without `-p`, the device is detached and denied again.
///
/// Examples:
///   usb-reset 2-2 -r -d 12 -p 4130   # reset, give to guest 12, attach to its QEMU 4130
///   usb-reset 2-2 -i 0 0             # give back to root, detach
#[derive(Debug, clap::Parser)]
#[command(version, verbatim_doc_comment)]
pub struct Cli {
    /// The USB device as `<bus>-<port>[.<port>]*`, eg. `2-2` or `1-3.1`.
    pub device: String,

    /// Reset the device before changing its owner.
    #[arg(short = 'r')]
    pub reset: bool,

    /// The process id of the guest's device model (QEMU). Attach the device to it.
    #[arg(short = 'p', value_name = "PID", requires = "dom_id")]
    pub pid: Option<NonZeroU32>,

    /// Change the owner to the one derived from this guest domain id.
    #[arg(short = 'd', value_name = "DOMID", conflicts_with = "ids")]
    pub dom_id: Option<u32>,

    /// Change the owner to explicit UID and GID.
    #[arg(short = 'i', num_args = 2, value_names = ["UID", "GID"])]
    pub ids: Option<Vec<u32>>,

    /// Override the host layout with a TOML config file.
    #[arg(long, short = 'c')]
    pub config_file: Option<PathBuf>,
}
