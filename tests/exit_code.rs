use std::fs;
use std::process::{Command, Output};

fn usb_reset(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_usb-reset"))
        .args(args)
        .output()
        .unwrap()
}

#[test]
fn usage_errors_exit_1() {
    for args in [
        &["-d", "1", "-i", "0", "0", "2-2"][..],
        &["2-2", "-p", "1"],
        &["2-2", "-i", "0"],
        &[],
    ] {
        let out = usb_reset(args);
        assert_eq!(out.status.code(), Some(1), "{args:?}");
        assert!(!out.stderr.is_empty(), "{args:?}");
    }
}

#[test]
fn help_and_version_exit_0() {
    for args in [&["--help"][..], &["-h"], &["--version"]] {
        let out = usb_reset(args);
        assert_eq!(out.status.code(), Some(0), "{args:?}");
        assert!(!out.stdout.is_empty(), "{args:?}");
    }
}

#[test]
fn runtime_failures_exit_1() {
    let dir = tempfile::tempdir().unwrap();
    let sysfs = dir.path().join("sys");
    fs::create_dir(&sysfs).unwrap();
    let config = dir.path().join("config.toml");
    fs::write(
        &config,
        format!("sysfs_usb_devices = {:?}\n", sysfs.to_str().unwrap()),
    )
    .unwrap();
    let config = config.to_str().unwrap();

    // Bad device syntax.
    let out = usb_reset(&["-c", config, "bad!", "-i", "0", "0"]);
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("unexpected device node"), "{stderr}");

    // Valid syntax, but no such device in sysfs.
    let out = usb_reset(&["-c", config, "9-9", "-i", "0", "0"]);
    assert_eq!(out.status.code(), Some(1));

    // Unreadable config file.
    let missing = dir.path().join("missing.toml");
    let out = usb_reset(&["-c", missing.to_str().unwrap(), "2-2"]);
    assert_eq!(out.status.code(), Some(1));
}
