//! End-to-end lifecycle checks against the public runtime API.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;

use corral_common::config::CorralConfig;
use corral_common::error::CorralError;
use corral_common::types::ContainerStatus;
use corral_runtime::{Engine, RunOptions};

fn is_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

/// Builds a minimal image from the host's busybox, if there is one.
fn busybox_image(images: &Path) -> bool {
    let Ok(busybox) = which::which("busybox") else {
        return false;
    };
    let bin = images.join("busybox").join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    std::fs::copy(&busybox, bin.join("busybox")).unwrap();
    for applet in ["sh", "echo", "sleep", "cat"] {
        std::os::unix::fs::symlink("busybox", bin.join(applet)).unwrap();
    }
    true
}

#[test]
fn unknown_container_is_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = Engine::new(CorralConfig::rooted(dir.path()));
    assert!(matches!(engine.stop("nope"), Err(CorralError::NotFound { .. })));
    assert!(matches!(engine.remove("nope"), Err(CorralError::NotFound { .. })));
    assert!(matches!(engine.logs("nope"), Err(CorralError::NotFound { .. })));
    assert!(engine.list().unwrap().is_empty());
}

#[test]
fn missing_image_creates_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = Engine::new(CorralConfig::rooted(dir.path()));
    let options = RunOptions {
        image: "ghost".into(),
        command: vec!["sh".into()],
        ..RunOptions::default()
    };
    assert!(matches!(engine.create(&options), Err(CorralError::NotFound { .. })));
    assert!(engine.list().unwrap().is_empty());
}

#[test]
#[ignore = "requires root, overlayfs, and a host busybox"]
fn detached_container_logs_stops_and_is_removed() {
    if !is_root() {
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let config = CorralConfig::rooted(dir.path());
    if !busybox_image(&config.image_dir) {
        return;
    }
    let engine = Engine::new(config);
    let options = RunOptions {
        name: Some("greeter".into()),
        image: "busybox".into(),
        command: vec!["sh".into(), "-c".into(), "echo 'hello world'; exec sleep 30".into()],
        ..RunOptions::default()
    };

    let created = engine.create(&options).expect("create");
    assert_eq!(created.exit_code, None);
    std::thread::sleep(std::time::Duration::from_millis(500));
    assert_eq!(engine.logs("greeter").unwrap(), "hello world\n");

    let stopped = engine.stop("greeter").expect("stop");
    assert_eq!(stopped.status, ContainerStatus::Stop);
    engine.remove("greeter").expect("remove");
    assert!(engine.list().unwrap().is_empty());
}

#[test]
#[ignore = "requires root, overlayfs, and a host busybox"]
fn foreground_container_reports_exit_code_and_cleans_up() {
    if !is_root() {
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let config = CorralConfig::rooted(dir.path());
    if !busybox_image(&config.image_dir) {
        return;
    }
    let engine = Engine::new(config);
    let options = RunOptions {
        tty: true,
        image: "busybox".into(),
        command: vec!["sh".into(), "-c".into(), "exit 3".into()],
        ..RunOptions::default()
    };

    let created = engine.create(&options).expect("create");
    assert_eq!(created.exit_code, Some(3));
    assert!(engine.list().unwrap().is_empty());
}
