use assert_cmd::{cargo::cargo_bin_cmd, Command};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary keybank root next to a source tree to back up from.
pub struct Fixture {
    pub temp: TempDir,
}

impl Fixture {
    pub fn root(&self) -> PathBuf {
        self.temp.path().join("bank")
    }

    pub fn source(&self) -> PathBuf {
        self.temp.path().join("source")
    }
}

/// Create a keybank with `keybank init` in a fresh temp directory.
pub fn init_keybank() -> Fixture {
    let temp = TempDir::new().expect("failed to create temp dir");
    let fixture = Fixture { temp };
    fs::create_dir(fixture.root()).expect("failed to create keybank root");
    fs::create_dir(fixture.source()).expect("failed to create source dir");

    keybank_cmd()
        .arg("init")
        .arg(fixture.root())
        .assert()
        .success();

    fixture
}

/// Write `content` to `rel` below `base`, creating parent directories.
pub fn write_file(base: &Path, rel: &str, content: &str) {
    let path = base.join(rel.trim_start_matches('/'));
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("failed to create parent dir");
    }
    fs::write(path, content).expect("failed to write file");
}

/// Convenience helper for spawning the keybank binary via assert_cmd.
///
/// Environment overrides are cleared so a developer's settings cannot leak in.
pub fn keybank_cmd() -> Command {
    let mut cmd = cargo_bin_cmd!("keybank");
    for var in [
        "KEYBANK_MACHINE",
        "KEYBANK_MOUNT_PREFIX",
        "KEYBANK_MAPPER_DIR",
        "KEYBANK_DEFAULT_DIRECTORY",
        "KEYBANK_INCLUDE_GPG",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

/// `keybank <command> --root <root>` for the fixture.
#[allow(dead_code)]
pub fn on_root(fixture: &Fixture, command: &str) -> Command {
    let mut cmd = keybank_cmd();
    cmd.arg(command).arg("--root").arg(fixture.root());
    cmd
}
