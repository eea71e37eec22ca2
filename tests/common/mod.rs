//! Shared fixtures for integration tests.
//!
//! Builds a self-contained pkgsmith home: recipes under `<home>/recipes`,
//! source tarballs under `<home>/sources` addressed via `file://` URLs,
//! with real checksums.

// Each integration test binary includes this module and uses a subset of it.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;

use pkgsmith::types::Blake3Hash;

pub struct TestHome {
    // Held for cleanup on drop.
    _temp: tempfile::TempDir,
    pub home: PathBuf,
}

pub fn test_home() -> TestHome {
    let temp = tempfile::TempDir::new().expect("failed to create temp dir");
    let home = temp.path().join("pkgsmith-home");
    std::fs::create_dir_all(home.join("recipes")).expect("failed to create recipes dir");
    std::fs::create_dir_all(home.join("sources")).expect("failed to create sources dir");
    TestHome { _temp: temp, home }
}

/// Create a source tarball plus recipe for one package.
///
/// The tarball holds `<name>-<version>/marker.txt` so the default
/// strip-components leaves `marker.txt` at the source root.
pub fn add_package(home: &Path, name: &str, version: &str, deps: &[&str], steps: &[&str]) {
    let archive = write_source_archive(home, name, version);
    let checksum = Blake3Hash::of_file(&archive).expect("failed to hash archive");

    let deps_list = deps
        .iter()
        .map(|d| format!("\"{d}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let steps_list = steps
        .iter()
        .map(|s| format!("    \"{s}\",\n"))
        .collect::<String>();

    let recipe = format!(
        r#"[package]
name = "{name}"
version = "{version}"

deps = [{deps_list}]

[source]
url = "file://{archive}"
blake3 = "{checksum}"

[build]
steps = [
{steps_list}]
"#,
        archive = archive.display(),
    );

    std::fs::write(
        home.join("recipes").join(format!("{name}-{version}.toml")),
        recipe,
    )
    .expect("failed to write recipe");
}

/// Corrupt a package's source archive after its checksum was recorded.
pub fn corrupt_source(home: &Path, name: &str, version: &str) {
    let archive = source_archive_path(home, name, version);
    let mut bytes = std::fs::read(&archive).expect("failed to read archive");
    bytes.push(0);
    std::fs::write(&archive, bytes).expect("failed to corrupt archive");
}

pub fn source_archive_path(home: &Path, name: &str, version: &str) -> PathBuf {
    home.join("sources").join(format!("{name}-{version}.tar.gz"))
}

fn write_source_archive(home: &Path, name: &str, version: &str) -> PathBuf {
    let stage = home.join("sources").join(format!(".stage-{name}-{version}"));
    let tree = stage.join(format!("{name}-{version}"));
    std::fs::create_dir_all(&tree).expect("failed to create source tree");
    std::fs::write(tree.join("marker.txt"), format!("{name}-{version}\n"))
        .expect("failed to write marker");

    let archive = source_archive_path(home, name, version);
    let status = Command::new("tar")
        .arg("czf")
        .arg(&archive)
        .arg("-C")
        .arg(&stage)
        .arg(format!("{name}-{version}"))
        .status()
        .expect("failed to run tar");
    assert!(status.success(), "tar failed for {name}-{version}");

    std::fs::remove_dir_all(&stage).expect("failed to clean stage");
    archive
}
