//! Archive extraction.
//!
//! Handles tar.gz, tar.zst, plain tar, and zip archives. Extraction always
//! targets a job-private directory; entries that would escape it are
//! rejected.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::Path;

use thiserror::Error;
use zip::ZipArchive;
use zstd::stream::Decoder as ZstdDecoder;

use crate::catalog::ArtifactFormat;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed archive: {0}")]
    Archive(String),
}

/// Extract `archive_path` into `dest_dir` according to `format`, then strip
/// `strip_components` leading path levels (tarball top directories).
pub fn extract_archive(
    archive_path: &Path,
    dest_dir: &Path,
    format: ArtifactFormat,
    strip_components: u32,
) -> Result<(), ExtractError> {
    fs::create_dir_all(dest_dir)?;

    match format {
        ArtifactFormat::TarGz => {
            let file = File::open(archive_path)?;
            let decoder = flate2::read::GzDecoder::new(BufReader::new(file));
            extract_tar(decoder, dest_dir)?;
        }
        ArtifactFormat::TarZst => {
            let file = File::open(archive_path)?;
            let decoder = ZstdDecoder::new(BufReader::new(file))
                .map_err(|e| ExtractError::Archive(e.to_string()))?;
            extract_tar(decoder, dest_dir)?;
        }
        ArtifactFormat::Tar => {
            let file = File::open(archive_path)?;
            extract_tar(BufReader::new(file), dest_dir)?;
        }
        ArtifactFormat::Zip => extract_zip(archive_path, dest_dir)?,
    }

    for _ in 0..strip_components {
        if !strip_one_level(dest_dir)? {
            break;
        }
    }

    Ok(())
}

fn extract_tar<R: Read>(reader: R, dest_dir: &Path) -> Result<(), ExtractError> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);

    for entry in archive.entries().map_err(tar_error)? {
        let mut entry = entry.map_err(tar_error)?;
        // unpack_in refuses entries that traverse outside dest_dir.
        let unpacked = entry.unpack_in(dest_dir).map_err(tar_error)?;
        if !unpacked {
            let path = entry.path().map_err(tar_error)?;
            return Err(ExtractError::Archive(format!(
                "entry '{}' escapes the extraction directory",
                path.display()
            )));
        }
    }

    Ok(())
}

fn tar_error(e: io::Error) -> ExtractError {
    ExtractError::Archive(e.to_string())
}

fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<(), ExtractError> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| ExtractError::Archive(e.to_string()))?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| ExtractError::Archive(e.to_string()))?;
        let Some(relative_path) = file.enclosed_name() else {
            return Err(ExtractError::Archive(format!(
                "entry '{}' escapes the extraction directory",
                file.name()
            )));
        };

        if file.is_dir() {
            fs::create_dir_all(dest_dir.join(&relative_path))?;
            continue;
        }

        let absolute_path = dest_dir.join(&relative_path);
        if let Some(p) = absolute_path.parent() {
            fs::create_dir_all(p)?;
        }

        let mut outfile = File::create(&absolute_path)?;
        io::copy(&mut file, &mut outfile)?;

        #[cfg(unix)]
        if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&absolute_path, fs::Permissions::from_mode(mode))?;
        }
    }

    Ok(())
}

/// Move the contents of a single top-level directory up one level.
///
/// Returns false (and does nothing) when the directory does not consist of
/// exactly one visible subdirectory, so over-stripping is harmless.
fn strip_one_level(dir: &Path) -> Result<bool, ExtractError> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.filter_map(|e| e.ok()).collect();

    // Hidden files (like .DS_Store) do not count against "exactly one".
    entries.retain(|e| !e.file_name().to_string_lossy().starts_with('.'));

    if entries.len() != 1 || !entries[0].file_type()?.is_dir() {
        return Ok(false);
    }

    // Rename the top directory aside first, so a child with the same name
    // cannot collide while moving up.
    let top_level = entries[0].path();
    let staging = dir.join(".strip-tmp");
    fs::rename(&top_level, &staging)?;

    for entry in fs::read_dir(&staging)?.filter_map(|e| e.ok()) {
        let target = dir.join(entry.file_name());
        fs::rename(entry.path(), target)?;
    }

    fs::remove_dir(&staging)?;
    Ok(true)
}
