use std::{
    collections::HashSet,
    fs::File,
    io::{BufReader, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use flate2::read::GzDecoder;
use tokio::io::AsyncWriteExt;

use crate::{ShedError, ShedResult};

use super::LayerContent;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const WHITEOUT_PREFIX: &str = ".wh.";
const WHITEOUT_OPAQUE: &str = ".wh..wh..opq";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Unpacks a layer archive into `dest`.
///
/// The stream is spooled to a temporary file first, then unpacked on the blocking pool. Plain
/// and gzip-compressed tar archives are accepted. Whiteout entries are applied against what is
/// already in `dest`:
/// - `.wh.<name>` deletes `<name>`
/// - `.wh..wh..opq` empties its directory of everything not unpacked from this archive
pub async fn apply_layer(mut content: LayerContent, dest: &Path) -> ShedResult<()> {
    let spool = tempfile::NamedTempFile::new()?;
    let mut file = tokio::fs::File::from_std(spool.reopen()?);
    let written = tokio::io::copy(&mut content, &mut file).await?;
    file.flush().await?;
    drop(file);

    tracing::debug!(bytes = written, dest = %dest.display(), "spooled layer archive");

    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || unpack_archive(spool.path(), &dest)).await??;

    Ok(())
}

fn unpack_archive(archive_path: &Path, dest: &Path) -> ShedResult<()> {
    let mut file = File::open(archive_path)?;
    let mut magic = [0u8; 2];
    let read = file.read(&mut magic)?;
    file.seek(SeekFrom::Start(0))?;

    let reader: Box<dyn Read> = if read == GZIP_MAGIC.len() && magic == GZIP_MAGIC {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    let mut unpacked: HashSet<PathBuf> = HashSet::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let relative = sanitize(&entry.path()?)?;

        let name = relative
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dir = relative.parent().map(Path::to_path_buf).unwrap_or_default();

        if name == WHITEOUT_OPAQUE {
            clear_directory(dest, &dir, &unpacked)?;
            continue;
        }

        if let Some(hidden) = name.strip_prefix(WHITEOUT_PREFIX) {
            remove_entry(&dest.join(&dir).join(hidden))?;
            continue;
        }

        entry.unpack_in(dest)?;
        unpacked.insert(relative);
    }

    Ok(())
}

/// Resolves an archive path relative to the layer root, rejecting escapes.
fn sanitize(path: &Path) -> ShedResult<PathBuf> {
    let path = path.to_string_lossy();
    let normalized =
        shedutils::normalize_path(&format!("/{path}"), shedutils::SupportedPathType::Absolute)?;
    Ok(PathBuf::from(normalized.trim_start_matches('/')))
}

fn clear_directory(dest: &Path, dir: &Path, keep: &HashSet<PathBuf>) -> ShedResult<()> {
    let target = dest.join(dir);
    if !target.is_dir() {
        return Ok(());
    }

    for child in std::fs::read_dir(&target)? {
        let child = child?;
        if keep.contains(&dir.join(child.file_name())) {
            continue;
        }
        remove_entry(&child.path())?;
    }

    Ok(())
}

fn remove_entry(path: &Path) -> ShedResult<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(ShedError::Io(err)),
    };

    if metadata.is_dir() {
        std::fs::remove_dir_all(path)?;
    } else {
        std::fs::remove_file(path)?;
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use flate2::{write::GzEncoder, Compression};
    use tempfile::TempDir;
    use tokio::fs;

    use super::*;

    fn archive(entries: &[(&str, Option<&str>)]) -> anyhow::Result<Vec<u8>> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, contents) in entries {
            let mut header = tar::Header::new_gnu();
            match contents {
                Some(contents) => {
                    header.set_entry_type(tar::EntryType::Regular);
                    header.set_size(contents.len() as u64);
                    header.set_mode(0o644);
                    header.set_cksum();
                    builder.append_data(&mut header, path, contents.as_bytes())?;
                }
                None => {
                    header.set_entry_type(tar::EntryType::Directory);
                    header.set_size(0);
                    header.set_mode(0o755);
                    header.set_cksum();
                    builder.append_data(&mut header, path, std::io::empty())?;
                }
            }
        }
        Ok(builder.into_inner()?)
    }

    fn gzip(bytes: &[u8]) -> anyhow::Result<Vec<u8>> {
        use std::io::Write;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes)?;
        Ok(encoder.finish()?)
    }

    #[test_log::test(tokio::test)]
    async fn test_apply_plain_and_gzip_archives() -> anyhow::Result<()> {
        let dest = TempDir::new()?;
        let plain = archive(&[("etc/", None), ("etc/hostname", Some("box"))])?;
        let compressed = gzip(&archive(&[("bin/", None), ("bin/sh", Some("#!"))])?)?;

        apply_layer(Box::new(std::io::Cursor::new(plain)), dest.path()).await?;
        apply_layer(Box::new(std::io::Cursor::new(compressed)), dest.path()).await?;

        assert_eq!(
            fs::read_to_string(dest.path().join("etc/hostname")).await?,
            "box"
        );
        assert_eq!(fs::read_to_string(dest.path().join("bin/sh")).await?, "#!");
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_apply_honours_whiteouts() -> anyhow::Result<()> {
        let dest = TempDir::new()?;
        fs::create_dir_all(dest.path().join("dir1")).await?;
        fs::write(dest.path().join("file1.txt"), "original").await?;
        fs::write(dest.path().join("file2.txt"), "keep").await?;
        fs::write(dest.path().join("dir1/inside.txt"), "inside").await?;

        let layer = archive(&[
            (".wh.file1.txt", Some("")),
            ("dir1/", None),
            ("dir1/new_file.txt", Some("new")),
            ("dir1/.wh..wh..opq", Some("")),
        ])?;
        apply_layer(Box::new(std::io::Cursor::new(layer)), dest.path()).await?;

        assert!(!dest.path().join("file1.txt").exists());
        assert!(dest.path().join("file2.txt").exists());
        assert!(!dest.path().join("dir1/inside.txt").exists());
        assert_eq!(
            fs::read_to_string(dest.path().join("dir1/new_file.txt")).await?,
            "new"
        );
        assert!(!dest.path().join("dir1/.wh..wh..opq").exists());
        Ok(())
    }

    #[test]
    fn test_sanitize_rejects_escapes() {
        assert_eq!(sanitize(Path::new("./a/b")).unwrap(), PathBuf::from("a/b"));
        assert!(sanitize(Path::new("../etc/passwd")).is_err());
    }
}
