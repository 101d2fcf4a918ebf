//! Packing an installed dataset into a single compressed archive.
//!
//! Supported formats are a tar stream, optionally compressed, or a zip file.
//! Entries are stored relative to the dataset root, walked in file-name
//! order, and symbolic links are recorded as links rather than followed. Annexed
//! content in a DataLad dataset is a symlink into `.git/annex/objects`, so
//! following links would duplicate every annexed file.

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use bzip2::write::BzEncoder;
use flate2::write::GzEncoder;
use tempfile::TempDir;
use walkdir::WalkDir;
use xz2::write::XzEncoder;

use crate::error::ReleaseError;

/// Archive formats accepted by `--archive-format`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum ArchiveFormat {
    /// Uncompressed tar.
    Tar,
    /// gzip-compressed tar.
    Gztar,
    /// bzip2-compressed tar.
    Bztar,
    /// xz-compressed tar.
    Xztar,
    /// zstd-compressed tar.
    Zstdtar,
    /// Deflate-compressed zip.
    Zip,
}

impl ArchiveFormat {
    /// File extension appended to the archive base name.
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::Gztar => "tar.gz",
            ArchiveFormat::Bztar => "tar.bz2",
            ArchiveFormat::Xztar => "tar.xz",
            ArchiveFormat::Zstdtar => "tar.zst",
            ArchiveFormat::Zip => "zip",
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::Gztar => "gztar",
            ArchiveFormat::Bztar => "bztar",
            ArchiveFormat::Xztar => "xztar",
            ArchiveFormat::Zstdtar => "zstdtar",
            ArchiveFormat::Zip => "zip",
        };
        f.write_str(name)
    }
}

/// A finished archive inside its own temporary directory.
///
/// Dropping the value removes the directory and the archive with it, on the
/// success path as well as after a failed upload.
#[derive(Debug)]
pub struct Archive {
    path: PathBuf,
    file_name: String,
    format: ArchiveFormat,
    dir: TempDir,
}

impl Archive {
    /// Full path of the archive file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name used for the upload, e.g. `v1.0.tar.gz`.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    /// Temporary directory that owns the archive.
    pub fn directory(&self) -> &Path {
        self.dir.path()
    }

    /// Size of the archive in bytes.
    pub fn size(&self) -> Result<u64, ReleaseError> {
        std::fs::metadata(&self.path)
            .map(|meta| meta.len())
            .map_err(|source| ReleaseError::Archive {
                path: self.path.clone(),
                source,
            })
    }
}

/// Archive `root` as `<base_name>.<ext>` in a fresh temporary directory.
///
/// # Errors
/// Returns [`ReleaseError::Archive`] if the tree cannot be read or the
/// archive cannot be written.
pub fn create_archive(
    root: &Path,
    base_name: &str,
    format: ArchiveFormat,
) -> Result<Archive, ReleaseError> {
    let dir = tempfile::Builder::new()
        .prefix("datalad-release-archive-")
        .tempdir()?;
    let file_name = format!("{}.{}", base_name, format.extension());
    let path = dir.path().join(&file_name);

    write_archive(root, &path, format).map_err(|source| ReleaseError::Archive {
        path: path.clone(),
        source,
    })?;

    tracing::info!(archive = %path.display(), %format, "created archive");

    Ok(Archive {
        path,
        file_name,
        format,
        dir,
    })
}

fn write_archive(root: &Path, path: &Path, format: ArchiveFormat) -> io::Result<()> {
    let writer = BufWriter::new(File::create(path)?);

    let mut writer = match format {
        ArchiveFormat::Tar => write_tar(root, writer)?,
        ArchiveFormat::Gztar => {
            let encoder = GzEncoder::new(writer, flate2::Compression::default());
            write_tar(root, encoder)?.finish()?
        }
        ArchiveFormat::Bztar => {
            let encoder = BzEncoder::new(writer, bzip2::Compression::default());
            write_tar(root, encoder)?.finish()?
        }
        ArchiveFormat::Xztar => {
            let encoder = XzEncoder::new(writer, 6);
            write_tar(root, encoder)?.finish()?
        }
        ArchiveFormat::Zstdtar => {
            let encoder = zstd::Encoder::new(writer, zstd::DEFAULT_COMPRESSION_LEVEL)?;
            write_tar(root, encoder)?.finish()?
        }
        ArchiveFormat::Zip => write_zip(root, writer)?,
    };

    writer.flush()?;
    writer.get_ref().sync_all()
}

/// Write every entry below `root` into a tar stream and return the sink.
fn write_tar<W: Write>(root: &Path, sink: W) -> io::Result<W> {
    let mut builder = tar::Builder::new(sink);
    builder.follow_symlinks(false);

    for entry in WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|source| io::Error::new(io::ErrorKind::InvalidData, source))?;
        tracing::trace!(entry = %relative.display(), "archiving");
        builder.append_path_with_name(entry.path(), relative)?;
    }

    builder.into_inner()
}

/// Write every entry below `root` into a zip file and return the sink.
///
/// Links go in as zip symlink entries holding the link target.
fn write_zip<W: Write + Seek>(root: &Path, sink: W) -> io::Result<W> {
    let mut zip = zip::ZipWriter::new(sink);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for entry in WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|source| io::Error::new(io::ErrorKind::InvalidData, source))?;
        let name = zip_name(relative);
        tracing::trace!(entry = %name, "archiving");

        let kind = entry.file_type();
        if kind.is_symlink() {
            let target = std::fs::read_link(entry.path())?;
            zip.add_symlink(name, target.to_string_lossy().into_owned(), options)
                .map_err(io::Error::other)?;
        } else if kind.is_dir() {
            zip.add_directory(name, options).map_err(io::Error::other)?;
        } else {
            let options = options.unix_permissions(file_mode(entry.path())?);
            zip.start_file(name, options).map_err(io::Error::other)?;
            io::copy(&mut File::open(entry.path())?, &mut zip)?;
        }
    }

    zip.finish().map_err(io::Error::other)
}

/// Zip entry names always use `/`, whatever the host separator.
fn zip_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
fn file_mode(path: &Path) -> io::Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    Ok(std::fs::metadata(path)?.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> io::Result<u32> {
    Ok(0o644)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Read;

    fn sample_tree() -> TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        std::fs::write(root.join(".zenodo.json"), b"{\"title\": \"x\"}").unwrap();
        std::fs::create_dir_all(root.join("sub/deeper")).unwrap();
        std::fs::write(root.join("sub/data.csv"), b"a,b\n1,2\n").unwrap();
        std::fs::write(root.join("sub/deeper/blob.bin"), [0u8, 159, 146, 150, 255]).unwrap();
        std::fs::create_dir_all(root.join("empty")).unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink("sub/data.csv", root.join("link.csv")).unwrap();
        dir
    }

    fn decoder(format: ArchiveFormat, file: File) -> Box<dyn Read> {
        match format {
            ArchiveFormat::Tar => Box::new(file),
            ArchiveFormat::Gztar => Box::new(flate2::read::GzDecoder::new(file)),
            ArchiveFormat::Bztar => Box::new(bzip2::read::BzDecoder::new(file)),
            ArchiveFormat::Xztar => Box::new(xz2::read::XzDecoder::new(file)),
            ArchiveFormat::Zstdtar => Box::new(zstd::Decoder::new(file).unwrap()),
            ArchiveFormat::Zip => unreachable!("zip is not a tar stream"),
        }
    }

    /// Relative path -> file bytes, link target, or directory marker.
    fn snapshot(root: &Path) -> BTreeMap<PathBuf, String> {
        let mut out = BTreeMap::new();
        for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
            let entry = entry.unwrap();
            let rel = entry.path().strip_prefix(root).unwrap().to_path_buf();
            let kind = entry.file_type();
            let value = if kind.is_symlink() {
                format!(
                    "link:{}",
                    std::fs::read_link(entry.path()).unwrap().display()
                )
            } else if kind.is_dir() {
                "dir".to_string()
            } else {
                format!("{:?}", std::fs::read(entry.path()).unwrap())
            };
            out.insert(rel, value);
        }
        out
    }

    #[test]
    fn every_format_round_trips_tree() {
        let tree = sample_tree();
        for format in [
            ArchiveFormat::Tar,
            ArchiveFormat::Gztar,
            ArchiveFormat::Bztar,
            ArchiveFormat::Xztar,
            ArchiveFormat::Zstdtar,
        ] {
            let archive = create_archive(tree.path(), "snapshot", format).expect("archive");
            let out = tempfile::tempdir().unwrap();
            let file = File::open(archive.path()).unwrap();
            tar::Archive::new(decoder(format, file))
                .unpack(out.path())
                .expect("unpack");

            assert_eq!(snapshot(tree.path()), snapshot(out.path()), "{format}");
        }
    }

    #[test]
    fn zip_holds_files_and_links() {
        let tree = sample_tree();
        let archive = create_archive(tree.path(), "bundle", ArchiveFormat::Zip).expect("archive");
        assert_eq!(archive.file_name(), "bundle.zip");

        let mut zip = zip::ZipArchive::new(File::open(archive.path()).unwrap()).unwrap();
        let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
        names.sort();
        assert!(names.contains(&"sub/".to_string()));
        assert!(names.contains(&"empty/".to_string()));

        let mut read = |name: &str| {
            let mut bytes = Vec::new();
            zip.by_name(name).unwrap().read_to_end(&mut bytes).unwrap();
            bytes
        };
        assert_eq!(read("sub/data.csv"), b"a,b\n1,2\n");
        assert_eq!(read("sub/deeper/blob.bin"), [0u8, 159, 146, 150, 255]);
        #[cfg(unix)]
        assert_eq!(read("link.csv"), b"sub/data.csv");
    }

    #[test]
    fn archive_is_named_after_base_and_extension() {
        let tree = sample_tree();
        let archive = create_archive(tree.path(), "mytag", ArchiveFormat::Gztar).unwrap();
        assert_eq!(archive.file_name(), "mytag.tar.gz");
        assert_eq!(archive.path().file_name().unwrap(), "mytag.tar.gz");
        assert!(archive.size().unwrap() > 0);

        let entries: Vec<_> = std::fs::read_dir(archive.directory()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn entries_are_relative_and_sorted() {
        let tree = sample_tree();
        let archive = create_archive(tree.path(), "order", ArchiveFormat::Tar).unwrap();
        let mut tar = tar::Archive::new(File::open(archive.path()).unwrap());
        let names: Vec<String> = tar
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();

        assert!(names.iter().all(|n| !n.starts_with('/')));
        assert_eq!(names.first().map(String::as_str), Some(".zenodo.json"));
        let sub = names.iter().position(|n| n.trim_end_matches('/') == "sub").unwrap();
        let data = names.iter().position(|n| n == "sub/data.csv").unwrap();
        assert!(sub < data);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_stored_as_links() {
        let tree = sample_tree();
        let archive = create_archive(tree.path(), "links", ArchiveFormat::Tar).unwrap();
        let mut tar = tar::Archive::new(File::open(archive.path()).unwrap());
        let link = tar
            .entries()
            .unwrap()
            .map(|e| e.unwrap())
            .find(|e| e.path().unwrap().as_ref() == Path::new("link.csv"))
            .expect("link entry");
        assert_eq!(link.header().entry_type(), tar::EntryType::Symlink);
        assert_eq!(
            link.link_name().unwrap().unwrap().as_ref(),
            Path::new("sub/data.csv")
        );
    }

    #[test]
    fn dropping_archive_removes_directory() {
        let tree = sample_tree();
        let archive = create_archive(tree.path(), "gone", ArchiveFormat::Tar).unwrap();
        let dir = archive.directory().to_path_buf();
        assert!(dir.exists());
        drop(archive);
        assert!(!dir.exists());
    }

    #[test]
    fn missing_source_is_archive_error() {
        let missing = Path::new("/nonexistent/datalad-release/source");
        let err = create_archive(missing, "x", ArchiveFormat::Tar).expect_err("should fail");
        assert!(matches!(err, ReleaseError::Archive { .. }));
    }
}
