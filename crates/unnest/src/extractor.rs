//! Single archive extraction
//!
//! Containers are unpacked into a staging directory created next to the
//! destination and only moved into place once the decoder has finished, so a
//! failed extraction never leaves a half-filled target behind.

use crate::{
    error::{ArchiveError, Result},
    format::ArchiveFormat,
    progress::{NoProgressReporter, ProgressReader, ProgressReporter},
};
use std::{
    io::{self, BufReader, Read},
    path::{Path, PathBuf},
};
use tracing::debug;

const STAGING_PREFIX: &str = ".unnest-staging-";

/// Unpacks a single archive of a known format
pub struct Extractor<P: ProgressReporter = NoProgressReporter> {
    progress_reporter: P,
}

impl Extractor<NoProgressReporter> {
    pub fn new() -> Self {
        Self {
            progress_reporter: NoProgressReporter,
        }
    }
}

impl Default for Extractor<NoProgressReporter> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ProgressReporter> Extractor<P> {
    /// Set a custom progress reporter
    pub fn with_progress_reporter<R: ProgressReporter>(self, reporter: R) -> Extractor<R> {
        Extractor {
            progress_reporter: reporter,
        }
    }

    /// Extract `archive_path` as `format`.
    ///
    /// For tar and zip archives `destination` is the directory receiving the
    /// contents. For a bare gzip stream `destination` is the directory that
    /// receives the single decompressed file, named after the archive with
    /// the `.gz` suffix removed. Returns the path of what was produced.
    pub fn extract(
        &self,
        format: ArchiveFormat,
        archive_path: &Path,
        destination: &Path,
    ) -> Result<PathBuf> {
        let file_size = fs_err::metadata(archive_path)?.len();
        self.progress_reporter.on_start(archive_path, Some(file_size));

        debug!(?archive_path, ?destination, format = format.name(), "extracting");

        match format {
            ArchiveFormat::Tar => {
                self.extract_tar(archive_path, destination, TarCompression::Plain)
            }
            ArchiveFormat::TarGz => {
                self.extract_tar(archive_path, destination, TarCompression::Gzip)
            }
            ArchiveFormat::Zip => self.extract_zip(archive_path, destination),
            ArchiveFormat::Gzip => self.extract_gzip(archive_path, destination),
        }
    }

    fn open(&self, archive_path: &Path) -> Result<ProgressReader<BufReader<fs_err::File>, &P>> {
        let file = fs_err::File::open(archive_path)?;
        Ok(ProgressReader::new(
            BufReader::new(file),
            &self.progress_reporter,
        ))
    }

    /// Extract a tar-based archive
    fn extract_tar(
        &self,
        archive_path: &Path,
        destination: &Path,
        compression: TarCompression,
    ) -> Result<PathBuf> {
        let buf_reader = self.open(archive_path)?;

        let reader: Box<dyn Read + '_> = match compression {
            TarCompression::Plain => Box::new(buf_reader),
            // Concatenated members are one stream, as with gzip -d
            TarCompression::Gzip => Box::new(flate2::read::MultiGzDecoder::new(buf_reader)),
        };

        let mut archive = tar::Archive::new(reader);
        let staging = create_staging(destination)?;

        archive
            .unpack(staging.path())
            .map_err(|e| ArchiveError::tar_extraction(e.to_string()))?;

        self.move_extracted_dir(staging.path(), destination)?;

        self.progress_reporter.on_finish("Extracted tar archive");
        Ok(destination.to_path_buf())
    }

    /// Extract a ZIP archive
    fn extract_zip(&self, archive_path: &Path, destination: &Path) -> Result<PathBuf> {
        let reader = self.open(archive_path)?;
        let mut archive = zip::ZipArchive::new(reader).map_err(zip_error)?;

        let staging = create_staging(destination)?;
        archive.extract(staging.path()).map_err(zip_error)?;

        self.move_extracted_dir(staging.path(), destination)?;

        self.progress_reporter.on_finish("Extracted ZIP archive");
        Ok(destination.to_path_buf())
    }

    /// Decompress a bare gzip stream into a single file
    fn extract_gzip(&self, archive_path: &Path, destination: &Path) -> Result<PathBuf> {
        let output = destination.join(gzip_output_name(archive_path)?);
        if output.exists() {
            return Err(ArchiveError::DestinationExists { path: output });
        }

        fs_err::create_dir_all(destination)?;
        let mut decoder = flate2::read::MultiGzDecoder::new(self.open(archive_path)?);
        let mut staged = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempfile_in(destination)
            .map_err(|e| ArchiveError::TempDirCreation(e.to_string()))?;

        io::copy(&mut decoder, staged.as_file_mut()).map_err(|e| match e.kind() {
            io::ErrorKind::InvalidInput
            | io::ErrorKind::InvalidData
            | io::ErrorKind::UnexpectedEof => ArchiveError::gzip_extraction(e.to_string()),
            _ => ArchiveError::Io(e),
        })?;

        staged.persist_noclobber(&output).map_err(|e| {
            if e.error.kind() == io::ErrorKind::AlreadyExists {
                ArchiveError::DestinationExists {
                    path: output.clone(),
                }
            } else {
                ArchiveError::Io(e.error)
            }
        })?;

        self.progress_reporter.on_finish("Decompressed gzip stream");
        Ok(output)
    }

    /// Move extracted content into `dest`. Existing directories in `dest`
    /// are merged, existing files are replaced.
    fn move_extracted_dir(&self, src: &Path, dest: &Path) -> Result<()> {
        if fs_err::read_dir(src)?.next().transpose()?.is_none() {
            return Err(ArchiveError::EmptyArchive);
        }

        fs_err::create_dir_all(dest)?;
        for entry in fs_err::read_dir(src)? {
            let entry = entry?;
            move_entry(&entry.path(), &dest.join(entry.file_name()))?;
        }

        Ok(())
    }
}

/// Check that a provisionally classified file starts with the signature of
/// `format`. Only ZIP is ever provisional.
pub fn check_signature(path: &Path, format: ArchiveFormat) -> Result<()> {
    let mut header = [0u8; 4];
    let mut file = fs_err::File::open(path)?;
    let read = read_prefix(&mut file, &mut header)?;

    let valid = match format {
        ArchiveFormat::Zip => {
            read == 4 && matches!(header, [0x50, 0x4B, 0x03, 0x04] | [0x50, 0x4B, 0x05, 0x06])
        }
        ArchiveFormat::TarGz | ArchiveFormat::Gzip => read >= 2 && header[..2] == [0x1F, 0x8B],
        ArchiveFormat::Tar => true,
    };

    if valid {
        Ok(())
    } else {
        Err(ArchiveError::not_a_container(
            path,
            format.name(),
            "missing container signature",
        ))
    }
}

fn read_prefix(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// File name produced by decompressing a bare gzip stream
pub fn gzip_output_name(archive_path: &Path) -> Result<String> {
    let name = archive_path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| ArchiveError::unsupported_format(&archive_path.display().to_string()))?;

    if !name.to_lowercase().ends_with(".gz") || name.len() <= 3 {
        return Err(ArchiveError::gzip_extraction(format!(
            "cannot derive an output name from {name}"
        )));
    }
    Ok(name[..name.len() - 3].to_string())
}

/// Whether `name` is a staging entry left by an interrupted extraction
pub fn is_staging_name(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX)
}

fn create_staging(destination: &Path) -> Result<tempfile::TempDir> {
    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs_err::create_dir_all(parent)?;
    tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(parent)
        .map_err(|e| ArchiveError::TempDirCreation(e.to_string()))
}

fn move_entry(src: &Path, dest: &Path) -> Result<()> {
    let metadata = fs_err::symlink_metadata(src)?;
    let src_is_dir = metadata.is_dir();
    match fs_err::symlink_metadata(dest) {
        Ok(existing) if existing.is_dir() && src_is_dir => {
            for entry in fs_err::read_dir(src)? {
                let entry = entry?;
                move_entry(&entry.path(), &dest.join(entry.file_name()))?;
            }
            fs_err::remove_dir(src)?;
            return Ok(());
        }
        Ok(existing) if existing.is_dir() || src_is_dir => {
            return Err(ArchiveError::DestinationExists {
                path: dest.to_path_buf(),
            });
        }
        Ok(_) => fs_err::remove_file(dest)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    rename_entry(src, dest, &metadata)
}

/// Moving a directory to another parent needs write access to it, so a
/// read-only directory is opened for the rename and its mode restored after.
#[cfg(unix)]
fn rename_entry(src: &Path, dest: &Path, metadata: &std::fs::Metadata) -> Result<()> {
    use std::fs::Permissions;
    use std::os::unix::fs::PermissionsExt;

    let mode = metadata.permissions().mode();
    if !metadata.is_dir() || mode & 0o200 != 0 {
        fs_err::rename(src, dest)?;
        return Ok(());
    }

    fs_err::set_permissions(src, Permissions::from_mode(mode | 0o200))?;
    if let Err(e) = fs_err::rename(src, dest) {
        fs_err::set_permissions(src, Permissions::from_mode(mode))?;
        return Err(e.into());
    }
    fs_err::set_permissions(dest, Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn rename_entry(src: &Path, dest: &Path, _metadata: &std::fs::Metadata) -> Result<()> {
    fs_err::rename(src, dest)?;
    Ok(())
}

fn zip_error(error: zip::result::ZipError) -> ArchiveError {
    match error {
        // A stream that ends early is a damaged archive, not an I/O fault
        zip::result::ZipError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            ArchiveError::zip_extraction(e.to_string())
        }
        zip::result::ZipError::Io(e) => ArchiveError::Io(e),
        other => ArchiveError::zip_extraction(other.to_string()),
    }
}

/// Tar compression types
enum TarCompression {
    Plain,
    Gzip,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_tar_gz() -> (TempDir, PathBuf) {
        let temp_dir = tempfile::tempdir().unwrap();
        let tar_path = temp_dir.path().join("test.tar.gz");

        let file = File::create(&tar_path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut tar = tar::Builder::new(encoder);

        let mut header = tar::Header::new_gnu();
        header.set_path("pkg/test.txt").unwrap();
        header.set_size(5);
        header.set_cksum();
        tar.append(&header, "hello".as_bytes()).unwrap();

        tar.into_inner().unwrap().finish().unwrap();
        (temp_dir, tar_path)
    }

    fn gzip_member(data: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_extract_tar_gz() {
        let (_temp_archive_dir, archive_path) = create_test_tar_gz();
        let extract_dir = tempfile::tempdir().unwrap();
        let target = extract_dir.path().join("out");

        let extractor = Extractor::new();
        let produced = extractor
            .extract(ArchiveFormat::TarGz, &archive_path, &target)
            .unwrap();

        assert_eq!(produced, target);
        let extracted_file = target.join("pkg").join("test.txt");
        assert_eq!(fs_err::read_to_string(extracted_file).unwrap(), "hello");
    }

    #[test]
    fn test_extract_multi_member_tar_gz() {
        let mut tar = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_path("big.txt").unwrap();
        header.set_size(4096);
        header.set_cksum();
        tar.append(&header, &[b'x'; 4096][..]).unwrap();
        let tar = tar.into_inner().unwrap();

        // Split the tar stream across two gzip members, as bgzip does
        let mut bytes = gzip_member(&tar[..1024]);
        bytes.extend(gzip_member(&tar[1024..]));

        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("split.tar.gz");
        fs_err::write(&archive_path, bytes).unwrap();
        let target = dir.path().join("out");

        Extractor::new()
            .extract(ArchiveFormat::TarGz, &archive_path, &target)
            .unwrap();

        assert_eq!(fs_err::read(target.join("big.txt")).unwrap(), vec![b'x'; 4096]);
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_tar_with_read_only_directory() {
        use std::os::unix::fs::PermissionsExt;

        let mut tar = tar::Builder::new(Vec::new());
        let mut dir_header = tar::Header::new_gnu();
        dir_header.set_entry_type(tar::EntryType::Directory);
        dir_header.set_path("ro/").unwrap();
        dir_header.set_mode(0o555);
        dir_header.set_size(0);
        dir_header.set_cksum();
        tar.append(&dir_header, io::empty()).unwrap();

        let mut file_header = tar::Header::new_gnu();
        file_header.set_path("ro/data.txt").unwrap();
        file_header.set_mode(0o644);
        file_header.set_size(4);
        file_header.set_cksum();
        tar.append(&file_header, &b"data"[..]).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("pkg.tar");
        fs_err::write(&archive_path, tar.into_inner().unwrap()).unwrap();
        let target = dir.path().join("out");

        Extractor::new()
            .extract(ArchiveFormat::Tar, &archive_path, &target)
            .unwrap();

        assert_eq!(fs_err::read(target.join("ro/data.txt")).unwrap(), b"data");
        let ro = target.join("ro");
        assert_eq!(fs_err::metadata(&ro).unwrap().permissions().mode() & 0o777, 0o555);
        fs_err::set_permissions(&ro, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_extract_gzip_stream() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("data.csv.gz");
        fs_err::write(&archive_path, gzip_member(b"a,b\n1,2\n")).unwrap();

        let produced = Extractor::new()
            .extract(ArchiveFormat::Gzip, &archive_path, dir.path())
            .unwrap();

        assert_eq!(produced, dir.path().join("data.csv"));
        assert_eq!(fs_err::read_to_string(produced).unwrap(), "a,b\n1,2\n");
    }

    #[test]
    fn test_extract_multi_member_gzip_stream() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("log.txt.gz");
        let mut bytes = gzip_member(b"first member\n");
        bytes.extend(gzip_member(b"second member\n"));
        fs_err::write(&archive_path, bytes).unwrap();

        let produced = Extractor::new()
            .extract(ArchiveFormat::Gzip, &archive_path, dir.path())
            .unwrap();

        assert_eq!(
            fs_err::read_to_string(produced).unwrap(),
            "first member\nsecond member\n"
        );
    }

    #[test]
    fn test_gzip_does_not_clobber() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("data.csv.gz");
        fs_err::write(&archive_path, gzip_member(b"new")).unwrap();
        fs_err::write(dir.path().join("data.csv"), b"old").unwrap();

        let result = Extractor::new().extract(ArchiveFormat::Gzip, &archive_path, dir.path());

        assert_matches!(result, Err(ArchiveError::DestinationExists { .. }));
        assert_eq!(fs_err::read(dir.path().join("data.csv")).unwrap(), b"old");
    }

    #[test]
    fn test_invalid_zip_leaves_no_target() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("broken.zip");
        fs_err::write(&archive_path, b"definitely not a zip file").unwrap();
        let target = dir.path().join("broken.zip_extracted");

        let result = Extractor::new().extract(ArchiveFormat::Zip, &archive_path, &target);

        assert_matches!(result, Err(ArchiveError::ZipExtraction { .. }));
        assert!(!target.exists());
        let leftovers: Vec<_> = fs_err::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_check_signature() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("fake.stdf");
        fs_err::write(&fake, [0x00, 0x01, 0x02]).unwrap();
        assert_matches!(
            check_signature(&fake, ArchiveFormat::Zip),
            Err(ArchiveError::NotAContainer { .. })
        );

        let real = dir.path().join("real.stdf");
        fs_err::write(&real, [0x50, 0x4B, 0x03, 0x04, 0x00]).unwrap();
        check_signature(&real, ArchiveFormat::Zip).unwrap();
    }

    #[test]
    fn test_gzip_output_name() {
        assert_eq!(
            gzip_output_name(Path::new("dir/x.ZIP.GZ")).unwrap(),
            "x.ZIP"
        );
        assert_matches!(
            gzip_output_name(Path::new(".gz")),
            Err(ArchiveError::GzipExtraction { .. })
        );
    }
}
