// /////////////////////////////////////////////////////////////////////////////
// Arcvault
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Std Filesystem Adapter
//!
//! `FileSystem` implementation over `std::fs`, plus the platform pieces
//! std does not cover: timestamps through `filetime`, extended attributes
//! through `xattr`, device nodes through `libc::mknod`. Ownership changes
//! use `std::os::unix::fs::chown` and are inherently unix-only; on other
//! platforms they succeed as no-ops so restore still produces file
//! content.

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use arcvault_domain::services::file_service::{
    ExtendedAttribute, FileKind, FileMetadata, FileSystem, FileWriter, SpecialKind,
};
use arcvault_domain::ArchiveError;

/// The production filesystem.
#[derive(Default)]
pub struct StdFileSystem;

impl StdFileSystem {
    pub fn new() -> Self {
        Self
    }
}

struct StdFileWriter {
    file: Option<fs::File>,
    path: String,
}

impl StdFileWriter {
    fn file(&mut self) -> Result<&mut fs::File, ArchiveError> {
        self.file
            .as_mut()
            .ok_or_else(|| ArchiveError::internal_error("write on closed file"))
    }
}

impl FileWriter for StdFileWriter {
    fn seek(&mut self, offset: u64) -> Result<(), ArchiveError> {
        self.file()?.seek(SeekFrom::Start(offset)).map_err(ArchiveError::from)?;
        Ok(())
    }

    fn truncate(&mut self, size: u64) -> Result<(), ArchiveError> {
        self.file()?.set_len(size).map_err(ArchiveError::from)
    }

    fn write_all(&mut self, buffer: &[u8]) -> Result<(), ArchiveError> {
        self.file()?.write_all(buffer).map_err(ArchiveError::from)
    }

    fn size(&mut self) -> Result<u64, ArchiveError> {
        let metadata = self.file()?.metadata().map_err(ArchiveError::from)?;
        Ok(metadata.len())
    }

    fn close(&mut self) -> Result<(), ArchiveError> {
        if let Some(mut file) = self.file.take() {
            file.flush().map_err(ArchiveError::from)?;
            file.sync_all()
                .map_err(|err| ArchiveError::io_error(format!("cannot sync '{}': {err}", self.path)))?;
        }
        Ok(())
    }
}

impl FileSystem for StdFileSystem {
    fn exists(&self, path: &Path) -> bool {
        // symlink_metadata so dangling symlinks still count as existing
        fs::symlink_metadata(path).is_ok()
    }

    fn metadata(&self, path: &Path) -> Result<FileMetadata, ArchiveError> {
        let metadata = fs::symlink_metadata(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                ArchiveError::FileNotFound(path.display().to_string())
            } else {
                ArchiveError::from(err)
            }
        })?;

        let kind = if metadata.is_dir() {
            FileKind::Directory
        } else if metadata.file_type().is_symlink() {
            FileKind::Symlink
        } else if metadata.is_file() {
            FileKind::File
        } else {
            FileKind::Special
        };

        Ok(FileMetadata {
            kind,
            size: metadata.len(),
            permissions: permissions_of(&metadata),
            user_id: owner_of(&metadata).0,
            group_id: owner_of(&metadata).1,
            modified: metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
            accessed: metadata
                .accessed()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
            attributes: Vec::new(),
            special: None,
        })
    }

    fn open_write(&self, path: &Path, _sparse: bool) -> Result<Box<dyn FileWriter>, ArchiveError> {
        // sparse output needs no special open mode: seeking past EOF and
        // truncating to the declared size leaves holes on every major
        // filesystem
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|err| ArchiveError::io_error(format!("cannot open '{}': {err}", path.display())))?;
        Ok(Box::new(StdFileWriter {
            file: Some(file),
            path: path.display().to_string(),
        }))
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>, ArchiveError> {
        let file = fs::File::open(path)
            .map_err(|err| ArchiveError::io_error(format!("cannot open '{}': {err}", path.display())))?;
        Ok(Box::new(file))
    }

    fn truncate_create(&self, path: &Path) -> Result<(), ArchiveError> {
        fs::File::create(path)
            .map_err(|err| ArchiveError::io_error(format!("cannot create '{}': {err}", path.display())))?;
        Ok(())
    }

    fn make_directory(&self, path: &Path, permissions: u32) -> Result<(), ArchiveError> {
        fs::create_dir_all(path)
            .map_err(|err| ArchiveError::io_error(format!("cannot create directory '{}': {err}", path.display())))?;
        self.set_permissions(path, permissions)
    }

    fn make_symlink(&self, target: &Path, link: &Path) -> Result<(), ArchiveError> {
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(target, link)
                .map_err(|err| ArchiveError::io_error(format!("cannot create link '{}': {err}", link.display())))
        }
        #[cfg(not(unix))]
        {
            let _ = (target, link);
            Err(ArchiveError::io_error("symlinks are not supported on this platform"))
        }
    }

    fn make_hardlink(&self, original: &Path, link: &Path) -> Result<(), ArchiveError> {
        fs::hard_link(original, link).map_err(|err| {
            ArchiveError::io_error(format!(
                "cannot create hardlink '{}' -> '{}': {err}",
                link.display(),
                original.display()
            ))
        })
    }

    fn make_special(&self, path: &Path, kind: &SpecialKind, permissions: u32) -> Result<(), ArchiveError> {
        #[cfg(unix)]
        {
            use std::os::unix::ffi::OsStrExt;

            let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
                .map_err(|_| ArchiveError::io_error("path contains NUL"))?;
            let (mode, device) = match kind {
                SpecialKind::CharDevice { major, minor } => (libc::S_IFCHR, libc::makedev(*major, *minor)),
                SpecialKind::BlockDevice { major, minor } => (libc::S_IFBLK, libc::makedev(*major, *minor)),
                SpecialKind::Fifo => (libc::S_IFIFO, 0),
                SpecialKind::Socket => (libc::S_IFSOCK, 0),
            };
            let result = unsafe { libc::mknod(c_path.as_ptr(), mode | permissions as libc::mode_t, device) };
            if result != 0 {
                return Err(ArchiveError::from(std::io::Error::last_os_error()));
            }
            Ok(())
        }
        #[cfg(not(unix))]
        {
            let _ = (path, kind, permissions);
            Err(ArchiveError::io_error("special files are not supported on this platform"))
        }
    }

    fn set_owner(&self, path: &Path, user_id: u32, group_id: u32) -> Result<(), ArchiveError> {
        #[cfg(unix)]
        {
            std::os::unix::fs::chown(path, Some(user_id), Some(group_id)).map_err(|err| {
                ArchiveError::io_error(format!("cannot set owner of '{}': {err}", path.display()))
            })
        }
        #[cfg(not(unix))]
        {
            let _ = (path, user_id, group_id);
            Ok(())
        }
    }

    fn set_permissions(&self, path: &Path, permissions: u32) -> Result<(), ArchiveError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(permissions)).map_err(|err| {
                ArchiveError::io_error(format!("cannot set permissions of '{}': {err}", path.display()))
            })
        }
        #[cfg(not(unix))]
        {
            let _ = (path, permissions);
            Ok(())
        }
    }

    fn set_timestamps(&self, path: &Path, modified: i64, accessed: i64) -> Result<(), ArchiveError> {
        filetime::set_file_times(
            path,
            filetime::FileTime::from_unix_time(accessed, 0),
            filetime::FileTime::from_unix_time(modified, 0),
        )
        .map_err(|err| ArchiveError::io_error(format!("cannot set times of '{}': {err}", path.display())))
    }

    fn set_attributes(&self, path: &Path, attributes: &[ExtendedAttribute]) -> Result<(), ArchiveError> {
        #[cfg(unix)]
        {
            for attribute in attributes {
                xattr::set(path, &attribute.name, &attribute.value).map_err(|err| {
                    ArchiveError::io_error(format!(
                        "cannot set attribute '{}' of '{}': {err}",
                        attribute.name,
                        path.display()
                    ))
                })?;
            }
            Ok(())
        }
        #[cfg(not(unix))]
        {
            let _ = path;
            if attributes.is_empty() {
                Ok(())
            } else {
                Err(ArchiveError::io_error("extended attributes are not supported on this platform"))
            }
        }
    }

    fn delete(&self, path: &Path) -> Result<(), ArchiveError> {
        fs::remove_file(path)
            .map_err(|err| ArchiveError::io_error(format!("cannot delete '{}': {err}", path.display())))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), ArchiveError> {
        fs::rename(from, to).map_err(|err| {
            ArchiveError::io_error(format!("cannot rename '{}' to '{}': {err}", from.display(), to.display()))
        })
    }

    fn is_network_filesystem(&self, path: &Path) -> bool {
        #[cfg(target_os = "linux")]
        {
            use std::os::unix::ffi::OsStrExt;

            // statfs magic numbers: NFS, CIFS/SMB2, SSHFS(fuse)
            const NFS_SUPER_MAGIC: i64 = 0x6969;
            const SMB_SUPER_MAGIC: i64 = 0x517b;
            const CIFS_MAGIC_NUMBER: i64 = 0xff534d42u32 as i64;
            const SMB2_MAGIC_NUMBER: i64 = 0xfe534d42u32 as i64;

            let probe = existing_ancestor(path);
            let Ok(c_path) = std::ffi::CString::new(probe.as_os_str().as_bytes()) else {
                return false;
            };
            let mut stat: libc::statfs = unsafe { std::mem::zeroed() };
            if unsafe { libc::statfs(c_path.as_ptr(), &mut stat) } != 0 {
                return false;
            }
            matches!(
                stat.f_type as i64,
                NFS_SUPER_MAGIC | SMB_SUPER_MAGIC | CIFS_MAGIC_NUMBER | SMB2_MAGIC_NUMBER
            )
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = path;
            false
        }
    }

    fn is_device(&self, path: &Path) -> bool {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            fs::metadata(path)
                .map(|m| m.file_type().is_block_device() || m.file_type().is_char_device())
                .unwrap_or(false)
        }
        #[cfg(not(unix))]
        {
            let _ = path;
            false
        }
    }
}

#[cfg(unix)]
fn permissions_of(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permissions_of(_metadata: &fs::Metadata) -> u32 {
    0o644
}

#[cfg(unix)]
fn owner_of(metadata: &fs::Metadata) -> (u32, u32) {
    use std::os::unix::fs::MetadataExt;
    (metadata.uid(), metadata.gid())
}

#[cfg(not(unix))]
fn owner_of(_metadata: &fs::Metadata) -> (u32, u32) {
    (0, 0)
}

#[cfg(target_os = "linux")]
fn existing_ancestor(path: &Path) -> &Path {
    let mut current = path;
    loop {
        if current.exists() {
            return current;
        }
        match current.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => current = parent,
            _ => return Path::new("."),
        }
    }
}
