//! Synchronous filesystem primitives the job workers are built from.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

pub fn destination_path(source: &Path, destination_dir: &Path) -> io::Result<PathBuf> {
    let Some(name) = source.file_name() else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("source has no file name: {}", source.to_string_lossy()),
        ));
    };
    Ok(destination_dir.join(name))
}

/// Recursively copies `source` to `destination`, keeping symlinks as links
/// and file modification times.
///
/// Stops early with `Interrupted` once `cancel` fires; whatever was copied so
/// far stays in place.
pub fn copy_path(source: &Path, destination: &Path, cancel: &CancellationToken) -> io::Result<u64> {
    if cancel.is_cancelled() {
        return Err(io::Error::new(io::ErrorKind::Interrupted, "copy cancelled"));
    }
    let metadata = fs::symlink_metadata(source)?;
    ensure_absent(destination)?;

    if metadata.file_type().is_symlink() {
        let target = fs::read_link(source)?;
        make_symlink(&target, destination)?;
        return Ok(0);
    }

    if metadata.is_dir() {
        if destination.starts_with(source) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "cannot copy directory into itself: {} -> {}",
                    source.to_string_lossy(),
                    destination.to_string_lossy()
                ),
            ));
        }

        fs::create_dir_all(destination)?;
        let mut copied = 0u64;
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            let child_destination = destination.join(entry.file_name());
            copied = copied.saturating_add(copy_path(&entry.path(), &child_destination, cancel)?);
        }
        fs::set_permissions(destination, metadata.permissions())?;
        return Ok(copied);
    }

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    let copied = fs::copy(source, destination)?;
    let modified = filetime::FileTime::from_last_modification_time(&metadata);
    filetime::set_file_mtime(destination, modified)?;
    Ok(copied)
}

/// Moves `source` to `destination`, falling back to copy and delete across
/// filesystems. Never replaces an existing destination.
pub fn move_path(source: &Path, destination: &Path) -> io::Result<()> {
    fs::symlink_metadata(source)?;
    ensure_absent(destination)?;

    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(error) if is_cross_device_error(&error) => {
            copy_path(source, destination, &CancellationToken::new())?;
            remove_path(source)
        }
        Err(error) => Err(error),
    }
}

pub fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

pub fn create_dir(path: &Path) -> io::Result<()> {
    fs::create_dir(path)
}

pub fn create_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    use std::io::Write;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(contents)
}

pub fn copy_template(template: &Path, destination: &Path) -> io::Result<()> {
    let contents = fs::read(template)?;
    create_file(destination, &contents)
}

#[cfg(unix)]
pub fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
pub fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    let _ = (target, link);
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symbolic links are not supported on this platform",
    ))
}

/// Picks a free sibling name for a duplicate: `a (copy).txt`, then
/// `a (copy 2).txt`, and so on.
pub fn duplicate_path(source: &Path) -> io::Result<PathBuf> {
    let parent = source.parent().unwrap_or_else(|| Path::new("."));
    let Some(name) = source.file_name() else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("source has no file name: {}", source.to_string_lossy()),
        ));
    };
    let is_dir = fs::symlink_metadata(source).is_ok_and(|metadata| metadata.is_dir());
    let (stem, extension) = split_extension(name, is_dir);

    for attempt in 1u32.. {
        let suffix = if attempt == 1 {
            String::from(" (copy)")
        } else {
            format!(" (copy {attempt})")
        };
        let mut candidate = stem.clone();
        candidate.push(suffix);
        if let Some(extension) = &extension {
            candidate.push(".");
            candidate.push(extension);
        }
        let candidate = parent.join(candidate);
        if fs::symlink_metadata(&candidate).is_err() {
            return Ok(candidate);
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free duplicate name for {}", source.to_string_lossy()),
    ))
}

/// Name of a new link to `source` inside `destination_dir`.
pub fn link_path(source: &Path, destination_dir: &Path) -> io::Result<PathBuf> {
    let destination = destination_path(source, destination_dir)?;
    if source.parent() != Some(destination_dir) {
        return Ok(destination);
    }
    let Some(name) = source.file_name() else {
        return Ok(destination);
    };
    let mut link_name = OsString::from("Link to ");
    link_name.push(name);
    Ok(destination_dir.join(link_name))
}

fn split_extension(name: &std::ffi::OsStr, is_dir: bool) -> (OsString, Option<OsString>) {
    let text = name.to_string_lossy();
    if is_dir {
        return (name.to_os_string(), None);
    }
    match text.rfind('.') {
        Some(index) if index > 0 => (
            OsString::from(&text[..index]),
            Some(OsString::from(&text[index + 1..])),
        ),
        _ => (name.to_os_string(), None),
    }
}

pub fn ensure_absent(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path).is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("destination already exists: {}", path.to_string_lossy()),
        ));
    }
    Ok(())
}

fn is_cross_device_error(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::CrossesDevices || error.raw_os_error() == Some(18)
}

/// New mode bits after applying `permissions` under `mask`.
pub fn masked_mode(current: u32, permissions: u32, mask: u32) -> u32 {
    (current & !mask) | (permissions & mask)
}

#[cfg(unix)]
pub fn unix_mode(path: &Path) -> io::Result<u32> {
    use std::os::unix::fs::PermissionsExt;

    Ok(fs::symlink_metadata(path)?.permissions().mode() & 0o7777)
}

#[cfg(unix)]
pub fn set_unix_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
pub fn unix_mode(path: &Path) -> io::Result<u32> {
    let _ = path;
    Err(unsupported_ownership())
}

#[cfg(not(unix))]
pub fn set_unix_mode(path: &Path, mode: u32) -> io::Result<()> {
    let _ = (path, mode);
    Err(unsupported_ownership())
}

#[cfg(unix)]
pub fn owner_name(path: &Path) -> io::Result<String> {
    use nix::unistd::{Uid, User};
    use std::os::unix::fs::MetadataExt;

    let uid = fs::symlink_metadata(path)?.uid();
    Ok(User::from_uid(Uid::from_raw(uid))
        .ok()
        .flatten()
        .map(|user| user.name)
        .unwrap_or_else(|| uid.to_string()))
}

#[cfg(unix)]
pub fn group_name(path: &Path) -> io::Result<String> {
    use nix::unistd::{Gid, Group};
    use std::os::unix::fs::MetadataExt;

    let gid = fs::symlink_metadata(path)?.gid();
    Ok(Group::from_gid(Gid::from_raw(gid))
        .ok()
        .flatten()
        .map(|group| group.name)
        .unwrap_or_else(|| gid.to_string()))
}

#[cfg(unix)]
pub fn set_owner(path: &Path, owner: &str) -> io::Result<()> {
    use nix::unistd::{Uid, User, chown};

    let uid = match owner.parse::<u32>() {
        Ok(raw) => Uid::from_raw(raw),
        Err(_) => User::from_name(owner)
            .map_err(io::Error::from)?
            .map(|user| user.uid)
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("unknown user: {owner}"))
            })?,
    };
    chown(path, Some(uid), None).map_err(io::Error::from)
}

#[cfg(unix)]
pub fn set_group(path: &Path, group: &str) -> io::Result<()> {
    use nix::unistd::{Gid, Group, chown};

    let gid = match group.parse::<u32>() {
        Ok(raw) => Gid::from_raw(raw),
        Err(_) => Group::from_name(group)
            .map_err(io::Error::from)?
            .map(|group| group.gid)
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("unknown group: {group}"))
            })?,
    };
    chown(path, None, Some(gid)).map_err(io::Error::from)
}

#[cfg(not(unix))]
pub fn owner_name(path: &Path) -> io::Result<String> {
    let _ = path;
    Err(unsupported_ownership())
}

#[cfg(not(unix))]
pub fn group_name(path: &Path) -> io::Result<String> {
    let _ = path;
    Err(unsupported_ownership())
}

#[cfg(not(unix))]
pub fn set_owner(path: &Path, owner: &str) -> io::Result<()> {
    let _ = (path, owner);
    Err(unsupported_ownership())
}

#[cfg(not(unix))]
pub fn set_group(path: &Path, group: &str) -> io::Result<()> {
    let _ = (path, group);
    Err(unsupported_ownership())
}

#[cfg(not(unix))]
fn unsupported_ownership() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "unix permissions and ownership are not supported on this platform",
    )
}


#[cfg(test)]
mod tests {
    use super::test_support::make_temp_dir;
    use super::*;

    #[test]
    fn copy_tree_keeps_contents_and_refuses_overwrite() {
        let root = make_temp_dir("fs-copy");
        let source = root.join("source");
        fs::create_dir_all(source.join("nested")).expect("source tree should exist");
        fs::write(source.join("nested/child.txt"), "child").expect("child should be written");

        let destination = root.join("copy");
        copy_path(&source, &destination, &CancellationToken::new())
            .expect("copy should succeed");
        assert_eq!(
            fs::read_to_string(destination.join("nested/child.txt"))
                .expect("copied child should be readable"),
            "child"
        );

        let error = copy_path(&source, &destination, &CancellationToken::new())
            .expect_err("second copy should fail");
        assert_eq!(error.kind(), io::ErrorKind::AlreadyExists);
        fs::remove_dir_all(&root).expect("temp tree should be removable");
    }

    #[test]
    fn cancelled_copy_is_interrupted() {
        let root = make_temp_dir("fs-cancel");
        let source = root.join("a.txt");
        fs::write(&source, "a").expect("source should be written");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = copy_path(&source, &root.join("b.txt"), &cancel)
            .expect_err("cancelled copy should fail");
        assert_eq!(error.kind(), io::ErrorKind::Interrupted);
        assert!(!root.join("b.txt").exists());
        fs::remove_dir_all(&root).expect("temp tree should be removable");
    }

    #[test]
    fn duplicate_names_count_up() {
        let root = make_temp_dir("fs-dup");
        let source = root.join("notes.txt");
        fs::write(&source, "n").expect("source should be written");

        let first = duplicate_path(&source).expect("name should resolve");
        assert_eq!(first, root.join("notes (copy).txt"));
        fs::write(&first, "n").expect("duplicate should be written");
        assert_eq!(
            duplicate_path(&source).expect("name should resolve"),
            root.join("notes (copy 2).txt")
        );

        let folder = root.join("album.d");
        fs::create_dir(&folder).expect("folder should be created");
        assert_eq!(
            duplicate_path(&folder).expect("name should resolve"),
            root.join("album.d (copy)")
        );
        fs::remove_dir_all(&root).expect("temp tree should be removable");
    }

    #[test]
    fn link_in_same_directory_gets_prefix() {
        let source = Path::new("/data/photo.png");
        assert_eq!(
            link_path(source, Path::new("/data")).expect("name should resolve"),
            PathBuf::from("/data/Link to photo.png")
        );
        assert_eq!(
            link_path(source, Path::new("/elsewhere")).expect("name should resolve"),
            PathBuf::from("/elsewhere/photo.png")
        );
    }

    #[test]
    fn masked_mode_only_touches_masked_bits() {
        assert_eq!(masked_mode(0o755, 0o600, 0o777), 0o600);
        assert_eq!(masked_mode(0o755, 0o000, 0o022), 0o755);
        assert_eq!(masked_mode(0o644, 0o100, 0o100), 0o744);
    }

    #[test]
    fn move_refuses_existing_destination() {
        let root = make_temp_dir("fs-move");
        let source = root.join("a.txt");
        let destination = root.join("b.txt");
        fs::write(&source, "a").expect("source should be written");
        fs::write(&destination, "b").expect("destination should be written");

        let error = move_path(&source, &destination).expect_err("move should fail");
        assert_eq!(error.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(
            fs::read_to_string(&destination).expect("destination should be readable"),
            "b"
        );
        fs::remove_dir_all(&root).expect("temp tree should be removable");
    }
}
