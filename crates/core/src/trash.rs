use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Local, LocalResult, NaiveDateTime, TimeZone, Timelike};
use url::Url;

use crate::fs_ops;
use crate::location::Location;

const TRASH_INFO_HEADER: &str = "[Trash Info]";
const TRASH_INFO_EXTENSION: &str = "trashinfo";
const DELETION_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// One entry of the trash can.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TrashedItem {
    /// Backend-specific handle of the entry; stable until it is restored.
    pub id: PathBuf,
    pub original: Location,
    /// Deletion time in unix seconds, as the trash can records it.
    pub deleted_at: i64,
}

pub trait TrashBackend: fmt::Debug + Send + Sync {
    fn trash(&self, path: &Path) -> io::Result<TrashedItem>;
    fn list(&self) -> io::Result<Vec<TrashedItem>>;
    fn restore(&self, item: &TrashedItem, destination: &Path) -> io::Result<()>;
}

/// Trash can in the freedesktop layout (`files/` plus `info/*.trashinfo`)
/// rooted at an arbitrary directory.
#[derive(Clone, Debug)]
pub struct LocalTrash {
    root: PathBuf,
}

impl LocalTrash {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$XDG_DATA_HOME/Trash`, or `~/.local/share/Trash`.
    pub fn home() -> Option<Self> {
        let data_home = std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .filter(|path| path.is_absolute())
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/share")))?;
        Some(Self::new(data_home.join("Trash")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn files_dir(&self) -> PathBuf {
        self.root.join("files")
    }

    fn info_dir(&self) -> PathBuf {
        self.root.join("info")
    }

    fn info_path_for(&self, id: &Path) -> io::Result<PathBuf> {
        let Some(name) = id.file_name() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("trash id has no file name: {}", id.to_string_lossy()),
            ));
        };
        let mut info_name = name.to_os_string();
        info_name.push(".");
        info_name.push(TRASH_INFO_EXTENSION);
        Ok(self.info_dir().join(info_name))
    }

    /// Reserves a name by creating its info file; the `create_new` open is
    /// what keeps two trashings of equal names apart.
    fn reserve(&self, base_name: &str, info: &str) -> io::Result<PathBuf> {
        for attempt in 1u32.. {
            let name = if attempt == 1 {
                base_name.to_string()
            } else {
                format!("{base_name}.{attempt}")
            };
            let id = self.files_dir().join(&name);
            if fs::symlink_metadata(&id).is_ok() {
                continue;
            }
            let info_path = self.info_path_for(&id)?;
            match fs_ops::create_file(&info_path, info.as_bytes()) {
                Ok(()) => return Ok(id),
                Err(error) if error.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(error) => return Err(error),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free trash name for {base_name}"),
        ))
    }
}

impl TrashBackend for LocalTrash {
    fn trash(&self, path: &Path) -> io::Result<TrashedItem> {
        let original = Location::new(path);
        if !original.path().is_absolute() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("trash needs an absolute path: {original}"),
            ));
        }
        fs::symlink_metadata(path)?;
        fs::create_dir_all(self.files_dir())?;
        fs::create_dir_all(self.info_dir())?;

        let now = Local::now();
        let now = now.with_nanosecond(0).unwrap_or(now);
        let deleted = now.naive_local();
        let info = render_trash_info(&original, &deleted);
        let id = self.reserve(&original.base_name(), &info)?;
        // Report the time `list` will read back, which differs from `now`
        // when the local time is ambiguous.
        let deleted_at = local_timestamp(&deleted).unwrap_or_else(|| now.timestamp());

        if let Err(error) = fs_ops::move_path(path, &id) {
            let _ = fs::remove_file(self.info_path_for(&id)?);
            return Err(error);
        }
        Ok(TrashedItem {
            id,
            original,
            deleted_at,
        })
    }

    fn list(&self) -> io::Result<Vec<TrashedItem>> {
        let entries = match fs::read_dir(self.info_dir()) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error),
        };

        let mut items = Vec::new();
        for entry in entries {
            let info_path = entry?.path();
            if info_path.extension().and_then(|ext| ext.to_str()) != Some(TRASH_INFO_EXTENSION) {
                continue;
            }
            let Some(stem) = info_path.file_stem() else {
                continue;
            };
            let id = self.files_dir().join(stem);
            if fs::symlink_metadata(&id).is_err() {
                tracing::debug!(info = %info_path.display(), "trash info without payload");
                continue;
            }
            let source = fs::read_to_string(&info_path)?;
            match parse_trash_info(&source) {
                Some((original, deleted_at)) => items.push(TrashedItem {
                    id,
                    original,
                    deleted_at,
                }),
                None => {
                    tracing::debug!(info = %info_path.display(), "skipping malformed trash info");
                }
            }
        }
        Ok(items)
    }

    fn restore(&self, item: &TrashedItem, destination: &Path) -> io::Result<()> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        fs_ops::move_path(&item.id, destination)?;
        match fs::remove_file(self.info_path_for(&item.id)?) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error),
        }
    }
}

fn render_trash_info(original: &Location, deleted: &NaiveDateTime) -> String {
    let encoded = Url::from_file_path(original.path())
        .map(|url| url.path().to_string())
        .unwrap_or_else(|()| original.to_string());
    format!(
        "{TRASH_INFO_HEADER}\nPath={encoded}\nDeletionDate={}\n",
        deleted.format(DELETION_DATE_FORMAT)
    )
}

fn parse_trash_info(source: &str) -> Option<(Location, i64)> {
    let mut in_section = false;
    let mut original = None;
    let mut deleted_at = None;
    for raw_line in source.lines() {
        let line = raw_line.trim();
        if line.starts_with('[') {
            in_section = line == TRASH_INFO_HEADER;
            continue;
        }
        if !in_section {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            "Path" => original = decode_trash_path(value.trim()),
            "DeletionDate" => deleted_at = parse_deletion_date(value.trim()),
            _ => {}
        }
    }
    Some((original?, deleted_at?))
}

fn decode_trash_path(value: &str) -> Option<Location> {
    if !value.starts_with('/') {
        return None;
    }
    let url = Url::parse(&format!("file://{value}")).ok()?;
    url.to_file_path().ok().map(Location::new)
}

fn parse_deletion_date(value: &str) -> Option<i64> {
    let naive = NaiveDateTime::parse_from_str(value, DELETION_DATE_FORMAT).ok()?;
    local_timestamp(&naive)
}

/// Unix seconds of a local wall-clock time; the earlier instant when the
/// time occurs twice.
fn local_timestamp(naive: &NaiveDateTime) -> Option<i64> {
    match Local.from_local_datetime(naive) {
        LocalResult::Single(time) => Some(time.timestamp()),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.timestamp()),
        LocalResult::None => None,
    }
}

/// The desktop's own trash can, through the `trash` crate.
#[cfg(target_os = "linux")]
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTrash;

#[cfg(target_os = "linux")]
impl SystemTrash {
    fn raw_items() -> io::Result<Vec<::trash::TrashItem>> {
        ::trash::os_limited::list().map_err(trash_error)
    }
}

#[cfg(target_os = "linux")]
impl TrashBackend for SystemTrash {
    fn trash(&self, path: &Path) -> io::Result<TrashedItem> {
        let original = Location::new(path);
        let started = Local::now().timestamp();
        ::trash::delete(path).map_err(trash_error)?;

        let newest = self
            .list()?
            .into_iter()
            .filter(|item| item.original == original && item.deleted_at >= started - 1)
            .max_by_key(|item| item.deleted_at);
        newest.ok_or_else(|| {
            io::Error::other(format!("trashed item not found in trash: {original}"))
        })
    }

    fn list(&self) -> io::Result<Vec<TrashedItem>> {
        Ok(Self::raw_items()?
            .into_iter()
            .map(|item| TrashedItem {
                id: PathBuf::from(&item.id),
                original: Location::new(item.original_path()),
                deleted_at: item.time_deleted,
            })
            .collect())
    }

    fn restore(&self, item: &TrashedItem, destination: &Path) -> io::Result<()> {
        let raw = Self::raw_items()?
            .into_iter()
            .find(|raw| Path::new(&raw.id) == item.id)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no longer in trash: {}", item.original),
                )
            })?;
        let restored_at = raw.original_path();
        ::trash::os_limited::restore_all([raw]).map_err(trash_error)?;
        if Location::new(&restored_at) != Location::new(destination) {
            fs_ops::move_path(&restored_at, destination)?;
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn trash_error(error: ::trash::Error) -> io::Error {
    io::Error::other(format!("trash operation failed: {error}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs_ops::test_support::make_temp_dir;

    #[test]
    fn trash_list_restore_round_trip() {
        let root = make_temp_dir("trash-local");
        let trash = LocalTrash::new(root.join("Trash"));
        let file = root.join("home/report final.txt");
        fs::create_dir_all(root.join("home")).expect("home should exist");
        fs::write(&file, "report").expect("file should be written");

        let item = trash.trash(&file).expect("trash should succeed");
        assert!(!file.exists());
        assert_eq!(item.original, Location::new(&file));

        let listed = trash.list().expect("list should succeed");
        assert_eq!(listed, vec![item.clone()]);

        trash
            .restore(&item, &file)
            .expect("restore should succeed");
        assert_eq!(
            fs::read_to_string(&file).expect("restored file should be readable"),
            "report"
        );
        assert!(trash.list().expect("list should succeed").is_empty());
        fs::remove_dir_all(&root).expect("temp tree should be removable");
    }

    #[test]
    fn same_name_gets_distinct_entries() {
        let root = make_temp_dir("trash-names");
        let trash = LocalTrash::new(root.join("Trash"));
        let file = root.join("x.txt");

        fs::write(&file, "first").expect("file should be written");
        let first = trash.trash(&file).expect("first trash should succeed");
        fs::write(&file, "second").expect("file should be written");
        let second = trash.trash(&file).expect("second trash should succeed");

        assert_ne!(first.id, second.id);
        assert_eq!(trash.list().expect("list should succeed").len(), 2);
        fs::remove_dir_all(&root).expect("temp tree should be removable");
    }

    #[test]
    fn trash_info_parses_encoded_path_and_date() {
        let source = "[Trash Info]\nPath=/home/user/with%20space.txt\nDeletionDate=2024-03-01T10:20:30\n";
        let (original, deleted_at) = parse_trash_info(source).expect("info should parse");

        assert_eq!(original, Location::new("/home/user/with space.txt"));
        let naive = NaiveDateTime::parse_from_str("2024-03-01T10:20:30", DELETION_DATE_FORMAT)
            .expect("date should parse");
        assert_eq!(
            Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|time| time.timestamp()),
            Some(deleted_at)
        );
    }

    #[test]
    fn reported_deletion_time_matches_the_info_file() {
        let root = make_temp_dir("trash-time");
        let trash = LocalTrash::new(root.join("Trash"));
        let file = root.join("dated.txt");
        fs::write(&file, "dated").expect("file should be written");

        let item = trash.trash(&file).expect("trash should succeed");
        let info_path = trash.info_path_for(&item.id).expect("id should have a name");
        let source = fs::read_to_string(info_path).expect("info file should be readable");
        let (_, recorded) = parse_trash_info(&source).expect("info should parse");

        assert_eq!(item.deleted_at, recorded);
        fs::remove_dir_all(&root).expect("temp tree should be removable");
    }

    #[test]
    fn malformed_info_is_rejected() {
        assert_eq!(parse_trash_info("[Trash Info]\nPath=relative\n"), None);
        assert_eq!(parse_trash_info("[Other]\nPath=/a\nDeletionDate=2024-01-01T00:00:00\n"), None);
    }
}
