use crate::settings::{SchedulerKind, Settings};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const SETTINGS_SECTION: &str = "fileq";

pub fn default_settings_path() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .map(|home| home.join(".config/fileq/settings.ini"))
}

/// Reads settings from `path`. A missing file yields the defaults.
pub fn load_settings(path: &Path) -> io::Result<Settings> {
    let mut settings = Settings::default();
    match fs::read_to_string(path) {
        Ok(source) => apply_settings_ini(&mut settings, &source),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => return Err(error),
    }
    Ok(settings)
}

pub fn save_settings(path: &Path, settings: &Settings) -> io::Result<()> {
    write_atomic(path, &render_settings_ini(settings))
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn write_atomic(path: &Path, content: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let stem = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("settings");
    let tmp = path.with_file_name(format!("{stem}.tmp-{}", std::process::id()));
    fs::write(&tmp, content)?;
    #[cfg(windows)]
    {
        match fs::rename(&tmp, path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                fs::remove_file(path)?;
                fs::rename(tmp, path)
            }
            Err(error) => Err(error),
        }
    }
    #[cfg(not(windows))]
    {
        fs::rename(tmp, path)
    }
}

fn parse_ini_section_name(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.starts_with('[') && line.ends_with(']') {
        return Some(line[1..line.len() - 1].trim());
    }
    None
}

fn apply_settings_ini(settings: &mut Settings, source: &str) {
    let mut in_section = false;

    for raw_line in source.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(section_name) = parse_ini_section_name(line) {
            in_section = section_name.eq_ignore_ascii_case(SETTINGS_SECTION);
            continue;
        }
        if !in_section {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            continue;
        };
        let key = raw_key.trim().to_ascii_lowercase();
        let value = raw_value.trim();

        match key.as_str() {
            "history_depth" => {
                if let Ok(parsed) = value.parse::<usize>() {
                    settings.history_depth = parsed.max(1);
                }
            }
            "trash_dir" => {
                settings.trash_dir = (!value.is_empty()).then(|| PathBuf::from(value));
            }
            "system_trash" => {
                if let Some(parsed) = parse_bool(value) {
                    settings.system_trash = parsed;
                }
            }
            "scheduler" => {
                if let Some(parsed) = SchedulerKind::parse(value) {
                    settings.scheduler = parsed;
                }
            }
            "record_undo" => {
                if let Some(parsed) = parse_bool(value) {
                    settings.record_undo = parsed;
                }
            }
            "worker_threads" => {
                settings.worker_threads = value.parse::<usize>().ok().filter(|count| *count > 0);
            }
            _ => {
                tracing::debug!(key = %key, "ignoring unknown settings key");
            }
        }
    }
}

fn render_settings_ini(settings: &Settings) -> String {
    let mut lines = vec![format!("[{SETTINGS_SECTION}]")];
    lines.push(format!("history_depth={}", settings.history_depth));
    match settings.trash_dir.as_ref() {
        Some(path) => lines.push(format!("trash_dir={}", path.to_string_lossy())),
        None => lines.push(String::from("trash_dir=")),
    }
    lines.push(format!("system_trash={}", settings.system_trash));
    lines.push(format!("scheduler={}", settings.scheduler.label()));
    lines.push(format!("record_undo={}", settings.record_undo));
    match settings.worker_threads {
        Some(count) => lines.push(format!("worker_threads={count}")),
        None => lines.push(String::from("worker_threads=")),
    }

    let mut rendered = lines.join("\n");
    rendered.push('\n');
    rendered
}
