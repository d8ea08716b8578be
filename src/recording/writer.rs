// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Saved file management.
//!
//! Auto-saves are named `YYYYMMDDHHMMSS.mid` and manual saves
//! `manual_save_YYYYMMDDHHMMSS.mid`, from local wall-clock time. A second
//! file in the same second gets a `_N` suffix. Every file is written to a
//! `.part` sibling first and renamed into place once complete.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Local;
use tracing::{debug, info, warn};

use crate::error::FileError;
use crate::midi::MidiEvent;

use super::smf::SmfEncoder;

/// Name prefix of manual saves
pub const MANUAL_PREFIX: &str = "manual_save_";

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const TIMESTAMP_LEN: usize = 14;
const EXTENSION: &str = ".mid";
const PART_EXTENSION: &str = ".part";

/// Kind of saved file, derived from its name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveKind {
    Auto,
    Manual,
}

impl SaveKind {
    pub fn prefix(self) -> &'static str {
        match self {
            SaveKind::Auto => "",
            SaveKind::Manual => MANUAL_PREFIX,
        }
    }

    /// Kind of a file named `name`, or `None` if it is not a saved file
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(EXTENSION)?;
        let (kind, rest) = match stem.strip_prefix(MANUAL_PREFIX) {
            Some(rest) => (SaveKind::Manual, rest),
            None => (SaveKind::Auto, stem),
        };

        let (stamp, suffix) = match rest.split_once('_') {
            Some((stamp, n)) => (stamp, Some(n)),
            None => (rest, None),
        };
        if stamp.len() != TIMESTAMP_LEN || !all_digits(stamp) {
            return None;
        }
        if let Some(n) = suffix {
            if n.is_empty() || !all_digits(n) {
                return None;
            }
        }
        Some(kind)
    }
}

fn all_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

/// A file found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFileRecord {
    pub path: PathBuf,
    pub kind: SaveKind,
    pub created: SystemTime,
}

/// Writes event buffers as MIDI files into the auto and manual directories
#[derive(Debug, Clone)]
pub struct FileWriter {
    output_dir: PathBuf,
    manual_dir: PathBuf,
    encoder: SmfEncoder,
}

impl FileWriter {
    pub fn new(output_dir: impl Into<PathBuf>, manual_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            manual_dir: manual_dir.into(),
            encoder: SmfEncoder::new(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn manual_dir(&self) -> &Path {
        &self.manual_dir
    }

    /// Write `events` to a fresh file named `{prefix}{timestamp}.mid` in `dir`
    pub fn write(&self, events: &[MidiEvent], dir: &Path, prefix: &str) -> Result<PathBuf, FileError> {
        fs::create_dir_all(dir).map_err(|source| FileError::Write {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = unique_path(dir, prefix);
        let part = part_path(&path);
        let written = File::create(&part).and_then(|file| {
            let mut out = BufWriter::new(file);
            self.encoder.write(&mut out, events)?;
            let file = out.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()
        });
        if let Err(source) = written.and_then(|()| fs::rename(&part, &path)) {
            let _ = fs::remove_file(&part);
            return Err(FileError::Write { path, source });
        }

        info!(path = %path.display(), events = events.len(), "MIDI file written");
        Ok(path)
    }

    /// Write to the auto-save directory
    pub fn write_auto(&self, events: &[MidiEvent]) -> Result<PathBuf, FileError> {
        self.write(events, &self.output_dir, SaveKind::Auto.prefix())
    }

    /// Write to the manual-save directory
    pub fn write_manual(&self, events: &[MidiEvent]) -> Result<PathBuf, FileError> {
        self.write(events, &self.manual_dir, SaveKind::Manual.prefix())
    }

    /// Copy `source` into the manual directory under a fresh manual name
    pub fn copy_to_manual(&self, source: &Path) -> Result<PathBuf, FileError> {
        let copy_error = |to: &Path, err: io::Error| FileError::Copy {
            from: source.to_path_buf(),
            to: to.to_path_buf(),
            source: err,
        };

        fs::create_dir_all(&self.manual_dir).map_err(|e| copy_error(&self.manual_dir, e))?;

        let target = unique_path(&self.manual_dir, MANUAL_PREFIX);
        let part = part_path(&target);
        if let Err(err) = fs::copy(source, &part).and_then(|_| fs::rename(&part, &target)) {
            let _ = fs::remove_file(&part);
            return Err(copy_error(&target, err));
        }

        info!(from = %source.display(), to = %target.display(), "Copied to manual saves");
        Ok(target)
    }

    /// Newest auto-save in the output directory, by creation time
    pub fn latest_auto_save(&self) -> Result<Option<SavedFileRecord>, FileError> {
        let latest = self
            .scan(&self.output_dir)?
            .into_iter()
            .filter(|record| record.kind == SaveKind::Auto)
            .max_by(|a, b| a.created.cmp(&b.created).then_with(|| a.path.cmp(&b.path)));
        Ok(latest)
    }

    /// Copy the newest auto-save into the manual directory.
    ///
    /// Returns `Ok(None)` when no auto-save exists yet.
    pub fn copy_latest_auto_save_to_manual(&self) -> Result<Option<PathBuf>, FileError> {
        match self.latest_auto_save()? {
            Some(latest) => self.copy_to_manual(&latest.path).map(Some),
            None => {
                debug!(dir = %self.output_dir.display(), "No auto-save to copy");
                Ok(None)
            }
        }
    }

    /// Every saved file in `dir`, sorted by name
    pub fn list_saved(&self, dir: &Path) -> Result<Vec<PathBuf>, FileError> {
        let mut paths: Vec<PathBuf> = self.scan(dir)?.into_iter().map(|r| r.path).collect();
        paths.sort();
        Ok(paths)
    }

    fn scan(&self, dir: &Path) -> Result<Vec<SavedFileRecord>, FileError> {
        let scan_error = |source| FileError::Scan {
            path: dir.to_path_buf(),
            source,
        };

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(scan_error(e)),
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(scan_error)?;
            let Some(kind) = entry.file_name().to_str().and_then(SaveKind::from_file_name) else {
                continue;
            };
            let metadata = match entry.metadata() {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "Skipping unreadable file");
                    continue;
                }
            };
            let created = metadata
                .created()
                .or_else(|_| metadata.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            records.push(SavedFileRecord {
                path: entry.path(),
                kind,
                created,
            });
        }
        Ok(records)
    }
}

/// `{prefix}{now}.mid` in `dir`, suffixed `_N` if taken
fn unique_path(dir: &Path, prefix: &str) -> PathBuf {
    let stamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
    let base = format!("{prefix}{stamp}");

    let mut path = dir.join(format!("{base}{EXTENSION}"));
    let mut n = 1;
    while path.exists() || part_path(&path).exists() {
        path = dir.join(format!("{base}_{n}{EXTENSION}"));
        n += 1;
    }
    path
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(PART_EXTENSION);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use midly::num::u7;
    use midly::{MetaMessage, MidiMessage, Smf, TrackEventKind};
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn writer() -> (TempDir, FileWriter) {
        let dir = TempDir::new().unwrap();
        let writer = FileWriter::new(dir.path().join("auto"), dir.path().join("manual"));
        (dir, writer)
    }

    fn events() -> Vec<MidiEvent> {
        vec![
            MidiEvent::note_on(0, 60, 100).with_delta(250),
            MidiEvent::note_on(0, 60, 0).with_delta(480),
            MidiEvent::control_change(0, 64, 127).with_delta(20),
        ]
    }

    #[test]
    fn test_saved_file_names() {
        assert_eq!(SaveKind::from_file_name("20260101120000.mid"), Some(SaveKind::Auto));
        assert_eq!(SaveKind::from_file_name("20260101120000_3.mid"), Some(SaveKind::Auto));
        assert_eq!(
            SaveKind::from_file_name("manual_save_20260101120000.mid"),
            Some(SaveKind::Manual)
        );
        assert_eq!(SaveKind::from_file_name("2026010112000.mid"), None);
        assert_eq!(SaveKind::from_file_name("20260101120000.mid.part"), None);
        assert_eq!(SaveKind::from_file_name("20260101120000_.mid"), None);
        assert_eq!(SaveKind::from_file_name("song.mid"), None);
    }

    #[test]
    fn test_write_auto_creates_directory_and_file() {
        let (_dir, writer) = writer();
        let path = writer.write_auto(&events()).unwrap();

        assert_eq!(path.parent(), Some(writer.output_dir()));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(SaveKind::from_file_name(name), Some(SaveKind::Auto));
        assert!(!part_path(&path).exists());
    }

    #[test]
    fn test_written_file_parses() {
        let (_dir, writer) = writer();
        let path = writer.write_auto(&events()).unwrap();
        let bytes = fs::read(&path).unwrap();
        let smf = Smf::parse(&bytes).unwrap();

        assert_eq!(smf.tracks.len(), 1);
        let track = &smf.tracks[0];
        assert!(matches!(track[0].kind, TrackEventKind::Meta(MetaMessage::Tempo(t)) if t.as_int() == 500_000));

        let deltas: Vec<u32> = track.iter().map(|e| e.delta.as_int()).collect();
        assert_eq!(deltas, vec![0, 0, 480, 20, 0]);

        match track[2].kind {
            TrackEventKind::Midi { channel, message } => {
                assert_eq!(channel.as_int(), 0);
                assert_eq!(message, MidiMessage::NoteOn { key: u7::from(60u8), vel: u7::from(0u8) });
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(track[4].kind, TrackEventKind::Meta(MetaMessage::EndOfTrack)));
    }

    #[test]
    fn test_write_manual_prefix() {
        let (_dir, writer) = writer();
        let path = writer.write_manual(&events()).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(MANUAL_PREFIX));
        assert_eq!(path.parent(), Some(writer.manual_dir()));
    }

    #[test]
    fn test_same_second_collision_gets_suffix() {
        let (_dir, writer) = writer();
        let first = writer.write_auto(&events()).unwrap();
        let second = writer.write_auto(&events()).unwrap();
        assert_ne!(first, second);
        assert_eq!(writer.list_saved(writer.output_dir()).unwrap().len(), 2);
    }

    #[test]
    fn test_write_failure_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocked");
        fs::write(&blocker, b"not a directory").unwrap();
        let writer = FileWriter::new(&blocker, dir.path());

        let err = writer.write_auto(&events()).unwrap_err();
        assert!(matches!(err, FileError::Write { .. }));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_copy_latest_without_auto_saves() {
        let (_dir, writer) = writer();
        assert_eq!(writer.copy_latest_auto_save_to_manual().unwrap(), None);
        assert!(writer.list_saved(writer.manual_dir()).unwrap().is_empty());
    }

    #[test]
    fn test_copy_latest_picks_newest_auto_save() {
        let (_dir, writer) = writer();
        writer.write_auto(&events()).unwrap();
        thread::sleep(Duration::from_millis(20));
        let newest = writer.write_auto(&events()[..1]).unwrap();

        let copied = writer.copy_latest_auto_save_to_manual().unwrap().unwrap();
        assert_eq!(copied.parent(), Some(writer.manual_dir()));
        assert_eq!(fs::read(&copied).unwrap(), fs::read(&newest).unwrap());
        assert_eq!(writer.list_saved(writer.output_dir()).unwrap().len(), 2);
    }

    #[test]
    fn test_latest_ignores_manual_saves_in_shared_directory() {
        let dir = TempDir::new().unwrap();
        let writer = FileWriter::new(dir.path(), dir.path());
        let auto = writer.write_auto(&events()).unwrap();
        thread::sleep(Duration::from_millis(20));
        writer.write_manual(&events()[..1]).unwrap();

        assert_eq!(writer.latest_auto_save().unwrap().unwrap().path, auto);
    }

    #[test]
    fn test_list_saved_sorted_and_filtered() {
        let (_dir, writer) = writer();
        let out = writer.output_dir();
        fs::create_dir_all(out).unwrap();
        fs::write(out.join("20260102000000.mid"), b"").unwrap();
        fs::write(out.join("20260101000000.mid"), b"").unwrap();
        fs::write(out.join("20260101000000_1.mid"), b"").unwrap();
        fs::write(out.join("notes.txt"), b"").unwrap();
        fs::write(out.join("20260103000000.mid.part"), b"").unwrap();

        let names: Vec<String> = writer
            .list_saved(out)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["20260101000000.mid", "20260101000000_1.mid", "20260102000000.mid"]
        );
    }

    #[test]
    fn test_list_missing_directory_is_empty() {
        let (dir, writer) = writer();
        assert!(writer.list_saved(&dir.path().join("nope")).unwrap().is_empty());
    }
}
