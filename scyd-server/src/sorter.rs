//! Moves finished downloads into an `Artist/Album` library layout.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use lofty::file::TaggedFileExt;
use lofty::tag::Accessor;
use scyd_core::{DownloadSorter, SortReport};
use tracing::{debug, info, warn};

const UNKNOWN_ARTIST: &str = "Unknown Artist";
const FORBIDDEN: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

#[derive(Debug, Clone)]
pub struct LibrarySorter {
    download_dir: PathBuf,
    output_dir: PathBuf,
}

struct Tags {
    artist: Option<String>,
    album: Option<String>,
}

impl LibrarySorter {
    pub fn new(download_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    /// Sort every tagged audio file directly inside the download directory.
    ///
    /// Subdirectories and files without readable tags are left in place.
    /// Files are copied then removed so the output may live on another
    /// filesystem; a failed removal still counts as moved.
    pub fn sort_blocking(&self) -> anyhow::Result<SortReport> {
        let entries = std::fs::read_dir(&self.download_dir).with_context(|| {
            format!("failed to read download directory {}", self.download_dir.display())
        })?;

        let mut report = SortReport::default();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "failed to read directory entry");
                    continue;
                }
            };
            let path = entry.path();
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(true) {
                continue;
            }

            let tags = match read_tags(&path) {
                Some(tags) => tags,
                None => continue,
            };
            let target_dir = self.destination_dir(&tags);

            match move_into(&path, &target_dir) {
                Ok(moved) => report.moved_files.push(moved.display().to_string()),
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "failed to move file");
                    report.files_with_errors.push(path.display().to_string());
                }
            }
        }
        Ok(report)
    }

    fn destination_dir(&self, tags: &Tags) -> PathBuf {
        let artist = tags
            .artist
            .as_deref()
            .map(sanitize_path_component)
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| UNKNOWN_ARTIST.to_owned());
        let album = tags
            .album
            .as_deref()
            .map(sanitize_path_component)
            .unwrap_or_default();

        let dir = self.output_dir.join(artist);
        if album.is_empty() { dir } else { dir.join(album) }
    }
}

#[async_trait]
impl DownloadSorter for LibrarySorter {
    async fn sort(&self) -> anyhow::Result<SortReport> {
        let sorter = self.clone();
        let report = tokio::task::spawn_blocking(move || sorter.sort_blocking())
            .await
            .context("sort task panicked")??;
        info!(
            moved = report.moved_files.len(),
            failed = report.files_with_errors.len(),
            "download directory sorted"
        );
        Ok(report)
    }
}

fn read_tags(path: &Path) -> Option<Tags> {
    let tagged = match lofty::read_from_path(path) {
        Ok(tagged) => tagged,
        Err(e) => {
            debug!(file = %path.display(), error = %e, "skipping file without readable tags");
            return None;
        }
    };
    let tag = tagged.primary_tag().or_else(|| tagged.first_tag())?;
    Some(Tags {
        artist: tag.artist().map(|a| a.into_owned()),
        album: tag.album().map(|a| a.into_owned()),
    })
}

fn move_into(source: &Path, target_dir: &Path) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(target_dir)?;
    let file_name = source
        .file_name()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no file name"))?;
    let target = target_dir.join(file_name);
    std::fs::copy(source, &target)?;
    if let Err(e) = std::fs::remove_file(source) {
        warn!(file = %source.display(), error = %e, "copied file but failed to remove original");
    }
    Ok(target)
}

/// Replace characters Windows forbids in file names and trim leading or
/// trailing spaces and dots.
pub fn sanitize_path_component(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if FORBIDDEN.contains(&c) { '_' } else { c })
        .collect();
    replaced.trim_matches(|c: char| c == ' ' || c == '.').to_owned()
}
