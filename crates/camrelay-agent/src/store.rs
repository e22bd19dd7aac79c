//! Recordings on local disk.
//!
//! Layout: `<root>/<camera>/merged/<YYYYmmdd_HH:MM>.mp4`. Files whose name
//! does not carry a timestamp are listed with their modification time, but
//! only when no date or hour filter is given.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;
use camrelay_core::video::RECORDING_EXTENSION;
use camrelay_core::{
    DEFAULT_PAGE_SIZE, Page, VideoFilter, VideoInfo, paginate, parse_recording_timestamp,
};
use camrelay_protocol::{ErrorCode, FileRange, ListVideosQuery, ReadFileRequest};
use chrono::{DateTime, Local, NaiveDateTime};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

/// Sub-directory of each camera that holds finished recordings.
const MERGED_DIR: &str = "merged";

/// Errors from the recording store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A camera or file name that could escape the recordings root.
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// The recording does not exist.
    #[error("File not found: {0}")]
    NotFound(String),

    /// The requested bounds do not fit the file.
    #[error("Invalid range for a {size} byte file")]
    InvalidRange {
        start: Option<u64>,
        end: Option<u64>,
        size: u64,
    },

    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    /// The wire error code for a failed read.
    pub fn read_code(&self) -> ErrorCode {
        match self {
            Self::InvalidName(_) => ErrorCode::InvalidRequest,
            Self::NotFound(_) => ErrorCode::FileNotFound,
            Self::InvalidRange { .. } => ErrorCode::InvalidRange,
            Self::Io(_) => ErrorCode::ReadFileFailed,
        }
    }

    /// The wire error code for a failed listing.
    pub fn list_code(&self) -> ErrorCode {
        match self {
            Self::InvalidName(_) => ErrorCode::InvalidRequest,
            _ => ErrorCode::ListVideosFailed,
        }
    }
}

/// Read access to the recordings root.
#[derive(Debug, Clone)]
pub struct RecordingStore {
    root: PathBuf,
}

impl RecordingStore {
    /// Creates a store over `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the recordings root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names of the camera directories under the root, sorted.
    ///
    /// A missing root yields an empty list.
    pub async fn discover_cameras(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(root = %self.root.display(), "Recordings directory does not exist");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut cameras = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir()
                && let Some(name) = entry.file_name().to_str()
                && !name.starts_with('.')
            {
                cameras.push(name.to_string());
            }
        }
        cameras.sort();
        Ok(cameras)
    }

    /// Lists one page of a camera's recordings, newest first.
    pub async fn list(&self, query: &ListVideosQuery) -> Result<Page<VideoInfo>, StoreError> {
        let dir = self.camera_dir(&query.camera)?;
        let filter = query.filter();
        let mut videos = self.scan(&dir, &query.camera, &filter).await?;

        videos.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.filename.cmp(&a.filename))
        });

        Ok(paginate(
            videos,
            query.page.unwrap_or(1),
            query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        ))
    }

    async fn scan(
        &self,
        dir: &Path,
        camera: &str,
        filter: &VideoFilter,
    ) -> Result<Vec<VideoInfo>, StoreError> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(camera, dir = %dir.display(), "No recordings directory");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut videos = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if Path::new(&filename).extension().and_then(|e| e.to_str())
                != Some(RECORDING_EXTENSION)
            {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    warn!(file = %filename, error = %e, "Skipping unreadable recording");
                    continue;
                }
            };

            let timestamp = match parse_recording_timestamp(&filename) {
                Some(timestamp) if filter.matches(&timestamp) => timestamp,
                Some(_) => continue,
                None if filter.is_empty() => match metadata.modified() {
                    Ok(modified) => local_time(modified),
                    Err(_) => continue,
                },
                None => continue,
            };

            videos.push(VideoInfo {
                filename,
                size: metadata.len(),
                timestamp,
                camera: camera.to_string(),
            });
        }
        Ok(videos)
    }

    /// Opens a recording positioned at the start of the requested range.
    pub async fn open(&self, request: &ReadFileRequest) -> Result<RangeReader, StoreError> {
        let path = self.recording_path(&request.camera, &request.filename)?;

        let mut file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(request.filename.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(StoreError::NotFound(request.filename.clone()));
        }

        let size = metadata.len();
        let range = FileRange::resolve(size, request.start, request.end).ok_or(
            StoreError::InvalidRange {
                start: request.start,
                end: request.end,
                size,
            },
        )?;

        file.seek(SeekFrom::Start(range.start)).await?;
        Ok(RangeReader {
            file,
            range,
            remaining: range.length,
        })
    }

    fn camera_dir(&self, camera: &str) -> Result<PathBuf, StoreError> {
        check_name(camera)?;
        Ok(self.root.join(camera).join(MERGED_DIR))
    }

    fn recording_path(&self, camera: &str, filename: &str) -> Result<PathBuf, StoreError> {
        check_name(filename)?;
        Ok(self.camera_dir(camera)?.join(filename))
    }
}

/// A single path component: no separators, not `.` or `..`, not empty.
fn check_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
    {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn local_time(time: SystemTime) -> NaiveDateTime {
    DateTime::<Local>::from(time).naive_local()
}

/// Sequential reader over one resolved byte range.
#[derive(Debug)]
pub struct RangeReader {
    file: File,
    range: FileRange,
    remaining: u64,
}

impl RangeReader {
    /// The resolved range this reader covers.
    pub fn range(&self) -> FileRange {
        self.range
    }

    /// Reads the next piece of at most `max` bytes, `None` once the range is
    /// exhausted.
    ///
    /// A file that shrinks while being read fails with `UnexpectedEof`.
    pub async fn next_chunk(&mut self, max: usize) -> io::Result<Option<Bytes>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let want = self.remaining.min(max.max(1) as u64) as usize;
        let mut buffer = vec![0u8; want];
        self.file.read_exact(&mut buffer).await?;
        self.remaining -= want as u64;
        Ok(Some(Bytes::from(buffer)))
    }
}
