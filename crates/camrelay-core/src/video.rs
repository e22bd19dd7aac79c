//! Recording metadata shared by the agent and the relay.
//!
//! Recordings are named after the minute they start, `YYYYmmdd_HH:MM.mp4`,
//! in the camera's local time. [`parse_recording_timestamp`] recovers that
//! timestamp; [`VideoFilter`] and [`paginate`] implement the listing rules
//! used by `LIST_VIDEOS`.

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Extension every listed recording carries.
pub const RECORDING_EXTENSION: &str = "mp4";

/// Filename timestamp layout, without the extension.
pub const RECORDING_NAME_FORMAT: &str = "%Y%m%d_%H:%M";

/// Layout of the `date` listing filter.
pub const DATE_FILTER_FORMAT: &str = "%Y%m%d";

/// Page size applied when a listing does not name one.
pub const DEFAULT_PAGE_SIZE: u32 = 60;

/// One recording on an edge device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// File name inside the camera's recording directory.
    pub filename: String,
    /// Size in bytes.
    pub size: u64,
    /// Start of the recording (local time, ISO 8601 without offset).
    pub timestamp: NaiveDateTime,
    /// Camera that produced it.
    pub camera: String,
}

/// Parses the start time encoded in a recording filename.
///
/// Returns `None` for anything that is not `YYYYmmdd_HH:MM.mp4`.
pub fn parse_recording_timestamp(filename: &str) -> Option<NaiveDateTime> {
    let stem = filename.strip_suffix(&format!(".{RECORDING_EXTENSION}"))?;
    NaiveDateTime::parse_from_str(stem, RECORDING_NAME_FORMAT).ok()
}

/// Date/hour restriction for a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoFilter {
    /// Only recordings from this day (`YYYYmmdd`).
    pub date: Option<String>,
    /// Only recordings starting in this hour (0-23).
    pub hour: Option<u8>,
}

impl VideoFilter {
    /// Creates an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set the date filter.
    pub fn date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    /// Builder: set the hour filter.
    pub fn hour(mut self, hour: u8) -> Self {
        self.hour = Some(hour);
        self
    }

    /// True when neither date nor hour is constrained.
    pub fn is_empty(&self) -> bool {
        self.date.is_none() && self.hour.is_none()
    }

    /// Checks a timestamp recovered from a filename.
    pub fn matches(&self, timestamp: &NaiveDateTime) -> bool {
        if let Some(ref date) = self.date
            && timestamp.format(DATE_FILTER_FORMAT).to_string() != *date
        {
            return false;
        }
        if let Some(hour) = self.hour
            && timestamp.hour() != u32::from(hour)
        {
            return false;
        }
        true
    }
}

/// One page of a larger listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Number of items across all pages.
    pub total: usize,
    /// 1-based page number that was requested.
    pub page: u32,
    /// Page size that was applied.
    pub page_size: u32,
    /// `ceil(total / page_size)`.
    pub total_pages: u32,
}

/// Cuts a 1-based page out of `items`.
///
/// A page past the end is empty rather than an error; `page` 0 is treated
/// as page 1 and `page_size` 0 as [`DEFAULT_PAGE_SIZE`].
pub fn paginate<T>(items: Vec<T>, page: u32, page_size: u32) -> Page<T> {
    let page = page.max(1);
    let page_size = if page_size == 0 {
        DEFAULT_PAGE_SIZE
    } else {
        page_size
    };
    let total = items.len();
    let total_pages = total.div_ceil(page_size as usize) as u32;

    let start = (page as usize - 1).saturating_mul(page_size as usize);
    let items = items
        .into_iter()
        .skip(start)
        .take(page_size as usize)
        .collect();

    Page {
        items,
        total,
        page,
        page_size,
        total_pages,
    }
}
