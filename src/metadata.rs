//! Dataset metadata sent with every chunk, and its parsing at the boundary.
//!
//! Whatever the source (command-line flags or a JSON manifest), metadata is
//! normalised here once: authors become a non-empty ordered list, enums are
//! parsed, dates are range-checked. Nothing downstream re-validates.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use thiserror::Error;

use crate::types::{DataAccess, License, Platform};

const MIN_YEAR: u16 = 1980;
const MAX_YEAR: u16 = 2099;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Failed to read metadata file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid metadata file {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("At least one author is required")]
    NoAuthors,

    #[error("Invalid acquisition date '{0}' (expected YYYY, YYYY-MM or YYYY-MM-DD, year 1980-2099)")]
    InvalidDate(String),

    #[error("Metadata for '{filename}': {message}")]
    InvalidEntry { filename: String, message: String },
}

/// Acquisition date with optional month and day precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionDate {
    pub year: u16,
    pub month: Option<u8>,
    pub day: Option<u8>,
}

impl FromStr for AcquisitionDate {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || MetadataError::InvalidDate(s.to_string());
        let parts: Vec<&str> = s.split('-').collect();

        let date = match parts.as_slice() {
            [y] => AcquisitionDate {
                year: y.parse().map_err(|_| invalid())?,
                month: None,
                day: None,
            },
            [y, m] => {
                let month: u8 = m.parse().map_err(|_| invalid())?;
                if !(1..=12).contains(&month) {
                    return Err(invalid());
                }
                AcquisitionDate {
                    year: y.parse().map_err(|_| invalid())?,
                    month: Some(month),
                    day: None,
                }
            }
            [_, _, _] => {
                let d = NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| invalid())?;
                AcquisitionDate {
                    year: u16::try_from(d.year()).map_err(|_| invalid())?,
                    month: Some(d.month() as u8),
                    day: Some(d.day() as u8),
                }
            }
            _ => return Err(invalid()),
        };

        if !(MIN_YEAR..=MAX_YEAR).contains(&date.year) {
            return Err(invalid());
        }
        Ok(date)
    }
}

impl fmt::Display for AcquisitionDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.year)?;
        if let Some(m) = self.month {
            write!(f, "-{:02}", m)?;
            if let Some(d) = self.day {
                write!(f, "-{:02}", d)?;
            }
        }
        Ok(())
    }
}

/// Either `"A; B"` or `["A", "B"]` in a manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AuthorsField {
    Joined(String),
    List(Vec<String>),
}

impl AuthorsField {
    pub fn into_list(self) -> Result<Vec<String>, MetadataError> {
        let raw = match self {
            AuthorsField::Joined(s) => s.split(';').map(str::to_string).collect(),
            AuthorsField::List(v) => v,
        };
        let authors: Vec<String> = raw
            .into_iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        if authors.is_empty() {
            return Err(MetadataError::NoAuthors);
        }
        Ok(authors)
    }
}

/// Parse a `"A; B"` author string into a canonical list.
pub fn parse_authors(joined: &str) -> Result<Vec<String>, MetadataError> {
    AuthorsField::Joined(joined.to_string()).into_list()
}

/// Per-dataset metadata, identical for every chunk of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetMetadata {
    pub license: License,
    pub platform: Platform,
    pub authors: Vec<String>,
    pub data_access: DataAccess,
    pub acquisition_year: Option<u16>,
    pub acquisition_month: Option<u8>,
    pub acquisition_day: Option<u8>,
    pub additional_information: Option<String>,
    pub citation_doi: Option<String>,
}

impl DatasetMetadata {
    pub fn new(license: License, platform: Platform, authors: Vec<String>) -> Self {
        Self {
            license,
            platform,
            authors,
            data_access: DataAccess::default(),
            acquisition_year: None,
            acquisition_month: None,
            acquisition_day: None,
            additional_information: None,
            citation_doi: None,
        }
    }

    /// Fill year/month/day that are still unset from `date`.
    pub fn fill_date(&mut self, date: &AcquisitionDate) {
        if self.acquisition_year.is_none() {
            self.acquisition_year = Some(date.year);
        }
        if self.acquisition_month.is_none() {
            self.acquisition_month = date.month;
        }
        if self.acquisition_day.is_none() {
            self.acquisition_day = date.day;
        }
    }

    fn check_ranges(&self) -> Result<(), String> {
        if let Some(y) = self.acquisition_year {
            if !(MIN_YEAR..=MAX_YEAR).contains(&y) {
                return Err(format!("acquisition_year {} out of range", y));
            }
        }
        if let Some(m) = self.acquisition_month {
            if !(1..=12).contains(&m) {
                return Err(format!("acquisition_month {} out of range", m));
            }
        }
        if let Some(d) = self.acquisition_day {
            if !(1..=31).contains(&d) {
                return Err(format!("acquisition_day {} out of range", d));
            }
        }
        Ok(())
    }
}

/// Metadata bound to one filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataEntry {
    pub filename: String,
    pub metadata: DatasetMetadata,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    filename: String,
    license: License,
    platform: Platform,
    authors: AuthorsField,
    #[serde(default)]
    data_access: Option<DataAccess>,
    #[serde(default)]
    acquisition_year: Option<u16>,
    #[serde(default)]
    acquisition_month: Option<u8>,
    #[serde(default)]
    acquisition_day: Option<u8>,
    #[serde(default)]
    acquisition_date: Option<String>,
    #[serde(default)]
    additional_information: Option<String>,
    #[serde(default)]
    citation_doi: Option<String>,
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl TryFrom<RawEntry> for MetadataEntry {
    type Error = MetadataError;

    fn try_from(raw: RawEntry) -> Result<Self, Self::Error> {
        let filename = raw.filename.trim().to_string();
        let entry_err = |message: String| MetadataError::InvalidEntry {
            filename: filename.clone(),
            message,
        };

        let authors = raw
            .authors
            .into_list()
            .map_err(|e| entry_err(e.to_string()))?;
        let mut metadata = DatasetMetadata {
            license: raw.license,
            platform: raw.platform,
            authors,
            data_access: raw.data_access.unwrap_or_default(),
            acquisition_year: raw.acquisition_year,
            acquisition_month: raw.acquisition_month,
            acquisition_day: raw.acquisition_day,
            additional_information: non_blank(raw.additional_information),
            citation_doi: non_blank(raw.citation_doi),
        };
        if let Some(date) = non_blank(raw.acquisition_date) {
            let date: AcquisitionDate = date
                .parse()
                .map_err(|e: MetadataError| entry_err(e.to_string()))?;
            metadata.fill_date(&date);
        }
        metadata.check_ranges().map_err(entry_err)?;

        Ok(MetadataEntry { filename, metadata })
    }
}

/// Parse a JSON manifest: an array of per-file entries.
pub fn parse_manifest(json: &str, path: &Path) -> Result<Vec<MetadataEntry>, MetadataError> {
    let raw: Vec<RawEntry> = serde_json::from_str(json).map_err(|source| MetadataError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    raw.into_iter().map(MetadataEntry::try_from).collect()
}

pub fn load_manifest(path: &Path) -> Result<Vec<MetadataEntry>, MetadataError> {
    let json = std::fs::read_to_string(path).map_err(|source| MetadataError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_manifest(&json, path)
}
