use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Dataset license accepted by the ingestion API.
///
/// Parsing is forgiving about case, spaces and dashes (`cc-by-sa`, `CCBYSA`
/// and `CC BY-SA` are the same license); the wire form is always `as_str()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum License {
    CcBy,
    CcBySa,
    CcByNcSa,
    CcByNc,
    Mit,
}

impl License {
    pub const ALL: [License; 5] = [
        License::CcBy,
        License::CcBySa,
        License::CcByNcSa,
        License::CcByNc,
        License::Mit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            License::CcBy => "CC BY",
            License::CcBySa => "CC BY-SA",
            License::CcByNcSa => "CC BY-NC-SA",
            License::CcByNc => "CC BY-NC",
            License::Mit => "MIT",
        }
    }
}

fn squash(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .flat_map(char::to_uppercase)
        .collect()
}

impl FromStr for License {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = squash(s);
        License::ALL
            .into_iter()
            .find(|l| squash(l.as_str()) == wanted)
            .ok_or_else(|| {
                let valid: Vec<&str> = License::ALL.iter().map(|l| l.as_str()).collect();
                format!("unknown license '{}' (expected one of: {})", s.trim(), valid.join(", "))
            })
    }
}

impl TryFrom<String> for License {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for License {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capture platform. Only aerial platforms are accepted by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum Platform {
    Drone,
    Airborne,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Drone => "drone",
            Platform::Airborne => "airborne",
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "drone" => Ok(Platform::Drone),
            "airborne" => Ok(Platform::Airborne),
            other => Err(format!(
                "unknown platform '{}' (expected drone or airborne)",
                other
            )),
        }
    }
}

impl TryFrom<String> for Platform {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum DataAccess {
    #[default]
    Public,
    Private,
    ViewOnly,
}

impl DataAccess {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataAccess::Public => "public",
            DataAccess::Private => "private",
            DataAccess::ViewOnly => "viewonly",
        }
    }
}

impl FromStr for DataAccess {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "public" => Ok(DataAccess::Public),
            "private" => Ok(DataAccess::Private),
            "viewonly" | "view-only" | "view_only" => Ok(DataAccess::ViewOnly),
            other => Err(format!(
                "unknown data access '{}' (expected public, private or viewonly)",
                other
            )),
        }
    }
}

impl TryFrom<String> for DataAccess {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Kind of upload, derived from the file extension. Decides which
/// processing stages the server runs after the upload completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadType {
    Geotiff,
    RawImagesZip,
}

impl UploadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadType::Geotiff => "geotiff",
            UploadType::RawImagesZip => "raw_images_zip",
        }
    }

    /// Human-readable kind used in discovery output.
    pub fn label(&self) -> &'static str {
        match self {
            UploadType::Geotiff => "GeoTIFF",
            UploadType::RawImagesZip => "ZIP",
        }
    }
}
