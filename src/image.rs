//! What is being searched for: the picture, the backend selector, and the
//! composite key that identifies one unit of dedup and cache work.

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An immutable reference to a picture under search.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    fingerprint: String,
    url: String,
}

impl ImageRef {
    /// Fingerprint the image by its content.
    pub fn from_bytes(bytes: &[u8], url: impl Into<String>) -> Self {
        Self {
            fingerprint: hex_digest(bytes),
            url: url.into(),
        }
    }

    /// Fingerprint the image by its URL, for when the bytes were never fetched.
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            fingerprint: hex_digest(url.as_bytes()),
            url,
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn hex_digest(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Which backends a request wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Selector {
    /// Whole similarity index, then cascade as configured.
    #[default]
    All,
    /// The primary artwork site's index.
    Pixiv,
    Danbooru,
    Doujin,
    /// Animation-only matching. Runs alone.
    Anime,
    /// Force the feature-matching backend.
    Ascii2d,
    /// Force the perceptual-hash backend.
    Iqdb,
}

impl Selector {
    pub const ALL: [Selector; 7] = [
        Selector::All,
        Selector::Pixiv,
        Selector::Danbooru,
        Selector::Doujin,
        Selector::Anime,
        Selector::Ascii2d,
        Selector::Iqdb,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Selector::All => "all",
            Selector::Pixiv => "pixiv",
            Selector::Danbooru => "danbooru",
            Selector::Doujin => "doujin",
            Selector::Anime => "anime",
            Selector::Ascii2d => "ascii2d",
            Selector::Iqdb => "iqdb",
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Selector {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        match Selector::ALL.iter().find(|sel| sel.as_str() == wanted) {
            Some(sel) => Ok(*sel),
            None => bail!("unknown selector: {s}"),
        }
    }
}

/// One unit of dedup and cache work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchKey {
    pub fingerprint: String,
    pub selector: Selector,
}

impl SearchKey {
    pub fn new(image: &ImageRef, selector: Selector) -> Self {
        Self {
            fingerprint: image.fingerprint().to_string(),
            selector,
        }
    }
}

impl fmt::Display for SearchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.fingerprint, self.selector)
    }
}
