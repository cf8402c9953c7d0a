use serde::{Deserialize, Serialize};

/// One piece of a reply. A finished search is an ordered list of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Fragment {
    Text(String),
    /// Remote image, by URL.
    Image(String),
}

impl Fragment {
    pub fn text(s: impl Into<String>) -> Self {
        Fragment::Text(s.into())
    }

    pub fn image(url: impl Into<String>) -> Self {
        Fragment::Image(url.into())
    }
}
