//! Reverse-image-search backends.
//!
//! Every backend answers one question: where does this picture come from?
//! Transport trouble is an `Err(BackendError)` (and may be retried);
//! "no match" and other business outcomes are an `Ok(ProviderResult)` with
//! `success: false`.

pub mod ascii2d;
pub mod iqdb;
pub mod mock;
pub mod saucenao;
pub mod tracemoe;

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::{Captures, Regex};
use reqwest::Response;

use crate::consts::{HTTP_TIMEOUT, USER_AGENT};
use crate::error::BackendError;
use crate::image::{ImageRef, Selector};
use crate::message::Fragment;

/// Outcome of one backend call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderResult {
    pub success: bool,
    /// Found something, but the best match is weak.
    pub low_accuracy: bool,
    /// The backend refused because our allowance is spent.
    pub quota_exceeded: bool,
    pub messages: Vec<Fragment>,
    pub warning: Option<String>,
}

impl ProviderResult {
    pub fn found(messages: Vec<Fragment>) -> Self {
        Self {
            success: true,
            messages,
            ..Self::default()
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            messages: vec![Fragment::text(message)],
            ..Self::default()
        }
    }

    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self {
            quota_exceeded: true,
            messages: vec![Fragment::text(message)],
            ..Self::default()
        }
    }

    /// Mark the match as weak and attach a warning.
    pub fn with_low_accuracy(mut self, warning: impl Into<String>) -> Self {
        self.low_accuracy = true;
        self.warning = Some(warning.into());
        self
    }
}

/// A reverse-image-search service.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;
    async fn search(
        &self,
        image: &ImageRef,
        selector: Selector,
    ) -> Result<ProviderResult, BackendError>;
}

pub(crate) fn http_client() -> Result<reqwest::Client, BackendError> {
    let client = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()?;
    Ok(client)
}

/// Turn a non-2xx response into [`BackendError::Status`], keeping the body.
pub(crate) async fn check_status(resp: Response) -> Result<Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(BackendError::Status { status, body })
}

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").unwrap());

/// Visible text of an HTML snippet: tags dropped, entities decoded.
pub(crate) fn html_text(s: &str) -> String {
    decode_entities(TAG.replace_all(s, "").trim())
}

/// Decode named and numeric character references in one pass. Unknown
/// names are left as written.
pub(crate) fn decode_entities(s: &str) -> String {
    ENTITY
        .replace_all(s, |caps: &Captures| {
            decode_entity(&caps[1]).map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let code = match entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => entity.strip_prefix('#')?.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// `mm:ss` or `h:mm:ss`.
pub(crate) fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn found_is_success() {
        let r = ProviderResult::found(vec![Fragment::text("x")]);
        assert!(r.success);
        assert!(!r.low_accuracy && !r.quota_exceeded);
    }

    #[test]
    fn low_accuracy_keeps_success_and_warns() {
        let r = ProviderResult::found(vec![]).with_low_accuracy("weak");
        assert!(r.success && r.low_accuracy);
        assert_eq!(r.warning.as_deref(), Some("weak"));
    }

    #[test]
    fn quota_exceeded_is_a_failure() {
        let r = ProviderResult::quota_exceeded("limit");
        assert!(!r.success && r.quota_exceeded);
    }

    #[test]
    fn html_text_strips_tags_and_decodes() {
        assert_eq!(
            html_text(" <b>Rock &amp; Roll</b> &lt;3 &#39;live&#x27;<br/> "),
            "Rock & Roll <3 'live'"
        );
    }

    #[test]
    fn entities_decode_once() {
        assert_eq!(decode_entities("&amp;lt;"), "&lt;");
        assert_eq!(decode_entities("a&nbsp;b"), "a b");
        assert_eq!(decode_entities("&bogus; &#xZZ;"), "&bogus; &#xZZ;");
    }

    #[test]
    fn timestamps() {
        assert_eq!(format_timestamp(0.0), "00:00");
        assert_eq!(format_timestamp(83.9), "01:23");
        assert_eq!(format_timestamp(3725.0), "1:02:05");
    }
}
