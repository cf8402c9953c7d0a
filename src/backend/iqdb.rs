use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::{Backend, ProviderResult, check_status, decode_entities, http_client};
use crate::error::BackendError;
use crate::image::{ImageRef, Selector};
use crate::message::Fragment;

const API_URL: &str = "https://iqdb.org/";
const BASE_URL: &str = "https://iqdb.org";

static HREF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"href="([^"]+)""#).unwrap());
static IMG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"<img[^>]*src=['"]([^'"]+)['"]"#).unwrap());
static SIMILARITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)% similarity").unwrap());

/// Perceptual-hash search on iqdb's multi-booru index.
pub struct Iqdb {
    client: reqwest::Client,
    min_similarity: f64,
}

impl Iqdb {
    pub fn new(min_similarity: f64) -> Result<Self, BackendError> {
        Ok(Self {
            client: http_client()?,
            min_similarity,
        })
    }

    fn absolute(url: &str) -> String {
        if let Some(rest) = url.strip_prefix("//") {
            format!("https://{rest}")
        } else if url.starts_with('/') {
            format!("{BASE_URL}{url}")
        } else {
            url.to_string()
        }
    }

    fn parse_results(html: &str, min_similarity: f64) -> ProviderResult {
        if html.contains("No relevant matches") {
            return ProviderResult::not_found("iqdb: no relevant matches");
        }
        let Some(best) = html
            .split("Best match")
            .nth(1)
            .and_then(|rest| rest.split("</table>").next())
        else {
            return ProviderResult::not_found("iqdb: no results");
        };
        let Some(link) = HREF.captures(best).and_then(|c| c.get(1)) else {
            return ProviderResult::not_found("iqdb: no results");
        };
        let similarity: f64 = SIMILARITY
            .captures(best)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0.0);

        let mut messages = Vec::new();
        if let Some(img) = IMG.captures(best).and_then(|c| c.get(1)) {
            messages.push(Fragment::image(Self::absolute(img.as_str())));
        }
        messages.push(Fragment::text(format!(
            "iqdb ({similarity:.0}%)\n{}",
            Self::absolute(&decode_entities(link.as_str()))
        )));

        let result = ProviderResult::found(messages);
        if similarity < min_similarity {
            result.with_low_accuracy(format!("iqdb similarity {similarity:.0}% is low"))
        } else {
            result
        }
    }
}

#[async_trait]
impl Backend for Iqdb {
    fn name(&self) -> &str {
        "iqdb"
    }

    async fn search(
        &self,
        image: &ImageRef,
        _selector: Selector,
    ) -> Result<ProviderResult, BackendError> {
        let resp = self
            .client
            .get(API_URL)
            .query(&[("url", image.url())])
            .send()
            .await?;
        let html = check_status(resp).await?.text().await?;
        Ok(Self::parse_results(&html, self.min_similarity))
    }
}
