use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;

use super::{Backend, ProviderResult, check_status, decode_entities, http_client};
use crate::error::BackendError;
use crate::image::{ImageRef, Selector};
use crate::message::Fragment;

const BASE_URL: &str = "https://ascii2d.net";

static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<a[^>]*href="([^"]+)"[^>]*>([^<]*)</a>"#).unwrap());
static THUMBNAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<img[^>]*src="(/thumbnail/[^"]+)""#).unwrap());

/// Feature-matching search on ascii2d. The URL search lands on the color
/// results page; the same hash under `/bovw/` gives the feature results.
pub struct Ascii2d {
    client: reqwest::Client,
}

impl Ascii2d {
    pub fn new() -> Result<Self, BackendError> {
        Ok(Self {
            client: http_client()?,
        })
    }

    fn search_url(image_url: &str) -> Result<Url, BackendError> {
        let mut url = Url::parse(&format!("{BASE_URL}/search/url/"))
            .map_err(|e| BackendError::Config(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| BackendError::Config("ascii2d base url cannot take a path".into()))?
            .pop_if_empty()
            .push(image_url);
        Ok(url)
    }

    /// Swap the color results page for the feature results page.
    fn feature_url(color_url: &Url) -> Option<Url> {
        let path = color_url.path();
        if !path.contains("/search/color/") {
            return None;
        }
        let mut url = color_url.clone();
        url.set_path(&path.replacen("/search/color/", "/search/bovw/", 1));
        Some(url)
    }

    /// First external result on a results page. The first item box is the
    /// query image itself.
    fn parse_results(html: &str) -> ProviderResult {
        for item in html.split(r#"class="row item-box""#).skip(2) {
            let Some(detail) = item.split(r#"class="detail-box"#).nth(1) else {
                continue;
            };
            let links: Vec<(String, String)> = LINK
                .captures_iter(detail)
                .filter_map(|c| {
                    Some((
                        decode_entities(c.get(1)?.as_str()),
                        decode_entities(c.get(2)?.as_str().trim()),
                    ))
                })
                .filter(|(href, _)| href.starts_with("http"))
                .collect();
            let Some((work_url, title)) = links.first() else {
                continue;
            };

            let mut text = String::from("ascii2d");
            if !title.is_empty() {
                text.push_str(&format!("\n{title}"));
            }
            if let Some((_, author)) = links.get(1).filter(|(_, a)| !a.is_empty()) {
                text.push_str(&format!("\nAuthor: {author}"));
            }
            text.push_str(&format!("\n{work_url}"));

            let mut messages = Vec::new();
            if let Some(thumb) = THUMBNAIL.captures(item).and_then(|c| c.get(1)) {
                messages.push(Fragment::image(format!("{BASE_URL}{}", thumb.as_str())));
            }
            messages.push(Fragment::text(text));
            return ProviderResult::found(messages);
        }
        ProviderResult::not_found("ascii2d: no results")
    }
}

#[async_trait]
impl Backend for Ascii2d {
    fn name(&self) -> &str {
        "ascii2d"
    }

    async fn search(
        &self,
        image: &ImageRef,
        _selector: Selector,
    ) -> Result<ProviderResult, BackendError> {
        let resp = self.client.get(Self::search_url(image.url())?).send().await?;
        let resp = check_status(resp).await?;

        let feature_url = Self::feature_url(resp.url()).ok_or_else(|| {
            BackendError::Parse(format!("unexpected ascii2d redirect: {}", resp.url()))
        })?;
        tracing::debug!(%feature_url, "ascii2d feature search");

        let resp = self.client.get(feature_url).send().await?;
        let html = check_status(resp).await?.text().await?;
        Ok(Self::parse_results(&html))
    }
}
