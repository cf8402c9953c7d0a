use async_trait::async_trait;
use serde::Deserialize;

use super::{Backend, ProviderResult, check_status, html_text, http_client};
use crate::error::BackendError;
use crate::image::{ImageRef, Selector};
use crate::message::Fragment;

const API_URL: &str = "https://saucenao.com/search.php";
const NUM_RESULTS: &str = "3";

/// Generic similarity search over SauceNAO's indexes.
pub struct SauceNao {
    client: reqwest::Client,
    api_key: Option<String>,
    min_similarity: f64,
}

impl SauceNao {
    pub fn new(api_key: Option<String>, min_similarity: f64) -> Result<Self, BackendError> {
        Ok(Self {
            client: http_client()?,
            api_key,
            min_similarity,
        })
    }

    /// SauceNAO index for a selector. 999 searches everything.
    fn db_index(selector: Selector) -> &'static str {
        match selector {
            Selector::Pixiv => "5",
            Selector::Danbooru => "9",
            Selector::Doujin => "18",
            _ => "999",
        }
    }

    fn interpret(resp: ApiResponse, min_similarity: f64) -> ProviderResult {
        if resp.header.status != 0 {
            let message = resp.header.message.unwrap_or_default();
            let lowered = message.to_ascii_lowercase();
            if lowered.contains("limit") || lowered.contains("too high") {
                return ProviderResult::quota_exceeded("SauceNAO: search limit reached");
            }
            return ProviderResult::not_found(format!(
                "SauceNAO: error {} {}",
                resp.header.status,
                html_text(&message)
            ));
        }

        let Some(best) = resp.results.into_iter().next() else {
            return ProviderResult::not_found("SauceNAO: no results");
        };

        let similarity: f64 = best.header.similarity.parse().unwrap_or(0.0);
        let mut text = format!("SauceNAO ({similarity:.2}%)");
        let title = best.data.title.or(best.data.source);
        if let Some(title) = title.map(|t| html_text(&t)).filter(|t| !t.is_empty()) {
            text.push_str(&format!("\n{title}"));
        }
        let author = best.data.member_name.or(best.data.creator.and_then(|c| c.into_name()));
        if let Some(author) = author.filter(|a| !a.is_empty()) {
            text.push_str(&format!("\nAuthor: {author}"));
        }
        for url in best.data.ext_urls.iter().take(2) {
            text.push_str(&format!("\n{url}"));
        }

        let mut messages = Vec::new();
        if let Some(thumb) = best.header.thumbnail.filter(|t| !t.is_empty()) {
            messages.push(Fragment::image(thumb));
        }
        messages.push(Fragment::text(text));

        let result = ProviderResult::found(messages);
        if similarity < min_similarity {
            result.with_low_accuracy(format!(
                "SauceNAO similarity {similarity:.2}% is below {min_similarity:.0}%, the match may be wrong"
            ))
        } else {
            result
        }
    }
}

#[async_trait]
impl Backend for SauceNao {
    fn name(&self) -> &str {
        "SauceNAO"
    }

    async fn search(
        &self,
        image: &ImageRef,
        selector: Selector,
    ) -> Result<ProviderResult, BackendError> {
        let mut query = vec![
            ("output_type", "2"),
            ("numres", NUM_RESULTS),
            ("db", Self::db_index(selector)),
            ("url", image.url()),
        ];
        if let Some(key) = &self.api_key {
            query.push(("api_key", key.as_str()));
        }

        let resp = self.client.get(API_URL).query(&query).send().await?;
        let resp = check_status(resp).await?;
        let body = resp.text().await?;
        let parsed: ApiResponse =
            serde_json::from_str(&body).map_err(|e| BackendError::Parse(e.to_string()))?;

        Ok(Self::interpret(parsed, self.min_similarity))
    }
}

// --- API types ---

#[derive(Deserialize)]
struct ApiResponse {
    header: ApiHeader,
    #[serde(default)]
    results: Vec<ApiResult>,
}

#[derive(Deserialize)]
struct ApiHeader {
    status: i64,
    message: Option<String>,
}

#[derive(Deserialize)]
struct ApiResult {
    header: ResultHeader,
    data: ResultData,
}

#[derive(Deserialize)]
struct ResultHeader {
    similarity: String,
    thumbnail: Option<String>,
}

#[derive(Deserialize)]
struct ResultData {
    #[serde(default)]
    ext_urls: Vec<String>,
    title: Option<String>,
    source: Option<String>,
    member_name: Option<String>,
    creator: Option<Creator>,
}

/// Booru indexes return one creator or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum Creator {
    One(String),
    Many(Vec<String>),
}

impl Creator {
    fn into_name(self) -> Option<String> {
        match self {
            Creator::One(s) => Some(s),
            Creator::Many(v) if !v.is_empty() => Some(v.join(", ")),
            Creator::Many(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> ProviderResult {
        SauceNao::interpret(serde_json::from_str(json).unwrap(), 60.0)
    }

    const PIXIV_HIT: &str = r#"{
        "header": {"status": 0, "results_returned": 1},
        "results": [{
            "header": {"similarity": "93.41", "thumbnail": "https://img.saucenao.com/t.jpg", "index_id": 5},
            "data": {"ext_urls": ["https://www.pixiv.net/artworks/123"], "title": "Sunset", "member_name": "artist"}
        }]
    }"#;

    #[test]
    fn strong_match_is_success() {
        let r = parse(PIXIV_HIT);
        assert!(r.success);
        assert!(!r.low_accuracy);
        assert_eq!(r.messages[0], Fragment::image("https://img.saucenao.com/t.jpg"));
        let Fragment::Text(text) = &r.messages[1] else {
            panic!("expected text");
        };
        assert!(text.starts_with("SauceNAO (93.41%)"));
        assert!(text.contains("Sunset"));
        assert!(text.contains("Author: artist"));
        assert!(text.contains("https://www.pixiv.net/artworks/123"));
    }

    #[test]
    fn escaped_title_is_decoded() {
        let json = PIXIV_HIT.replace("Sunset", "Sun &amp; Moon");
        let Fragment::Text(text) = &parse(&json).messages[1] else {
            panic!("expected text");
        };
        assert!(text.contains("\nSun & Moon\n"));
    }

    #[test]
    fn weak_match_is_low_accuracy() {
        let json = PIXIV_HIT.replace("93.41", "41.20");
        let r = parse(&json);
        assert!(r.success);
        assert!(r.low_accuracy);
        assert!(r.warning.unwrap().contains("41.20%"));
    }

    #[test]
    fn booru_creator_list_is_joined() {
        let json = r#"{
            "header": {"status": 0},
            "results": [{
                "header": {"similarity": "88.0"},
                "data": {"ext_urls": ["https://danbooru.donmai.us/posts/1"], "creator": ["a", "b"]}
            }]
        }"#;
        let r = parse(json);
        assert_eq!(r.messages.len(), 1);
        let Fragment::Text(text) = &r.messages[0] else {
            panic!("expected text");
        };
        assert!(text.contains("Author: a, b"));
    }

    #[test]
    fn empty_results_is_not_found() {
        let r = parse(r#"{"header": {"status": 0}, "results": []}"#);
        assert!(!r.success);
        assert_eq!(r.messages, vec![Fragment::text("SauceNAO: no results")]);
    }

    #[test]
    fn limit_status_is_quota_exceeded() {
        let r = parse(
            r#"{"header": {"status": -2, "message": "Search Rate Too High. <br />Daily limit"}}"#,
        );
        assert!(r.quota_exceeded);
        assert!(!r.success);
    }

    #[test]
    fn other_error_status_is_failure() {
        let r = parse(r#"{"header": {"status": -3, "message": "<b>Image</b> could not be read"}}"#);
        assert!(!r.success && !r.quota_exceeded);
        assert_eq!(
            r.messages,
            vec![Fragment::text("SauceNAO: error -3 Image could not be read")]
        );
    }

    #[test]
    fn selector_picks_index() {
        assert_eq!(SauceNao::db_index(Selector::All), "999");
        assert_eq!(SauceNao::db_index(Selector::Pixiv), "5");
        assert_eq!(SauceNao::db_index(Selector::Danbooru), "9");
    }
}
