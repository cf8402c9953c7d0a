use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use super::{Backend, ProviderResult, check_status, format_timestamp, http_client};
use crate::error::BackendError;
use crate::image::{ImageRef, Selector};
use crate::message::Fragment;

const API_URL: &str = "https://api.trace.moe/search";

/// Below this trace.moe's own docs say the match is probably wrong.
const MIN_SIMILARITY: f64 = 0.87;

/// Animation-only scene search on trace.moe.
pub struct TraceMoe {
    client: reqwest::Client,
}

impl TraceMoe {
    pub fn new() -> Result<Self, BackendError> {
        Ok(Self {
            client: http_client()?,
        })
    }

    fn interpret(resp: ApiResponse) -> ProviderResult {
        if !resp.error.is_empty() {
            return ProviderResult::not_found(format!("trace.moe: {}", resp.error));
        }
        let Some(best) = resp.result.into_iter().next() else {
            return ProviderResult::not_found("trace.moe: no results");
        };

        let title = best
            .anilist
            .as_ref()
            .and_then(|a| {
                a.title
                    .native
                    .clone()
                    .or_else(|| a.title.romaji.clone())
                    .or_else(|| a.title.english.clone())
            })
            .or(best.filename.clone())
            .unwrap_or_else(|| "unknown".to_string());

        let mut text = format!("trace.moe ({:.2}%)\n{title}", best.similarity * 100.0);
        match &best.episode {
            Some(serde_json::Value::Number(n)) => text.push_str(&format!("\nEpisode {n}")),
            Some(serde_json::Value::String(s)) if !s.is_empty() => {
                text.push_str(&format!("\nEpisode {s}"))
            }
            _ => {}
        }
        text.push_str(&format!(
            "\n{} - {}",
            format_timestamp(best.from),
            format_timestamp(best.to)
        ));
        if let Some(anilist) = &best.anilist {
            text.push_str(&format!("\nhttps://anilist.co/anime/{}", anilist.id));
        }

        let mut messages = Vec::new();
        if let Some(image) = best.image.filter(|i| !i.is_empty()) {
            messages.push(Fragment::image(image));
        }
        messages.push(Fragment::text(text));

        let result = ProviderResult::found(messages);
        if best.similarity < MIN_SIMILARITY {
            result.with_low_accuracy("trace.moe similarity is low, the scene may be wrong")
        } else {
            result
        }
    }
}

#[async_trait]
impl Backend for TraceMoe {
    fn name(&self) -> &str {
        "trace.moe"
    }

    async fn search(
        &self,
        image: &ImageRef,
        _selector: Selector,
    ) -> Result<ProviderResult, BackendError> {
        let resp = self
            .client
            .get(API_URL)
            .query(&[("anilistInfo", ""), ("cutBorders", ""), ("url", image.url())])
            .send()
            .await?;

        // 402: search quota or concurrency limit for our IP is spent.
        if resp.status() == StatusCode::PAYMENT_REQUIRED {
            return Ok(ProviderResult::quota_exceeded("trace.moe: search quota depleted"));
        }

        let body = check_status(resp).await?.text().await?;
        let parsed: ApiResponse =
            serde_json::from_str(&body).map_err(|e| BackendError::Parse(e.to_string()))?;
        Ok(Self::interpret(parsed))
    }
}

// --- API types ---

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    result: Vec<ApiResult>,
}

#[derive(Deserialize)]
struct ApiResult {
    anilist: Option<Anilist>,
    filename: Option<String>,
    episode: Option<serde_json::Value>,
    #[serde(default)]
    from: f64,
    #[serde(default)]
    to: f64,
    similarity: f64,
    image: Option<String>,
}

#[derive(Deserialize)]
struct Anilist {
    id: u64,
    title: AnilistTitle,
}

#[derive(Deserialize)]
struct AnilistTitle {
    native: Option<String>,
    romaji: Option<String>,
    english: Option<String>,
}
