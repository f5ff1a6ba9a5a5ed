// src/news/mod.rs
use crate::domain::errors::{MarketDataError, MarketDataResult};
use crate::reasoning::{extract, ReasoningClient, StageRole};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

/// One news item, trimmed to what the analysis prompt needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Headline {
    pub title: String,
    pub summary: String,
    pub source: String,
    pub published_at: String,
}

/// Optional sentiment context handed to the analysis stage. Missing news
/// never blocks a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct NewsContext {
    pub headlines: Vec<Headline>,
    /// -1 (extremely bearish) to 1 (extremely bullish), when available.
    pub sentiment: Option<f64>,
}

#[async_trait]
pub trait NewsProvider: Send + Sync {
    /// Most recent headlines matching the query, newest first.
    async fn recent_headlines(&self, query: &str, limit: usize) -> MarketDataResult<Vec<Headline>>;
}

#[derive(Debug, Deserialize)]
struct NewsApiResponse {
    status: String,
    #[serde(default)]
    articles: Vec<NewsApiArticle>,
}

#[derive(Debug, Deserialize)]
struct NewsApiArticle {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    source: NewsApiSource,
    #[serde(rename = "publishedAt", default)]
    published_at: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct NewsApiSource {
    #[serde(default)]
    name: Option<String>,
}

/// NewsAPI.org client.
pub struct NewsApiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl NewsApiClient {
    pub fn new(api_key: &str, timeout: std::time::Duration) -> MarketDataResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MarketDataError::Fetch(e.to_string()))?;
        Ok(Self {
            http,
            api_key: api_key.to_string(),
            base_url: "https://newsapi.org/v2".to_string(),
        })
    }
}

#[async_trait]
impl NewsProvider for NewsApiClient {
    async fn recent_headlines(&self, query: &str, limit: usize) -> MarketDataResult<Vec<Headline>> {
        let response = self
            .http
            .get(format!("{}/everything", self.base_url))
            .query(&[
                ("q", query),
                ("language", "en"),
                ("sortBy", "publishedAt"),
                ("pageSize", &limit.to_string()),
                ("apiKey", &self.api_key),
            ])
            .send()
            .await
            .map_err(|e| MarketDataError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MarketDataError::Fetch(format!(
                "news feed returned HTTP {}",
                response.status()
            )));
        }

        let parsed: NewsApiResponse = response
            .json()
            .await
            .map_err(|e| MarketDataError::InvalidFormat(e.to_string()))?;

        if parsed.status != "ok" {
            return Err(MarketDataError::Fetch(format!(
                "news feed status: {}",
                parsed.status
            )));
        }

        Ok(parsed
            .articles
            .into_iter()
            .take(limit)
            .map(|a| Headline {
                title: a.title.unwrap_or_default(),
                summary: a
                    .description
                    .unwrap_or_default()
                    .chars()
                    .take(200)
                    .collect(),
                source: a.source.name.unwrap_or_else(|| "Unknown".to_string()),
                published_at: a.published_at.unwrap_or_default(),
            })
            .collect())
    }
}

/// Ask the reasoning service for a single sentiment score over the headlines.
/// Any failure yields None; sentiment is strictly optional context.
pub async fn sentiment_score(
    reasoning: &Arc<dyn ReasoningClient>,
    base_currency: &str,
    headlines: &[Headline],
) -> Option<f64> {
    if headlines.is_empty() {
        return None;
    }

    let news_text: String = headlines
        .iter()
        .take(5)
        .map(|h| format!("Title: {}\nDescription: {}\n", h.title, h.summary))
        .collect();

    let prompt = format!(
        "You are a professional cryptocurrency market analyst. Analyze the\n\
         sentiment and potential market impact of the recent news about {}\n\
         below. Consider only short-term price movements (next 24 hours).\n\n\
         News:\n{}\n\
         Rate the overall market sentiment on a scale from -1 (extremely\n\
         bearish) to 1 (extremely bullish). Provide only the numerical score.",
        base_currency, news_text,
    );

    match reasoning.complete(StageRole::Analyst, &prompt).await {
        Ok(text) => match extract::parse_scalar(&text) {
            Ok(score) => Some(score.clamp(-1.0, 1.0)),
            Err(e) => {
                log::warn!("Unparseable news sentiment ({}); skipping", e);
                None
            }
        },
        Err(e) => {
            log::warn!("News sentiment unavailable ({}); skipping", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::{ReasoningError, ReasoningResult};

    struct CannedReasoner(&'static str);

    #[async_trait]
    impl ReasoningClient for CannedReasoner {
        async fn complete(&self, _role: StageRole, _prompt: &str) -> ReasoningResult<String> {
            if self.0.is_empty() {
                Err(ReasoningError::EmptyResponse("analyst".to_string()))
            } else {
                Ok(self.0.to_string())
            }
        }
    }

    fn headline() -> Headline {
        Headline {
            title: "BTC rallies".to_string(),
            summary: "Bitcoin gained overnight".to_string(),
            source: "Example".to_string(),
            published_at: "2026-08-29T00:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn sentiment_clamps_to_unit_range() {
        let reasoning: Arc<dyn ReasoningClient> = Arc::new(CannedReasoner("3.5"));
        let score = sentiment_score(&reasoning, "BTC", &[headline()]).await;
        assert_eq!(score, Some(1.0));
    }

    #[tokio::test]
    async fn sentiment_absent_without_headlines_or_on_failure() {
        let reasoning: Arc<dyn ReasoningClient> = Arc::new(CannedReasoner("0.4"));
        assert_eq!(sentiment_score(&reasoning, "BTC", &[]).await, None);

        let failing: Arc<dyn ReasoningClient> = Arc::new(CannedReasoner(""));
        assert_eq!(sentiment_score(&failing, "BTC", &[headline()]).await, None);
    }

    #[test]
    fn news_api_response_parses_partial_articles() {
        let body = r#"{
            "status": "ok",
            "articles": [
                {"title": "Bitcoin climbs", "source": {"name": "Wire"},
                 "publishedAt": "2026-08-29T10:00:00Z"},
                {"description": "no title here"}
            ]
        }"#;
        let parsed: NewsApiResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.status, "ok");
        assert_eq!(parsed.articles.len(), 2);
        assert_eq!(parsed.articles[0].title.as_deref(), Some("Bitcoin climbs"));
        assert!(parsed.articles[1].title.is_none());
    }
}
