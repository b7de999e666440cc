//! Article records as they flow through the pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::identity::article_id;
use crate::types::decision::Decision;

/// Legacy keys consulted, in order, when `url` is empty.
const LEGACY_URL_KEYS: [&str; 2] = ["original_url", "link"];

/// Where an article came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Returned by a news search API
    Api,
    /// Extracted from a scraped page
    Scraped,
}

impl SourceType {
    /// Infer the source type from an extraction method label (`api_*` => Api).
    pub fn from_extraction_method(method: &str) -> Self {
        if method.starts_with("api") {
            SourceType::Api
        } else {
            SourceType::Scraped
        }
    }
}

/// Provenance attached to an article by the merge decision stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeMetadata {
    pub decision: Decision,
    pub reason: String,
    pub group_id: usize,
}

/// A news article.
///
/// Fields the pipeline does not know about (enrichment output, scraper
/// diagnostics, legacy `original_url`/`content`/`article_id` copies) are
/// kept in `extra` and written back unchanged. Upstream stages often write
/// a legacy copy next to the canonical field, so neither is an alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    /// Content-addressed id derived from the URL
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub body: String,

    #[serde(default)]
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_date: Option<String>,

    #[serde(default)]
    pub language: String,

    #[serde(default)]
    pub region: String,

    #[serde(default)]
    pub extraction_method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<SourceType>,

    /// URLs of articles absorbed into this one, in absorption order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_from_urls: Vec<String>,

    #[serde(
        rename = "_merge_metadata",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub merge_metadata: Option<MergeMetadata>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Article {
    /// Create an article, deriving its id from the URL.
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Self> {
        let url = url.into();
        let id = article_id(&url)?;

        Ok(Self {
            id,
            url,
            title: title.into(),
            body: body.into(),
            source: String::new(),
            publish_date: None,
            language: String::new(),
            region: String::new(),
            extraction_method: String::new(),
            source_type: None,
            merged_from_urls: Vec::new(),
            merge_metadata: None,
            extra: Map::new(),
        })
    }

    /// Set the source name.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Set the language code.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Set the region code.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Set the publish date (kept as the source formatted it).
    pub fn with_publish_date(mut self, date: impl Into<String>) -> Self {
        self.publish_date = Some(date.into());
        self
    }

    /// Set the extraction method label.
    pub fn with_extraction_method(mut self, method: impl Into<String>) -> Self {
        self.extraction_method = method.into();
        self
    }

    /// Set the source type.
    pub fn with_source_type(mut self, source_type: SourceType) -> Self {
        self.source_type = Some(source_type);
        self
    }

    /// Body length in characters, used for representative selection.
    pub fn body_len(&self) -> usize {
        self.body.chars().count()
    }

    /// Recompute the id from the URL.
    ///
    /// Upstream stages occasionally emit articles without an id or with one
    /// computed by an older scheme; the URL is the only trusted input.
    pub fn ensure_identity(&mut self) -> Result<()> {
        self.adopt_legacy_fields();
        self.id = article_id(&self.url)?;
        if self.extra.contains_key("article_id") {
            self.extra
                .insert("article_id".to_string(), Value::String(self.id.clone()));
        }
        Ok(())
    }

    /// Non-blank string value of a legacy field kept in `extra`.
    fn legacy(&self, key: &str) -> Option<String> {
        self.extra
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    }

    /// Take `url`, `body` and `publish_date` from legacy fields when the
    /// canonical ones are empty.
    fn adopt_legacy_fields(&mut self) {
        if self.url.trim().is_empty() {
            if let Some(url) = LEGACY_URL_KEYS.iter().find_map(|k| self.legacy(k)) {
                self.url = url;
            }
        }
        if self.body.trim().is_empty() {
            if let Some(body) = self.legacy("content") {
                self.body = body;
            }
        }
        if self.publish_date.is_none() {
            self.publish_date = self.legacy("published_at");
        }
    }

    /// Fill derived fields that older extractors leave empty.
    ///
    /// - `url`, `body`, `publish_date`: from `original_url`/`link`,
    ///   `content` and `published_at`
    /// - `region`: `tr` for Turkish articles, `eu` otherwise
    /// - `source_type`: inferred from `extraction_method`
    pub fn fill_defaults(&mut self) {
        self.adopt_legacy_fields();
        if self.region.is_empty() {
            self.region = if self.language == "tr" { "tr" } else { "eu" }.to_string();
        }
        if self.source_type.is_none() {
            self.source_type = Some(SourceType::from_extraction_method(
                &self.extraction_method,
            ));
        }
    }

    /// Append a URL to `merged_from_urls` unless it is already present.
    ///
    /// Returns true if the URL was added.
    pub fn absorb_url(&mut self, url: &str) -> bool {
        if url == self.url || self.merged_from_urls.iter().any(|u| u == url) {
            return false;
        }
        self.merged_from_urls.push(url.to_string());
        true
    }
}
