//! Testing utilities including mock implementations.
//!
//! These are useful for testing applications that use the dedup library
//! without making real inference calls.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::{InferenceError, InferenceResult, Result};
use crate::inference::extract_json_object;
use crate::traits::inference::{InferenceRequest, InferenceResponse, InferenceService};
use crate::traits::store::{write_artifact, ContentStore};
use crate::types::article::Article;
use crate::types::artifact::{ArticleEmbeddings, ArtifactPath, CandidateArticles, Stage};
use crate::types::decision::{DecisionGroupInput, DecisionRequestPayload};

type Responder = Arc<dyn Fn(&InferenceRequest) -> InferenceResult<InferenceResponse> + Send + Sync>;
type ErrorFactory = Arc<dyn Fn() -> InferenceError + Send + Sync>;

enum Scripted {
    Respond(InferenceResponse),
    Error(InferenceError),
    Delay(Duration, InferenceResponse),
    Hang,
}

/// A mock inference service for testing.
///
/// Scripted outcomes are consumed in order, one per call. Once the script
/// runs out, the responder (if any) answers, otherwise every call fails
/// with a fatal error. Clones share script and call history.
#[derive(Clone, Default)]
pub struct MockInference {
    /// Outcomes consumed one per call
    script: Arc<RwLock<VecDeque<Scripted>>>,

    /// Answers calls once the script is empty
    responder: Arc<RwLock<Option<Responder>>>,

    /// Error returned on every call, ahead of the responder
    always: Arc<RwLock<Option<ErrorFactory>>>,

    /// Call tracking for assertions
    calls: Arc<RwLock<Vec<MockInferenceCall>>>,
}

/// Record of a call made to the mock.
#[derive(Debug, Clone)]
pub struct MockInferenceCall {
    pub prompt: String,
    pub has_schema: bool,
    /// Group ids found in the decision payload, if any
    pub group_ids: Vec<usize>,
}

impl MockInference {
    /// Create a mock with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, outcome: Scripted) -> Self {
        self.script.write().unwrap().push_back(outcome);
        self
    }

    /// Queue a successful response.
    pub fn then_respond(self, response: InferenceResponse) -> Self {
        self.push(Scripted::Respond(response))
    }

    /// Queue a failure.
    pub fn then_error(self, error: InferenceError) -> Self {
        self.push(Scripted::Error(error))
    }

    /// Queue a response that arrives after `delay`.
    pub fn then_delay(self, delay: Duration, response: InferenceResponse) -> Self {
        self.push(Scripted::Delay(delay, response))
    }

    /// Queue a call that never completes.
    pub fn then_hang(self) -> Self {
        self.push(Scripted::Hang)
    }

    /// Fail every call with a fresh error from `make`.
    pub fn always_error<F>(self, make: F) -> Self
    where
        F: Fn() -> InferenceError + Send + Sync + 'static,
    {
        *self.always.write().unwrap() = Some(Arc::new(make));
        self
    }

    /// Answer unscripted calls with `responder`.
    pub fn with_responder<F>(self, responder: F) -> Self
    where
        F: Fn(&InferenceRequest) -> InferenceResult<InferenceResponse> + Send + Sync + 'static,
    {
        *self.responder.write().unwrap() = Some(Arc::new(responder));
        self
    }

    /// Answer decision requests group by group.
    ///
    /// `decide` returns the decision entry for one group; entries are
    /// wrapped as `{"decisions": [...]}`.
    pub fn decide_with<F>(self, decide: F) -> Self
    where
        F: Fn(&DecisionGroupInput) -> Value + Send + Sync + 'static,
    {
        self.with_responder(move |request| {
            let payload = decision_payload(&request.prompt).ok_or_else(|| {
                InferenceError::Fatal("mock: no decision payload in prompt".into())
            })?;
            let decisions: Vec<Value> = payload.groups.iter().map(&decide).collect();
            Ok(InferenceResponse::Structured(json!({ "decisions": decisions })))
        })
    }

    /// Merge every group into its first article.
    pub fn merge_all(self) -> Self {
        self.decide_with(|group| {
            json!({
                "group_id": group.group_id,
                "decision": "MERGE",
                "reason": "same event",
                "primary_article_id": group.articles[0].article_id,
                "primary_article_url": group.articles[0].url,
            })
        })
    }

    /// Keep every group apart.
    pub fn keep_all(self) -> Self {
        self.decide_with(|group| {
            json!({
                "group_id": group.group_id,
                "decision": "KEEP_BOTH",
                "reason": "different angles",
            })
        })
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<MockInferenceCall> {
        self.calls.read().unwrap().clone()
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    /// Clear call history.
    pub fn clear_calls(&self) {
        self.calls.write().unwrap().clear();
    }
}

#[async_trait]
impl InferenceService for MockInference {
    async fn generate(&self, request: &InferenceRequest) -> InferenceResult<InferenceResponse> {
        self.calls.write().unwrap().push(MockInferenceCall {
            prompt: request.prompt.clone(),
            has_schema: request.schema.is_some(),
            group_ids: decision_payload(&request.prompt)
                .map(|p| p.groups.iter().map(|g| g.group_id).collect())
                .unwrap_or_default(),
        });

        let next = self.script.write().unwrap().pop_front();
        match next {
            Some(Scripted::Respond(response)) => return Ok(response),
            Some(Scripted::Error(error)) => return Err(error),
            Some(Scripted::Delay(delay, response)) => {
                tokio::time::sleep(delay).await;
                return Ok(response);
            }
            Some(Scripted::Hang) => return std::future::pending().await,
            None => {}
        }

        let always = self.always.read().unwrap().clone();
        if let Some(make) = always {
            return Err(make());
        }

        let responder = self.responder.read().unwrap().clone();
        match responder {
            Some(responder) => responder(request),
            None => Err(InferenceError::Fatal("mock: no scripted response".into())),
        }
    }
}

/// Pull the groups payload back out of a decision prompt.
pub fn decision_payload(prompt: &str) -> Option<DecisionRequestPayload> {
    let start = prompt.rfind("```json")?;
    let value = extract_json_object(&prompt[start..])?;
    serde_json::from_value(value).ok()
}

/// Build an article with region and language filled in.
pub fn article(url: &str, title: &str, body: &str) -> Article {
    let mut article = Article::new(url, title, body)
        .unwrap()
        .with_source("test")
        .with_language("en");
    article.fill_defaults();
    article
}

/// Pre-built pipeline inputs for a run.
///
/// Holds the candidate lists and per-article embeddings that an extraction
/// stage would have written, and seeds them into a content store.
pub struct TestScenario {
    run_id: String,
    source: String,
    candidates: Vec<Vec<Article>>,
    embeddings: IndexMap<String, Vec<f32>>,
}

impl TestScenario {
    /// Create a new test scenario.
    pub fn new(run_id: &str, source: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            source: source.to_string(),
            candidates: Vec::new(),
            embeddings: IndexMap::new(),
        }
    }

    /// Add one extraction attempt's output.
    pub fn with_candidate(mut self, articles: Vec<Article>) -> Self {
        self.candidates.push(articles);
        self
    }

    /// Set the embedding for the article at `url`.
    pub fn with_embedding(mut self, url: &str, embedding: Vec<f32>) -> Self {
        let id = crate::identity::article_id(url).unwrap();
        self.embeddings.insert(id, embedding);
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Write candidates and embeddings; returns the candidate paths.
    pub async fn seed<S: ContentStore + ?Sized>(&self, store: &S) -> Result<Vec<ArtifactPath>> {
        let mut refs = Vec::with_capacity(self.candidates.len());
        for (n, articles) in self.candidates.iter().enumerate() {
            let path = ArtifactPath::new(&self.run_id, Stage::Candidates(n), &self.source)?;
            let payload = CandidateArticles {
                articles: articles.clone(),
            };
            write_artifact(store, &path, &payload).await?;
            refs.push(path);
        }

        let path = ArtifactPath::new(&self.run_id, Stage::Embeddings, &self.source)?;
        let payload = ArticleEmbeddings {
            embeddings: self.embeddings.clone(),
        };
        write_artifact(store, &path, &payload).await?;

        Ok(refs)
    }
}
