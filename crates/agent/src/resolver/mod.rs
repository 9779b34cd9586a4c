//! Two-stage drug name resolver
//!
//! Maps free-text drug mentions to canonical store entries:
//!
//! 1. *Ingredient extraction* (generative, toggleable): one chat-model call
//!    translates brand names to their generic active ingredient. Advisory
//!    only — any failure or timeout falls back to the raw mention.
//! 2. *Nearest-neighbor match*: embeds the stage-one output (or the raw
//!    mention) and ranks the canonical lexicon by cosine similarity.
//!
//! Pure string matching misses noisy queries; pure embedding matching misses
//! brand-to-generic translation (lexically dissimilar). Chaining recovers
//! both. The resolver never returns an error to its callers: a miss is an
//! unresolved result, not a failure.

mod index;

pub use index::{cosine_similarity, EmbeddingIndex};

use crate::store::normalize;
use pharmgraph_common::chat::{ChatMessage, ChatModel, ChatRequest};
use pharmgraph_common::config::ResolverConfig;
use pharmgraph_common::embeddings::Embedder;
use pharmgraph_common::metrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Confidence reported by the extraction stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionConfidence {
    High,
    Medium,
    Low,
}

fn default_confidence() -> ExtractionConfidence {
    ExtractionConfidence::Low
}

/// Output of the generative ingredient-extraction call
#[derive(Debug, Clone, Deserialize)]
pub struct IngredientExtraction {
    #[serde(default)]
    pub reasoning: String,
    pub candidate_ingredient: String,
    #[serde(default = "default_confidence")]
    pub confidence: ExtractionConfidence,
}

/// A candidate canonical name with its similarity score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredName {
    pub name: String,
    pub score: f32,
}

/// Result of resolving one mention. Computed per request, never persisted.
#[derive(Debug, Clone)]
pub struct ResolutionResult {
    /// The mention as given by the caller
    pub mention: String,
    /// Canonical name when a confident match was found
    pub resolved: Option<String>,
    /// Similarity score of the accepted match, in [0, 1]
    pub score: f32,
    /// Ranked runner-up candidates above the suggestion threshold
    pub alternatives: Vec<ScoredName>,
    /// Extraction metadata when stage one produced a candidate
    pub extraction: Option<IngredientExtraction>,
}

impl ResolutionResult {
    fn unresolved(mention: &str, extraction: Option<IngredientExtraction>) -> Self {
        Self {
            mention: mention.to_string(),
            resolved: None,
            score: 0.0,
            alternatives: Vec::new(),
            extraction,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }

    /// Confidence label for user-facing reports
    pub fn confidence_label(&self) -> &'static str {
        if self.score > 0.8 {
            "high"
        } else if self.score > 0.6 {
            "medium"
        } else {
            "low"
        }
    }
}

const EXTRACTION_PROMPT: &str = "\
You identify the generic active ingredient behind a drug mention. The \
mention may be a brand name, a misspelling, or already a generic name. \
Reply with a JSON object only, no prose, in this exact shape: \
{\"reasoning\": \"<one or two sentences>\", \"candidate_ingredient\": \
\"<generic name, or the mention itself if already generic>\", \
\"confidence\": \"high|medium|low\"}. If you cannot identify an active \
ingredient, repeat the mention as the candidate with low confidence.";

/// Two-stage name resolver over a fixed canonical lexicon
pub struct NameResolver {
    chat: Arc<dyn ChatModel>,
    embedder: Arc<dyn Embedder>,
    index: EmbeddingIndex,
    config: ResolverConfig,
}

impl NameResolver {
    pub fn new(
        chat: Arc<dyn ChatModel>,
        embedder: Arc<dyn Embedder>,
        index: EmbeddingIndex,
        config: ResolverConfig,
    ) -> Self {
        Self {
            chat,
            embedder,
            index,
            config,
        }
    }

    /// Resolve a mention to a canonical drug name.
    ///
    /// Never fails: upstream errors degrade to an unresolved result carrying
    /// the raw mention.
    pub async fn resolve(&self, mention: &str) -> ResolutionResult {
        let mention = mention.trim();
        if mention.is_empty() {
            return ResolutionResult::unresolved(mention, None);
        }

        let extraction = if self.config.extraction_enabled {
            self.extract_ingredient(mention).await
        } else {
            None
        };

        let query = extraction
            .as_ref()
            .map(|e| e.candidate_ingredient.trim())
            .filter(|c| !c.is_empty())
            .unwrap_or(mention);
        let canonical_query = normalize(query);

        // Exact lexicon hit short-circuits the similarity search
        if self.index.position(&canonical_query).is_some() {
            metrics::record_resolution("exact");
            return ResolutionResult {
                mention: mention.to_string(),
                resolved: Some(canonical_query),
                score: 1.0,
                alternatives: Vec::new(),
                extraction,
            };
        }

        let vector = match self.embedder.embed(&canonical_query).await {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!(
                    mention,
                    error = %e,
                    "Embedding failed, passing mention through unresolved"
                );
                metrics::record_resolution("error");
                return ResolutionResult::unresolved(mention, extraction);
            }
        };

        let ranked = self.ranked(&vector, self.config.max_suggestions);
        let best_score = ranked.first().map(|s| s.score).unwrap_or(0.0);

        if best_score >= self.config.match_threshold {
            let mut ranked = ranked;
            let best = ranked.remove(0);
            metrics::record_resolution("matched");
            ResolutionResult {
                mention: mention.to_string(),
                resolved: Some(best.name),
                score: best.score,
                alternatives: ranked,
                extraction,
            }
        } else {
            metrics::record_resolution("unmatched");
            ResolutionResult {
                mention: mention.to_string(),
                resolved: None,
                score: best_score,
                alternatives: ranked,
                extraction,
            }
        }
    }

    /// Ranked suggestions for a mention, pure embedding stage.
    ///
    /// Returns at most `k` candidates with score >= `threshold`, sorted
    /// descending. Empty on upstream failure, never an error.
    pub async fn top_k(&self, mention: &str, k: usize, threshold: f32) -> Vec<ScoredName> {
        let canonical = normalize(mention);
        if canonical.is_empty() {
            return Vec::new();
        }

        match self.embedder.embed(&canonical).await {
            Ok(vector) => self
                .index
                .rank(&vector, k, threshold)
                .into_iter()
                .map(|(i, score)| ScoredName {
                    name: self.index.name(i).to_string(),
                    score,
                })
                .collect(),
            Err(e) => {
                tracing::warn!(mention, error = %e, "Embedding failed for suggestions");
                Vec::new()
            }
        }
    }

    fn ranked(&self, vector: &[f32], k: usize) -> Vec<ScoredName> {
        self.index
            .rank(vector, k, self.config.suggestion_threshold)
            .into_iter()
            .map(|(i, score)| ScoredName {
                name: self.index.name(i).to_string(),
                score,
            })
            .collect()
    }

    /// Stage one: one timeout-guarded model call. Returns None on any
    /// failure so the caller falls back to the raw mention.
    async fn extract_ingredient(&self, mention: &str) -> Option<IngredientExtraction> {
        let request = ChatRequest::new(
            self.chat.model_name(),
            vec![
                ChatMessage::system(EXTRACTION_PROMPT),
                ChatMessage::user(mention),
            ],
        )
        .with_temperature(0.0)
        .with_json_output();

        let timeout = Duration::from_secs(self.config.extraction_timeout_secs);
        match tokio::time::timeout(timeout, self.chat.complete(request)).await {
            Ok(Ok(message)) => parse_extraction(&message.content),
            Ok(Err(e)) => {
                tracing::warn!(mention, error = %e, "Ingredient extraction failed");
                None
            }
            Err(_) => {
                tracing::warn!(
                    mention,
                    timeout_secs = self.config.extraction_timeout_secs,
                    "Ingredient extraction timed out"
                );
                None
            }
        }
    }
}

/// Parse the extraction JSON out of a model reply, tolerating code fences
/// and surrounding prose.
fn parse_extraction(content: &str) -> Option<IngredientExtraction> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }

    let extraction: IngredientExtraction = serde_json::from_str(&content[start..=end]).ok()?;
    if extraction.candidate_ingredient.trim().is_empty() {
        return None;
    }
    Some(extraction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pharmgraph_common::chat::ScriptedChatModel;
    use pharmgraph_common::config::ResolverConfig;
    use pharmgraph_common::embeddings::HashingEmbedder;

    const DIM: usize = 256;

    fn lexicon() -> Vec<String> {
        ["warfarin", "aspirin", "ibuprofen", "acetaminophen"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn config(extraction: bool) -> ResolverConfig {
        ResolverConfig {
            extraction_enabled: extraction,
            match_threshold: 0.7,
            suggestion_threshold: 0.5,
            extraction_timeout_secs: 5,
            max_suggestions: 5,
        }
    }

    async fn resolver_with(chat: ScriptedChatModel, config: ResolverConfig) -> NameResolver {
        let embedder = Arc::new(HashingEmbedder::new(DIM));
        let index = EmbeddingIndex::build(lexicon(), embedder.as_ref())
            .await
            .unwrap();
        NameResolver::new(Arc::new(chat), embedder, index, config)
    }

    #[tokio::test]
    async fn test_exact_match_short_circuits() {
        let resolver = resolver_with(ScriptedChatModel::new(vec![]), config(false)).await;
        let result = resolver.resolve("  WARFARIN ").await;
        assert_eq!(result.resolved.as_deref(), Some("warfarin"));
        assert_eq!(result.score, 1.0);
        assert!(result.extraction.is_none());
    }

    #[tokio::test]
    async fn test_near_miss_resolves_through_embedding() {
        let resolver = resolver_with(ScriptedChatModel::new(vec![]), config(false)).await;
        let result = resolver.resolve("warfarine").await;
        assert_eq!(result.resolved.as_deref(), Some("warfarin"));
        assert!(result.score >= 0.7);
    }

    #[tokio::test]
    async fn test_brand_name_resolves_via_extraction() {
        // Store has acetaminophen but not Tylenol; the extraction stage
        // supplies the generic, which then exact-matches.
        let chat = ScriptedChatModel::from_messages(vec![ChatMessage::assistant(
            r#"{"reasoning": "Tylenol is a brand of acetaminophen.", "candidate_ingredient": "acetaminophen", "confidence": "high"}"#,
        )]);
        let resolver = resolver_with(chat, config(true)).await;

        let result = resolver.resolve("Tylenol").await;
        assert_eq!(result.resolved.as_deref(), Some("acetaminophen"));
        assert!(result.score >= 0.7);
        let extraction = result.extraction.unwrap();
        assert_eq!(extraction.confidence, ExtractionConfidence::High);
    }

    #[tokio::test]
    async fn test_extraction_timeout_falls_back_to_raw_mention() {
        let chat = ScriptedChatModel::from_messages(vec![ChatMessage::assistant(
            r#"{"candidate_ingredient": "never seen"}"#,
        )])
        .with_delay(Duration::from_millis(200));

        let mut cfg = config(true);
        cfg.extraction_timeout_secs = 0;
        let resolver = resolver_with(chat, cfg).await;

        // Still resolves using the raw mention, and never errors
        let result = resolver.resolve("aspirin").await;
        assert_eq!(result.resolved.as_deref(), Some("aspirin"));
        assert!(result.extraction.is_none());
    }

    #[tokio::test]
    async fn test_extraction_error_falls_back_to_raw_mention() {
        let chat = ScriptedChatModel::new(vec![
            pharmgraph_common::chat::ScriptedReply::Error("upstream down".into()),
        ]);
        let resolver = resolver_with(chat, config(true)).await;

        let result = resolver.resolve("ibuprofen").await;
        assert_eq!(result.resolved.as_deref(), Some("ibuprofen"));
    }

    #[tokio::test]
    async fn test_unrelated_mention_is_unresolved_not_error() {
        let resolver = resolver_with(ScriptedChatModel::new(vec![]), config(false)).await;
        let result = resolver.resolve("zzzxxqq").await;
        assert!(result.resolved.is_none());
        assert!(result.score < 0.7);
    }

    #[tokio::test]
    async fn test_top_k_bounds_threshold_and_order() {
        let resolver = resolver_with(ScriptedChatModel::new(vec![]), config(false)).await;
        let suggestions = resolver.top_k("warfarin", 3, 0.1).await;

        assert!(suggestions.len() <= 3);
        assert_eq!(suggestions[0].name, "warfarin");
        assert!(suggestions.iter().all(|s| s.score >= 0.1));
        assert!(suggestions.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_empty_mention_unresolved() {
        let resolver = resolver_with(ScriptedChatModel::new(vec![]), config(true)).await;
        let result = resolver.resolve("   ").await;
        assert!(result.resolved.is_none());
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_parse_extraction_tolerates_fences() {
        let content = "```json\n{\"reasoning\": \"r\", \"candidate_ingredient\": \"ibuprofen\", \"confidence\": \"medium\"}\n```";
        let extraction = parse_extraction(content).unwrap();
        assert_eq!(extraction.candidate_ingredient, "ibuprofen");
        assert_eq!(extraction.confidence, ExtractionConfidence::Medium);
    }

    #[test]
    fn test_parse_extraction_rejects_empty_candidate() {
        assert!(parse_extraction(r#"{"candidate_ingredient": "  "}"#).is_none());
        assert!(parse_extraction("no json here").is_none());
    }

    #[test]
    fn test_confidence_label_bands() {
        let mut result = ResolutionResult::unresolved("x", None);
        result.score = 0.9;
        assert_eq!(result.confidence_label(), "high");
        result.score = 0.7;
        assert_eq!(result.confidence_label(), "medium");
        result.score = 0.3;
        assert_eq!(result.confidence_label(), "low");
    }
}
