use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use parley_core::domain::bot::BotId;
use parley_core::domain::knowledge::{KnowledgeChunk, QaEntry, QaEntryId};
use parley_db::repositories::{KnowledgeRepository, QaRepository};

use crate::llm::EmbeddingService;
use crate::text::{normalize, truncate_chars};

const EXACT_SCORE: f32 = 1.0;
const CONTAINMENT_SCORE: f32 = 0.85;
const VERIFIED_BOOST: f32 = 1.2;
const CONFIDENT_BOOST: f32 = 1.1;
const ACCEPT_THRESHOLD: f32 = 0.4;
const AUTHORITATIVE_SCORE: f32 = 0.7;
const AUTHORITATIVE_CONFIDENCE: f32 = 0.7;
const SIMILARITY_THRESHOLD: f32 = 0.6;
const MAX_CHUNKS: usize = 3;
const CHUNK_RENDER_CHARS: usize = 1200;

#[derive(Clone, Debug, PartialEq)]
pub struct ScoredChunk {
    pub title: String,
    pub source_url: String,
    pub content: String,
    pub similarity: f32,
}

/// Grounding material handed to the prompt, in retrieval order.
#[derive(Clone, Debug, PartialEq)]
pub enum GroundingBlock {
    Authoritative { question: String, answer: String },
    Suggested { question: String, answer: String, score: f32 },
    Additional { chunks: Vec<ScoredChunk> },
}

impl GroundingBlock {
    pub fn render(&self) -> String {
        match self {
            Self::Authoritative { question, answer } => format!(
                "AUTHORITATIVE ANSWER (use it directly, do not contradict it):\n\
                 Q: {question}\nA: {answer}"
            ),
            Self::Suggested { question, answer, .. } => format!(
                "SUGGESTED ANSWER (likely relevant, adapt it to the question):\n\
                 Q: {question}\nA: {answer}"
            ),
            Self::Additional { chunks } => {
                let mut rendered = String::from("ADDITIONAL INFORMATION:");
                for chunk in chunks {
                    rendered.push_str(&format!(
                        "\n- {} ({}): {}",
                        chunk.title,
                        chunk.source_url,
                        truncate_chars(&chunk.content, CHUNK_RENDER_CHARS)
                    ));
                }
                rendered
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct QaMatch {
    pub entry_id: QaEntryId,
    pub score: f32,
    pub authoritative: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RetrievalOutcome {
    pub blocks: Vec<GroundingBlock>,
    pub qa_match: Option<QaMatch>,
    /// Tokens reported by the embedding service for the query, if it was called.
    pub embedding_tokens: u64,
}

pub struct RetrievalCoordinator {
    qa: Arc<dyn QaRepository>,
    knowledge: Arc<dyn KnowledgeRepository>,
    embeddings: Arc<dyn EmbeddingService>,
}

impl RetrievalCoordinator {
    pub fn new(
        qa: Arc<dyn QaRepository>,
        knowledge: Arc<dyn KnowledgeRepository>,
        embeddings: Arc<dyn EmbeddingService>,
    ) -> Self {
        Self { qa, knowledge, embeddings }
    }

    /// Never fails: every stage that errors is logged and left out of the outcome.
    pub async fn retrieve(
        &self,
        bot_id: &BotId,
        query: &str,
        correlation_id: &str,
    ) -> RetrievalOutcome {
        let mut outcome = RetrievalOutcome::default();

        match self.qa.list_by_bot(bot_id).await {
            Ok(entries) => {
                if let Some((entry, score)) = best_qa_match(query, &entries) {
                    let authoritative = is_authoritative(entry, score);
                    if authoritative {
                        outcome.blocks.push(GroundingBlock::Authoritative {
                            question: entry.question.clone(),
                            answer: entry.answer.clone(),
                        });
                        if let Err(error) = self.qa.increment_hit(&entry.id).await {
                            warn!(
                                event_name = "retrieval.hit_increment_failed",
                                correlation_id = %correlation_id,
                                qa_entry_id = %entry.id.0,
                                error = %error,
                                "failed to increment Q&A hit count"
                            );
                        }
                    } else {
                        outcome.blocks.push(GroundingBlock::Suggested {
                            question: entry.question.clone(),
                            answer: entry.answer.clone(),
                            score,
                        });
                    }
                    outcome.qa_match =
                        Some(QaMatch { entry_id: entry.id.clone(), score, authoritative });
                }
            }
            Err(error) => warn!(
                event_name = "retrieval.qa_list_failed",
                correlation_id = %correlation_id,
                bot_id = %bot_id,
                error = %error,
                "Q&A lookup failed, continuing without it"
            ),
        }

        if outcome.qa_match.as_ref().is_some_and(|qa_match| qa_match.authoritative) {
            return outcome;
        }

        if let Some((block, tokens)) = self.semantic_block(bot_id, query, correlation_id).await {
            outcome.embedding_tokens = tokens;
            if let Some(block) = block {
                outcome.blocks.push(block);
            }
        }

        outcome
    }

    /// `None` when the embedding service was never reached.
    async fn semantic_block(
        &self,
        bot_id: &BotId,
        query: &str,
        correlation_id: &str,
    ) -> Option<(Option<GroundingBlock>, u64)> {
        let chunks = match self.knowledge.list_by_bot(bot_id).await {
            Ok(chunks) if !chunks.is_empty() => chunks,
            Ok(_) => return None,
            Err(error) => {
                warn!(
                    event_name = "retrieval.chunk_list_failed",
                    correlation_id = %correlation_id,
                    bot_id = %bot_id,
                    error = %error,
                    "knowledge lookup failed, continuing without it"
                );
                return None;
            }
        };

        let embedding = match self.embeddings.embed(query).await {
            Ok(embedding) => embedding,
            Err(error) => {
                warn!(
                    event_name = "retrieval.embedding_failed",
                    correlation_id = %correlation_id,
                    bot_id = %bot_id,
                    error = %error,
                    "query embedding failed, continuing without semantic search"
                );
                return None;
            }
        };

        let top = top_chunks(&embedding.vector, &chunks);
        debug!(
            event_name = "retrieval.semantic_ranked",
            correlation_id = %correlation_id,
            bot_id = %bot_id,
            candidates = chunks.len(),
            kept = top.len(),
            "semantic search complete"
        );
        let block = (!top.is_empty()).then_some(GroundingBlock::Additional { chunks: top });
        Some((block, embedding.tokens))
    }
}

/// Lexical similarity of a query against a stored question, before boosts.
pub fn lexical_score(query: &str, question: &str) -> f32 {
    let query = normalize(query);
    let question = normalize(question);
    if query.is_empty() || question.is_empty() {
        return 0.0;
    }
    if query == question {
        return EXACT_SCORE;
    }
    if query.contains(&question) || question.contains(&query) {
        return CONTAINMENT_SCORE;
    }

    let query_tokens = significant_tokens(&query);
    let question_tokens = significant_tokens(&question);
    let denominator = query_tokens.len().max(question_tokens.len());
    if denominator == 0 {
        return 0.0;
    }
    let shared = query_tokens.intersection(&question_tokens).count();
    shared as f32 / denominator as f32
}

fn significant_tokens(normalized: &str) -> BTreeSet<&str> {
    normalized.split(' ').filter(|token| token.chars().count() > 2).collect()
}

pub fn boosted_score(entry: &QaEntry, raw: f32) -> f32 {
    if entry.verified {
        raw * VERIFIED_BOOST
    } else if entry.confidence > 0.8 {
        raw * CONFIDENT_BOOST
    } else {
        raw
    }
}

/// Highest boosted score above the acceptance threshold; ties keep the earlier entry.
pub fn best_qa_match<'a>(query: &str, entries: &'a [QaEntry]) -> Option<(&'a QaEntry, f32)> {
    let mut best: Option<(&QaEntry, f32)> = None;
    for entry in entries {
        let score = boosted_score(entry, lexical_score(query, &entry.question));
        if best.map_or(true, |(_, best_score)| score > best_score) {
            best = Some((entry, score));
        }
    }
    best.filter(|(_, score)| *score > ACCEPT_THRESHOLD)
}

fn is_authoritative(entry: &QaEntry, score: f32) -> bool {
    score > AUTHORITATIVE_SCORE && entry.confidence > AUTHORITATIVE_CONFIDENCE
}

pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Up to three chunks strictly above the similarity threshold, most similar first.
pub fn top_chunks(query: &[f32], chunks: &[KnowledgeChunk]) -> Vec<ScoredChunk> {
    let mut scored: Vec<ScoredChunk> = chunks
        .iter()
        .map(|chunk| (chunk, cosine(query, &chunk.embedding)))
        .filter(|(_, similarity)| *similarity > SIMILARITY_THRESHOLD)
        .map(|(chunk, similarity)| ScoredChunk {
            title: chunk.title.clone(),
            source_url: chunk.source_url.clone(),
            content: chunk.content.clone(),
            similarity,
        })
        .collect();
    scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    scored.truncate(MAX_CHUNKS);
    scored
}
