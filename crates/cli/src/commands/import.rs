use std::fs;
use std::path::Path;

use serde::Deserialize;

use parley_core::domain::bot::{BotConfig, BotId};
use parley_core::domain::knowledge::{ChunkId, KnowledgeChunk, QaEntry, QaEntryId};
use parley_db::repositories::{
    BotRepository, KnowledgeRepository, QaRepository, RepositoryError, SqlBotRepository,
    SqlKnowledgeRepository, SqlQaRepository,
};
use parley_db::DbPool;

use crate::commands::{block_on, migrated_pool, CommandResult};

#[derive(Debug, Deserialize)]
pub struct ImportBundle {
    pub bot: BotConfig,
    #[serde(default)]
    pub qa_entries: Vec<QaEntryInput>,
    #[serde(default)]
    pub knowledge_chunks: Vec<ChunkInput>,
}

#[derive(Debug, Deserialize)]
pub struct QaEntryInput {
    #[serde(default)]
    pub id: Option<String>,
    pub question: String,
    pub answer: String,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub verified: bool,
    #[serde(default = "default_source_type")]
    pub source_type: String,
}

#[derive(Debug, Deserialize)]
pub struct ChunkInput {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

fn default_confidence() -> f32 {
    1.0
}

fn default_source_type() -> String {
    "import".to_string()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImportSummary {
    pub qa_entries: usize,
    pub knowledge_chunks: usize,
}

impl ImportBundle {
    /// Entries without an id get a positional one, so re-importing the same file updates in place.
    pub fn into_records(self) -> (BotConfig, Vec<QaEntry>, Vec<KnowledgeChunk>) {
        let bot_id = self.bot.id.clone();
        let qa = self
            .qa_entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| QaEntry {
                id: QaEntryId(entry.id.unwrap_or_else(|| format!("{bot_id}-qa-{}", index + 1))),
                bot_id: bot_id.clone(),
                question: entry.question,
                answer: entry.answer,
                confidence: entry.confidence.clamp(0.0, 1.0),
                verified: entry.verified,
                hit_count: 0,
                source_type: entry.source_type,
            })
            .collect();
        let chunks = self
            .knowledge_chunks
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| KnowledgeChunk {
                id: ChunkId(chunk.id.unwrap_or_else(|| format!("{bot_id}-chunk-{}", index + 1))),
                bot_id: bot_id.clone(),
                source_url: chunk.source_url,
                title: chunk.title,
                content: chunk.content,
                embedding: chunk.embedding,
            })
            .collect();
        (self.bot, qa, chunks)
    }
}

pub fn parse_bundle(raw: &str) -> Result<ImportBundle, String> {
    let bundle: ImportBundle = serde_json::from_str(raw).map_err(|error| error.to_string())?;
    if bundle.bot.id.0.trim().is_empty() {
        return Err("bot.id must not be empty".to_string());
    }
    if let Some(entry) = bundle.qa_entries.iter().find(|entry| entry.question.trim().is_empty()) {
        return Err(format!("qa entry with answer `{}` has an empty question", entry.answer));
    }
    Ok(bundle)
}

pub async fn import_bundle(
    pool: &DbPool,
    bundle: ImportBundle,
) -> Result<(BotId, ImportSummary), RepositoryError> {
    let (bot, qa_entries, chunks) = bundle.into_records();
    let bot_id = bot.id.clone();
    let summary = ImportSummary { qa_entries: qa_entries.len(), knowledge_chunks: chunks.len() };

    SqlBotRepository::new(pool.clone()).save(bot).await?;
    let qa_repo = SqlQaRepository::new(pool.clone());
    for entry in qa_entries {
        qa_repo.save(entry).await?;
    }
    let knowledge_repo = SqlKnowledgeRepository::new(pool.clone());
    for chunk in chunks {
        knowledge_repo.save(chunk).await?;
    }

    Ok((bot_id, summary))
}

pub fn run(path: &Path) -> CommandResult {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) => {
            return CommandResult::failure(
                "import",
                "bundle_read",
                format!("failed to read `{}`: {error}", path.display()),
                6,
            );
        }
    };
    let bundle = match parse_bundle(&raw) {
        Ok(bundle) => bundle,
        Err(message) => {
            return CommandResult::failure(
                "import",
                "bundle_parse",
                format!("invalid bundle `{}`: {message}", path.display()),
                7,
            );
        }
    };

    block_on("import", async move {
        let pool = match migrated_pool("import").await {
            Ok(pool) => pool,
            Err(failure) => return failure,
        };
        let result = import_bundle(&pool, bundle).await;
        pool.close().await;

        match result {
            Ok((bot_id, summary)) => CommandResult::success(
                "import",
                format!(
                    "imported bot `{bot_id}` with {} qa entries and {} knowledge chunks",
                    summary.qa_entries, summary.knowledge_chunks
                ),
            ),
            Err(error) => CommandResult::failure("import", "persistence", error.to_string(), 8),
        }
    })
}

#[cfg(test)]
mod tests {
    use parley_db::repositories::{
        KnowledgeRepository, QaRepository, SqlKnowledgeRepository, SqlQaRepository,
    };
    use parley_db::{connect_with_settings, migrations};

    use super::{import_bundle, parse_bundle};

    const BUNDLE: &str = r#"{
        "bot": {"id": "shop-1", "name": "Shop helper", "bot_type": "support"},
        "qa_entries": [
            {"question": "Do you ship abroad?", "answer": "Yes, within the EU.", "verified": true},
            {
                "id": "returns",
                "question": "Can I return items?",
                "answer": "Within 30 days.",
                "confidence": 1.7
            }
        ],
        "knowledge_chunks": [
            {"title": "Shipping", "content": "We ship with PostNord.", "embedding": [0.1, 0.2]}
        ]
    }"#;

    #[test]
    fn records_get_positional_ids_and_clamped_confidence() {
        let bundle = parse_bundle(BUNDLE).expect("valid bundle");
        let (bot, qa, chunks) = bundle.into_records();

        assert_eq!(bot.id.0, "shop-1");
        assert_eq!(qa[0].id.0, "shop-1-qa-1");
        assert_eq!(qa[0].confidence, 1.0);
        assert_eq!(qa[0].source_type, "import");
        assert_eq!(qa[1].id.0, "returns");
        assert_eq!(qa[1].confidence, 1.0);
        assert!(!qa[1].verified);
        assert_eq!(chunks[0].id.0, "shop-1-chunk-1");
    }

    #[test]
    fn parse_rejects_blank_bot_id_and_blank_questions() {
        let blank_bot = r#"{"bot": {"id": " ", "name": "x", "bot_type": "knowledge"}}"#;
        assert!(parse_bundle(blank_bot).is_err());

        let blank_question = r#"{
            "bot": {"id": "b", "name": "x", "bot_type": "knowledge"},
            "qa_entries": [{"question": "", "answer": "orphan"}]
        }"#;
        let error = parse_bundle(blank_question).expect_err("blank question");
        assert!(error.contains("orphan"));
    }

    #[tokio::test]
    async fn import_is_repeatable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");

        for _ in 0..2 {
            let bundle = parse_bundle(BUNDLE).expect("valid bundle");
            let (bot_id, summary) = import_bundle(&pool, bundle).await.expect("import");
            assert_eq!(bot_id.0, "shop-1");
            assert_eq!(summary.qa_entries, 2);
        }

        let bot_id = parley_core::domain::bot::BotId("shop-1".to_string());
        let qa = SqlQaRepository::new(pool.clone()).list_by_bot(&bot_id).await.expect("qa");
        let chunks =
            SqlKnowledgeRepository::new(pool.clone()).list_by_bot(&bot_id).await.expect("chunks");
        assert_eq!(qa.len(), 2);
        assert_eq!(chunks.len(), 1);

        pool.close().await;
    }
}
