use serde::{Deserialize, Serialize};

use crate::domain::bot::BotId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QaEntryId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkId(pub String);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QaEntry {
    pub id: QaEntryId,
    pub bot_id: BotId,
    pub question: String,
    pub answer: String,
    pub confidence: f32,
    pub verified: bool,
    pub hit_count: u64,
    pub source_type: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: ChunkId,
    pub bot_id: BotId,
    pub source_url: String,
    pub title: String,
    pub content: String,
    pub embedding: Vec<f32>,
}
