pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;

pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::approval::{ApprovalId, ApprovalRequest, ApprovalStatus};
pub use domain::bot::{
    BotConfig, BotId, BotType, IntegrationRef, Integrations, Plan, PromptExperiment,
    ResponseLength, WorkingHours,
};
pub use domain::conversation::{ConversationTurn, Role};
pub use domain::intent::{ActionSystem, Intent};
pub use domain::knowledge::{ChunkId, KnowledgeChunk, QaEntry, QaEntryId};
pub use domain::session::{Segment, Session, SessionId, SessionMetadata};
pub use domain::usage::{UsageFilter, UsageKind, UsageRecord};
pub use errors::{ApplicationError, DomainError, InterfaceError};
