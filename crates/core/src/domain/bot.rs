use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BotId(pub String);

impl std::fmt::Display for BotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotType {
    Knowledge,
    Lead,
    Support,
    Workflow,
}

impl BotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Knowledge => "knowledge",
            Self::Lead => "lead",
            Self::Support => "support",
            Self::Workflow => "workflow",
        }
    }

    /// Bot types whose replies may carry an action marker.
    pub fn triggers_actions(&self) -> bool {
        !matches!(self, Self::Knowledge)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    #[default]
    Free,
    Starter,
    Premium,
}

impl Plan {
    pub fn has_daily_caps(&self) -> bool {
        !matches!(self, Self::Premium)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseLength {
    Short,
    #[default]
    Normal,
    Long,
}

/// Working window in whole UTC hours. `start_hour > end_hour` wraps midnight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHours {
    pub start_hour: u8,
    pub end_hour: u8,
}

impl WorkingHours {
    pub fn contains_hour(&self, hour: u32) -> bool {
        let start = u32::from(self.start_hour);
        let end = u32::from(self.end_hour);
        if start == end {
            return true;
        }
        if start < end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }
}

/// Reference to an external integration. `credential_ref` names the environment
/// variable that holds the bearer token; the secret itself never lives in config rows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationRef {
    pub endpoint: String,
    #[serde(default)]
    pub credential_ref: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integrations {
    #[serde(default)]
    pub commerce: Option<IntegrationRef>,
    #[serde(default)]
    pub ticketing: Option<IntegrationRef>,
    #[serde(default)]
    pub crm: Option<IntegrationRef>,
    #[serde(default)]
    pub webhook: Option<IntegrationRef>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptExperiment {
    pub name: String,
    pub traffic_pct: u8,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub fallback_message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotConfig {
    pub id: BotId,
    pub name: String,
    pub bot_type: BotType,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub policies: Vec<String>,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub plan: Plan,
    #[serde(default)]
    pub require_approval: bool,
    #[serde(default)]
    pub company_url: Option<String>,
    #[serde(default)]
    pub response_length: ResponseLength,
    #[serde(default)]
    pub working_hours: Option<WorkingHours>,
    #[serde(default)]
    pub fallback_message: Option<String>,
    #[serde(default)]
    pub integrations: Integrations,
    #[serde(default)]
    pub experiment: Option<PromptExperiment>,
}

impl BotConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, bot_type: BotType) -> Self {
        Self {
            id: BotId(id.into()),
            name: name.into(),
            bot_type,
            subtype: None,
            policies: Vec::new(),
            tone: None,
            plan: Plan::Free,
            require_approval: false,
            company_url: None,
            response_length: ResponseLength::Normal,
            working_hours: None,
            fallback_message: None,
            integrations: Integrations::default(),
            experiment: None,
        }
    }
}
