use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSystem {
    Ticketing,
    Crm,
    Invoicing,
    Catalog,
    Webhook,
}

impl ActionSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ticketing => "ticketing",
            Self::Crm => "crm",
            Self::Invoicing => "invoicing",
            Self::Catalog => "catalog",
            Self::Webhook => "webhook",
        }
    }
}

/// Structured action extracted from a generated reply. Never persisted on its own.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<ActionSystem>,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl Intent {
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.as_ref()?.get(key)?.as_str().map(str::trim).filter(|value| !value.is_empty())
    }
}
