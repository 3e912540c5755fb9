use std::borrow::Cow;

use parley_core::domain::bot::{BotConfig, PromptExperiment};
use parley_core::domain::session::SessionId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Variant {
    Control,
    Treatment,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Control => "a",
            Self::Treatment => "b",
        }
    }
}

/// Bucket in `0..100`, stable for a given experiment and session.
pub fn bucket(experiment_name: &str, session_id: &SessionId) -> u8 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(experiment_name.as_bytes());
    hasher.update(b":");
    hasher.update(session_id.0.as_bytes());
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.as_bytes()[..8]);
    (u64::from_le_bytes(prefix) % 100) as u8
}

pub fn select(experiment: &PromptExperiment, session_id: &SessionId) -> Variant {
    if bucket(&experiment.name, session_id) < experiment.traffic_pct {
        Variant::Treatment
    } else {
        Variant::Control
    }
}

/// The bot as this session should see it, with treatment overrides applied.
pub fn apply<'a>(
    bot: &'a BotConfig,
    session_id: &SessionId,
) -> (Cow<'a, BotConfig>, Option<Variant>) {
    let Some(experiment) = bot.experiment.as_ref() else {
        return (Cow::Borrowed(bot), None);
    };
    match select(experiment, session_id) {
        Variant::Control => (Cow::Borrowed(bot), Some(Variant::Control)),
        Variant::Treatment => {
            let mut effective = bot.clone();
            if let Some(tone) = &experiment.tone {
                effective.tone = Some(tone.clone());
            }
            if let Some(fallback) = &experiment.fallback_message {
                effective.fallback_message = Some(fallback.clone());
            }
            (Cow::Owned(effective), Some(Variant::Treatment))
        }
    }
}

#[cfg(test)]
mod tests {
    use parley_core::domain::bot::{BotConfig, BotType, PromptExperiment};
    use parley_core::domain::session::SessionId;

    use super::{apply, bucket, select, Variant};

    fn experiment(traffic_pct: u8) -> PromptExperiment {
        PromptExperiment {
            name: "warmer-tone".to_string(),
            traffic_pct,
            tone: Some("warm and playful".to_string()),
            fallback_message: None,
        }
    }

    #[test]
    fn selection_is_sticky_per_session() {
        let session = SessionId("session-42".to_string());
        let first = bucket("warmer-tone", &session);
        for _ in 0..5 {
            assert_eq!(bucket("warmer-tone", &session), first);
        }
        assert!(first < 100);
    }

    #[test]
    fn traffic_bounds_are_respected() {
        let session = SessionId("any".to_string());
        assert_eq!(select(&experiment(0), &session), Variant::Control);
        assert_eq!(select(&experiment(100), &session), Variant::Treatment);
    }

    #[test]
    fn treatment_overrides_tone_only_where_set() {
        let mut bot = BotConfig::new("bot-1", "Helper", BotType::Knowledge);
        bot.tone = Some("formal".to_string());
        bot.fallback_message = Some("Please email us.".to_string());
        bot.experiment = Some(experiment(100));

        let (effective, variant) = apply(&bot, &SessionId("s".to_string()));
        assert_eq!(variant, Some(Variant::Treatment));
        assert_eq!(effective.tone.as_deref(), Some("warm and playful"));
        assert_eq!(effective.fallback_message.as_deref(), Some("Please email us."));

        bot.experiment = None;
        let (effective, variant) = apply(&bot, &SessionId("s".to_string()));
        assert!(variant.is_none());
        assert_eq!(effective.tone.as_deref(), Some("formal"));
    }
}
