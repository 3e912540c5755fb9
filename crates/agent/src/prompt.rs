use parley_core::domain::bot::{BotConfig, BotType, ResponseLength};
use parley_core::domain::conversation::{ConversationTurn, Role};

use crate::intent::{actions_for, MARKER_PREFIX};
use crate::retrieval::GroundingBlock;
use crate::text::{mentions_business, normalize};

const DEFAULT_FALLBACK: &str = "If the information above does not answer the question, say that \
     you don't know and offer to connect the visitor with the team. Never invent facts.";

type SubtypeHint = fn(&BotConfig) -> String;

/// Extra instruction per (bot type, subtype). Unknown pairs contribute nothing.
const SUBTYPE_HINTS: &[(BotType, &str, SubtypeHint)] = &[
    (BotType::Knowledge, "faq", faq_hint),
    (BotType::Knowledge, "product_guide", product_guide_hint),
    (BotType::Lead, "b2b", b2b_lead_hint),
    (BotType::Lead, "real_estate", real_estate_hint),
    (BotType::Lead, "booking", booking_hint),
    (BotType::Support, "ecommerce", ecommerce_support_hint),
    (BotType::Support, "saas", saas_support_hint),
    (BotType::Workflow, "order_status", order_status_hint),
    (BotType::Workflow, "appointment", appointment_hint),
];

fn faq_hint(_: &BotConfig) -> String {
    "Prefer the curated answers; keep replies to the point.".to_string()
}

fn product_guide_hint(_: &BotConfig) -> String {
    "Help the visitor pick the right product and compare options honestly.".to_string()
}

fn b2b_lead_hint(bot: &BotConfig) -> String {
    format!(
        "Qualify business leads for {}: ask for company, role and needs before offering a meeting.",
        bot.name
    )
}

fn real_estate_hint(_: &BotConfig) -> String {
    "Ask about area, budget and move-in date before suggesting a viewing.".to_string()
}

fn booking_hint(_: &BotConfig) -> String {
    "Collect preferred date, time and contact details for the booking.".to_string()
}

fn ecommerce_support_hint(_: &BotConfig) -> String {
    "Ask for the order number when the question concerns a specific order.".to_string()
}

fn saas_support_hint(_: &BotConfig) -> String {
    "Ask which plan and which feature the visitor uses before troubleshooting.".to_string()
}

fn order_status_hint(_: &BotConfig) -> String {
    "Confirm the order number and email before discussing order details.".to_string()
}

fn appointment_hint(_: &BotConfig) -> String {
    "Confirm date, time and contact details before booking an appointment.".to_string()
}

pub fn subtype_hint(bot: &BotConfig) -> Option<String> {
    let subtype = bot.subtype.as_deref()?.trim().to_ascii_lowercase();
    SUBTYPE_HINTS
        .iter()
        .find(|(bot_type, name, _)| *bot_type == bot.bot_type && *name == subtype)
        .map(|(_, _, hint)| hint(bot))
}

fn base_instructions(bot: &BotConfig) -> String {
    let role = match bot.bot_type {
        BotType::Knowledge => "answer visitor questions using the company's own knowledge",
        BotType::Lead => "answer questions and turn interested visitors into qualified leads",
        BotType::Support => "resolve customer support questions and escalate what you cannot solve",
        BotType::Workflow => "answer questions and carry out simple tasks on the visitor's behalf",
    };
    format!("You are {}, a website assistant. Your job is to {role}.", bot.name)
}

#[derive(Clone, Debug, Default)]
pub struct PromptContext<'a> {
    pub tone_override: Option<&'a str>,
    pub locale: Option<&'a str>,
    pub history: &'a [ConversationTurn],
    pub blocks: &'a [GroundingBlock],
    pub personalization: Option<&'a str>,
    /// Current hour of day in UTC.
    pub hour: u32,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PromptComposer;

impl PromptComposer {
    pub fn new() -> Self {
        Self
    }

    pub fn compose(&self, bot: &BotConfig, context: &PromptContext<'_>) -> String {
        let mut sections = vec![base_instructions(bot)];

        if let Some(hint) = subtype_hint(bot) {
            sections.push(hint);
        }
        if !bot.policies.is_empty() {
            let policies: Vec<String> =
                bot.policies.iter().map(|policy| format!("- {policy}")).collect();
            sections.push(format!("Always follow these policies:\n{}", policies.join("\n")));
        }
        if let Some(company_url) = bot.company_url.as_deref() {
            sections.push(format!("The company website is {company_url}."));
        }
        if bot.bot_type.triggers_actions() {
            sections.push(action_protocol(bot.bot_type));
        }

        sections.push(format!("Tone: {}.", tone(bot, context)));
        sections.push(language_instruction(context.locale).to_string());
        sections.push(length_instruction(bot.response_length).to_string());

        for block in context.blocks {
            sections.push(block.render());
        }
        if let Some(note) = context.personalization {
            sections.push(note.to_string());
        }
        if let Some(hours) = bot.working_hours {
            if !hours.contains_hour(context.hour) {
                sections.push(format!(
                    "The team is currently offline (office hours {:02}:00-{:02}:00 UTC). \
                     Tell the visitor a human will follow up during office hours.",
                    hours.start_hour, hours.end_hour
                ));
            }
        }
        sections.push(match bot.fallback_message.as_deref() {
            Some(fallback) => format!(
                "If the information above does not answer the question, reply with: \"{fallback}\""
            ),
            None => DEFAULT_FALLBACK.to_string(),
        });

        sections.join("\n\n")
    }
}

/// Request tone, then bot tone, then a guess from the conversation.
fn tone(bot: &BotConfig, context: &PromptContext<'_>) -> String {
    let explicit = context
        .tone_override
        .or(bot.tone.as_deref())
        .map(str::trim)
        .filter(|tone| !tone.is_empty());
    if let Some(tone) = explicit {
        return tone.to_string();
    }

    let business = context
        .history
        .iter()
        .filter(|turn| turn.role == Role::User)
        .any(|turn| mentions_business(&normalize(&turn.content)));
    if business {
        "professional, precise and concise".to_string()
    } else {
        "friendly and helpful".to_string()
    }
}

fn language_instruction(locale: Option<&str>) -> &'static str {
    let locale = locale.map(|locale| locale.trim().to_ascii_lowercase()).unwrap_or_default();
    if locale.starts_with("sv") {
        "Always reply in Swedish."
    } else if locale.starts_with("en") {
        "Always reply in English."
    } else {
        "Reply in the same language as the user's latest message."
    }
}

fn length_instruction(length: ResponseLength) -> &'static str {
    match length {
        ResponseLength::Short => "Keep answers to at most 2 sentences.",
        ResponseLength::Normal => "Keep answers to at most 4 sentences.",
        ResponseLength::Long => "Answers may use up to 8 sentences when the question needs it.",
    }
}

fn action_protocol(bot_type: BotType) -> String {
    let actions = actions_for(bot_type).join(", ");
    format!(
        "When the visitor clearly asks for something you can act on, end your reply with \
         {MARKER_PREFIX}<NAME>{{json}} on its own, where NAME is one of: {actions}. Put the \
         details you collected in the JSON object, for example {MARKER_PREFIX}CREATE_TICKET\
         {{\"subject\":\"Broken zipper\",\"description\":\"...\"}}. Never mention the marker \
         to the visitor."
    )
}

#[cfg(test)]
mod tests {
    use parley_core::domain::bot::{BotConfig, BotType, ResponseLength, WorkingHours};
    use parley_core::domain::conversation::ConversationTurn;

    use super::{subtype_hint, PromptComposer, PromptContext};
    use crate::retrieval::GroundingBlock;

    fn bot() -> BotConfig {
        let mut bot = BotConfig::new("bot-1", "Nova", BotType::Support);
        bot.subtype = Some("ecommerce".to_string());
        bot.policies = vec!["Never promise refunds.".to_string()];
        bot
    }

    fn position(prompt: &str, needle: &str) -> usize {
        prompt.find(needle).unwrap_or_else(|| panic!("`{needle}` missing from prompt:\n{prompt}"))
    }

    #[test]
    fn sections_follow_fixed_precedence() {
        let history = [ConversationTurn::user("where is my parcel")];
        let blocks = [GroundingBlock::Authoritative {
            question: "Where is my order?".to_string(),
            answer: "Check the tracking link in your email.".to_string(),
        }];
        let mut bot = bot();
        bot.working_hours = Some(WorkingHours { start_hour: 8, end_hour: 17 });
        bot.fallback_message = Some("Email support@nova.se".to_string());

        let prompt = PromptComposer::new().compose(
            &bot,
            &PromptContext {
                locale: Some("sv-SE"),
                history: &history,
                blocks: &blocks,
                personalization: Some("This may be Erik returning."),
                hour: 22,
                ..PromptContext::default()
            },
        );

        let order = [
            position(&prompt, "You are Nova"),
            position(&prompt, "order number"),
            position(&prompt, "Never promise refunds."),
            position(&prompt, "ACTION-TOKEN:<NAME>"),
            position(&prompt, "Tone: friendly and helpful."),
            position(&prompt, "Always reply in Swedish."),
            position(&prompt, "at most 4 sentences"),
            position(&prompt, "AUTHORITATIVE ANSWER"),
            position(&prompt, "Erik returning"),
            position(&prompt, "currently offline"),
            position(&prompt, "Email support@nova.se"),
        ];
        assert!(order.windows(2).all(|pair| pair[0] < pair[1]), "out of order: {order:?}");
    }

    #[test]
    fn tone_prefers_request_then_bot_then_segment_guess() {
        let composer = PromptComposer::new();
        let history = [ConversationTurn::user("We need a quote for our company")];
        let mut bot = bot();

        let context = PromptContext { history: &history, ..PromptContext::default() };

        let guessed = composer.compose(&bot, &context);
        assert!(guessed.contains("Tone: professional, precise and concise."));

        bot.tone = Some("calm".to_string());
        let from_bot = composer.compose(&bot, &context);
        assert!(from_bot.contains("Tone: calm."));

        let from_request = composer
            .compose(&bot, &PromptContext { tone_override: Some("cheerful"), ..context.clone() });
        assert!(from_request.contains("Tone: cheerful."));
    }

    #[test]
    fn knowledge_bots_get_no_action_protocol_and_unknown_subtypes_no_hint() {
        let mut bot = BotConfig::new("bot-1", "Sage", BotType::Knowledge);
        bot.subtype = Some("astrology".to_string());
        bot.response_length = ResponseLength::Short;
        assert!(subtype_hint(&bot).is_none());

        let prompt = PromptComposer::new()
            .compose(&bot, &PromptContext { hour: 12, ..PromptContext::default() });
        assert!(!prompt.contains("ACTION-TOKEN"));
        assert!(prompt.contains("at most 2 sentences"));
        assert!(prompt.contains("same language as the user's latest message"));
        assert!(!prompt.contains("currently offline"));
    }
}
