use std::sync::OnceLock;

use regex::Regex;

use parley_core::domain::conversation::ConversationTurn;

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid email regex")
    })
}

/// Seven or more digits, optionally separated by single spaces, dots, dashes or parens.
fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\+?\d(?:[\s().-]?\d){6,}").expect("valid phone regex"))
}

pub fn mask(text: &str) -> String {
    let without_emails = email_pattern().replace_all(text, "[email]");
    phone_pattern().replace_all(&without_emails, "[phone]").into_owned()
}

pub fn mask_history(history: &[ConversationTurn]) -> Vec<ConversationTurn> {
    history
        .iter()
        .map(|turn| ConversationTurn { content: mask(&turn.content), ..turn.clone() })
        .collect()
}
