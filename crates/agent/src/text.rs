/// Lowercases, turns punctuation into spaces and collapses whitespace.
pub fn normalize(text: &str) -> String {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.chars() {
        if character.is_alphanumeric() {
            sanitized.extend(character.to_lowercase());
        } else {
            sanitized.push(' ');
        }
    }
    sanitized.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

const BUSINESS_KEYWORDS: &[&str] = &[
    "company",
    "business",
    "invoice",
    "b2b",
    "enterprise",
    "organization",
    "organisation",
    "procurement",
    "vat",
    "wholesale",
    "företag",
    "faktura",
    "moms",
    "bolag",
    "grossist",
];

pub fn mentions_business(normalized: &str) -> bool {
    normalized.split(' ').any(|token| BUSINESS_KEYWORDS.contains(&token))
}
