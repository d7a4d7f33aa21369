/// Suffix dropped from producer names so that `PlayerBoxscoreProcessor` and `player_boxscore`
/// refer to the same producer.
const PRODUCER_SUFFIX: &str = "_processor";

/// Normalizes a producer name as reported by a producer into its canonical snake case form.
///
/// CamelCase is split into words, anything that is not alphanumeric becomes an underscore, runs
/// of underscores collapse, and a trailing `_processor` is dropped. Aliases are applied
/// afterwards by the stage catalog.
pub fn normalize_producer_name(raw: &str) -> String {
    let chars: Vec<char> = raw.trim().chars().collect();
    let mut normalized = String::with_capacity(chars.len() + 4);

    for (index, &c) in chars.iter().enumerate() {
        if c.is_alphanumeric() {
            if c.is_uppercase() && index > 0 {
                let previous = chars[index - 1];
                let next_is_lower = chars.get(index + 1).is_some_and(|n| n.is_lowercase());
                let starts_word = previous.is_lowercase()
                    || previous.is_ascii_digit()
                    || (previous.is_uppercase() && next_is_lower);

                if starts_word {
                    normalized.push('_');
                }
            }

            normalized.extend(c.to_lowercase());
        } else {
            normalized.push('_');
        }
    }

    let mut collapsed = String::with_capacity(normalized.len());
    for c in normalized.chars() {
        if c == '_' && (collapsed.is_empty() || collapsed.ends_with('_')) {
            continue;
        }
        collapsed.push(c);
    }

    let trimmed = collapsed.trim_end_matches('_');
    match trimmed.strip_suffix(PRODUCER_SUFFIX) {
        Some(stripped) if !stripped.is_empty() => stripped.to_string(),
        _ => trimmed.to_string(),
    }
}
