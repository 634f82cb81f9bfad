//! Post-processing for chat-model output.
//!
//! Chat models tend to wrap the prompt in markdown and conversational
//! filler ("Sure! Here's a prompt: ..."). This strips header markers, bold
//! markers and wrapping quotes, and drops a known lead-in phrase together with
//! everything up to the first colon or newline after it. The lead-in cut is a
//! plain prefix heuristic: it does not look at what the colon belongs to.

/// Conversational openers, matched case-insensitively at the start of the text.
const LEAD_INS: &[&str] = &[
    "here is",
    "here's",
    "here are",
    "sure",
    "certainly",
    "absolutely",
    "of course",
    "okay",
    "below is",
    "the following is",
    "generated prompt",
    "image prompt",
    "prompt",
];

const QUOTE_PAIRS: &[(char, char)] = &[('"', '"'), ('\'', '\''), ('“', '”'), ('`', '`')];

/// Normalize a raw chat completion into a bare prompt.
pub fn clean_prompt(raw: &str) -> String {
    let text = strip_headers(raw).replace("**", "").replace("__", "");
    let text = strip_lead_in(text.trim());
    strip_wrapping_quotes(text.trim()).trim().to_string()
}

/// Remove leading `#` markers from markdown heading lines.
fn strip_headers(text: &str) -> String {
    text.lines()
        .map(|line| {
            let trimmed = line.trim_start();
            if trimmed.starts_with('#') {
                trimmed.trim_start_matches('#').trim_start()
            } else {
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_lead_in(text: &str) -> &str {
    for prefix in LEAD_INS {
        let matches = text
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix));
        if !matches {
            continue;
        }
        let rest = &text[prefix.len()..];
        return match rest.find([':', '\n']) {
            Some(idx) => &rest[idx + 1..],
            None => text,
        };
    }
    text
}

fn strip_wrapping_quotes(text: &str) -> &str {
    for &(open, close) in QUOTE_PAIRS {
        if let Some(inner) = text
            .strip_prefix(open)
            .and_then(|rest| rest.strip_suffix(close))
        {
            return inner;
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_lead_in_and_colon() {
        assert_eq!(
            clean_prompt("Here is the prompt: A red bicycle..."),
            "A red bicycle..."
        );
    }

    #[test]
    fn test_strips_bold_markers() {
        assert_eq!(clean_prompt("**Bold** text"), "Bold text");
    }

    #[test]
    fn test_strips_header_line_lead_in() {
        assert_eq!(
            clean_prompt("## Prompt\nA castle at dusk, volumetric light"),
            "A castle at dusk, volumetric light"
        );
    }

    #[test]
    fn test_strips_wrapping_quotes() {
        assert_eq!(clean_prompt("\"A quiet harbor at dawn\""), "A quiet harbor at dawn");
        assert_eq!(clean_prompt("“Misty pines”"), "Misty pines");
    }

    #[test]
    fn test_combined_chatty_response() {
        let raw = "Sure! Here's a prompt for this image:\n\n\"**Neon** city at night, rain-slick streets\"";
        assert_eq!(clean_prompt(raw), "Neon city at night, rain-slick streets");
    }

    #[test]
    fn test_lead_in_is_case_insensitive() {
        assert_eq!(clean_prompt("CERTAINLY: an oil painting"), "an oil painting");
    }

    #[test]
    fn test_text_without_lead_in_is_untouched() {
        assert_eq!(
            clean_prompt("A cat: sitting on a windowsill"),
            "A cat: sitting on a windowsill"
        );
    }

    #[test]
    fn test_lead_in_without_separator_is_kept() {
        assert_eq!(clean_prompt("Sure thing"), "Sure thing");
    }

    #[test]
    fn test_lead_in_cut_at_first_colon_even_if_unrelated() {
        assert_eq!(
            clean_prompt("Here is a 16:9 landscape: mountains"),
            "9 landscape: mountains"
        );
    }

    #[test]
    fn test_prompt_lead_in_matches_words_starting_with_prompt() {
        assert_eq!(
            clean_prompt("Prompts of light: a glowing forest"),
            "a glowing forest"
        );
        assert_eq!(clean_prompt("Promptly lit alley"), "Promptly lit alley");
    }

    #[test]
    fn test_non_ascii_text_does_not_panic() {
        assert_eq!(clean_prompt("Ünïcödé scene"), "Ünïcödé scene");
        assert_eq!(clean_prompt("é"), "é");
    }
}
