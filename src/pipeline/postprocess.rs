//! Spoken-text cleanup of markdown returned by remote recognition services.
//!
//! Remote services answer with Markdown. Read aloud verbatim, the markup
//! turns into noise: asterisks, pipes, image placeholders and link targets.
//! These rules strip the markup while keeping the words. Heading markers
//! (`#`) are the one exception: narration relies on them to pick the
//! emphasised pacing, so they survive.
//!
//! Rules run in order; each is a pure `&str → String` pass:
//!
//! 1. Strip outer code fences
//! 2. Normalise line endings (CRLF → LF)
//! 3. Drop image embeds entirely, reduce links to their text
//! 4. Flatten table rows to comma-separated cells, drop separator rows
//! 5. Strip list bullets and block quotes
//! 6. Strip emphasis, inline code and inline HTML
//! 7. Remove invisible Unicode
//! 8. Trim lines and collapse runs of blank lines

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every cleanup rule to one page of markdown.
pub fn clean_for_speech(input: &str) -> String {
    let s = strip_markdown_fences(input);
    let s = normalise_line_endings(&s);
    let s = strip_images_and_links(&s);
    let s = flatten_tables(&s);
    let s = strip_block_markers(&s);
    let s = strip_inline_markup(&s);
    let s = remove_invisible_chars(&s);
    collapse_blank_lines(&s)
}

// ── Rule 1: Strip outer fences ──────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\r?\n(.*)\r?\n```\s*$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 2: Line endings ────────────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Images & links ──────────────────────────────────────────────────

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").unwrap());
static RE_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap());

fn strip_images_and_links(input: &str) -> String {
    let s = RE_IMAGE.replace_all(input, "");
    RE_LINK.replace_all(&s, "$1").to_string()
}

// ── Rule 4: Tables ──────────────────────────────────────────────────────────

fn is_table_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|') && trimmed.ends_with('|') && trimmed.len() > 1
}

fn is_separator_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|')
        && trimmed.contains('-')
        && trimmed
            .chars()
            .all(|c| c == '|' || c == '-' || c == ':' || c == ' ')
}

fn flatten_tables(input: &str) -> String {
    input
        .lines()
        .filter(|line| !is_separator_row(line))
        .map(|line| {
            if is_table_row(line) {
                line.trim()
                    .trim_matches('|')
                    .split('|')
                    .map(str::trim)
                    .filter(|cell| !cell.is_empty())
                    .collect::<Vec<_>>()
                    .join(", ")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Bullets & quotes ────────────────────────────────────────────────

static RE_BLOCK_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(\s*)(?:[-*+]\s+|>\s?|\d+[.)]\s+)").unwrap());

fn strip_block_markers(input: &str) -> String {
    RE_BLOCK_MARKER.replace_all(input, "$1").to_string()
}

// ── Rule 6: Inline markup ───────────────────────────────────────────────────

static RE_EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\*{1,3}|_{2,3}|~~|`+)").unwrap());
static RE_HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?[a-zA-Z][^>]*>").unwrap());

fn strip_inline_markup(input: &str) -> String {
    let s = RE_HTML_TAG.replace_all(input, " ");
    RE_EMPHASIS.replace_all(&s, "").to_string()
}

// ── Rule 7: Invisible characters ────────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 8: Whitespace ──────────────────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    let trimmed = input
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");
    RE_BLANK_LINES
        .replace_all(trimmed.trim(), "\n\n")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_outer_fences() {
        assert_eq!(strip_markdown_fences("```markdown\n# Hi\nthere\n```"), "# Hi\nthere");
        assert_eq!(strip_markdown_fences("```\nplain\n```"), "plain");
        assert_eq!(strip_markdown_fences("no fences"), "no fences");
    }

    #[test]
    fn images_vanish_and_links_keep_text() {
        let s = strip_images_and_links("See ![img-0.jpeg](img-0.jpeg) the [report](https://x.y/z).");
        assert_eq!(s, "See  the report.");
    }

    #[test]
    fn tables_become_cell_lists() {
        let s = flatten_tables("| Name | Age |\n| --- | :-: |\n| Sara | 31 |");
        assert_eq!(s, "Name, Age\nSara, 31");
    }

    #[test]
    fn bullets_and_quotes_are_stripped() {
        assert_eq!(strip_block_markers("- one\n* two\n> quoted\n3. three"), "one\ntwo\nquoted\nthree");
    }

    #[test]
    fn emphasis_code_and_tags_are_stripped() {
        assert_eq!(
            strip_inline_markup("**bold** and *it* and `code`<br>x"),
            "bold and it and code x"
        );
    }

    #[test]
    fn headings_survive_cleanup() {
        let out = clean_for_speech("# **Title**\r\n\r\n\r\n\r\nBody   \n## Part two");
        assert_eq!(out, "# Title\n\nBody\n## Part two");
    }

    #[test]
    fn invisible_characters_are_removed() {
        assert_eq!(remove_invisible_chars("a\u{200B}b\u{FEFF}c"), "abc");
    }

    #[test]
    fn arabic_text_is_untouched() {
        let text = "# عنوان\nنص عربي";
        assert_eq!(clean_for_speech(text), text);
    }
}
