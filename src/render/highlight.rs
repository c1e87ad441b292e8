//! code block highlighting with [syntect].
//!
//! the grammar set and theme are loaded once per process on first use.
//! unknown languages and oversized blocks come back as plain code lines.

use std::sync::OnceLock;

use syntect::easy::HighlightLines;
use syntect::highlighting::{FontStyle, Style as SyntectStyle, Theme, ThemeSet};
use syntect::parsing::{SyntaxReference, SyntaxSet};
use syntect::util::LinesWithEndings;

use super::{SpanStyle, StyledSpan};

pub const THEME_NAME: &str = "base16-ocean.dark";

const MAX_HIGHLIGHT_BYTES: usize = 256 * 1024;
const MAX_HIGHLIGHT_LINES: usize = 5_000;

static SYNTAX_SET: OnceLock<SyntaxSet> = OnceLock::new();
static THEME: OnceLock<Theme> = OnceLock::new();

fn syntax_set() -> &'static SyntaxSet {
    SYNTAX_SET.get_or_init(SyntaxSet::load_defaults_newlines)
}

fn theme() -> &'static Theme {
    THEME.get_or_init(|| {
        let mut themes = ThemeSet::load_defaults();
        themes.themes.remove(THEME_NAME).unwrap_or_default()
    })
}

fn find_syntax(lang: &str) -> Option<&'static SyntaxReference> {
    let lang = lang.trim();
    if lang.is_empty() {
        return None;
    }
    let ss = syntax_set();
    let patched = match lang {
        "golang" => "go",
        "python3" | "py" => "python",
        "shell" | "sh" | "zsh" => "bash",
        "rs" => "rust",
        _ => lang,
    };
    ss.find_syntax_by_token(patched)
        .or_else(|| ss.find_syntax_by_name(patched))
        .or_else(|| {
            let lower = patched.to_ascii_lowercase();
            ss.syntaxes().iter().find(|s| s.name.to_ascii_lowercase() == lower)
        })
        .or_else(|| ss.find_syntax_by_extension(lang))
}

fn convert_style(style: SyntectStyle) -> SpanStyle {
    let fg = style.foreground;
    SpanStyle {
        code: true,
        strong: style.font_style.contains(FontStyle::BOLD),
        emphasis: style.font_style.contains(FontStyle::ITALIC),
        color: (fg.a > 0).then_some([fg.r, fg.g, fg.b]),
        ..Default::default()
    }
}

fn plain_lines(code: &str) -> Vec<Vec<StyledSpan>> {
    code.lines()
        .map(|line| vec![StyledSpan::new(line, SpanStyle::code())])
        .collect()
}

fn highlight_lines(code: &str, lang: &str) -> Option<Vec<Vec<StyledSpan>>> {
    if code.is_empty()
        || code.len() > MAX_HIGHLIGHT_BYTES
        || code.lines().count() > MAX_HIGHLIGHT_LINES
    {
        return None;
    }
    let syntax = find_syntax(lang)?;
    let mut h = HighlightLines::new(syntax, theme());

    let mut lines = Vec::new();
    for line in LinesWithEndings::from(code) {
        let ranges = h.highlight_line(line, syntax_set()).ok()?;
        let spans: Vec<StyledSpan> = ranges
            .into_iter()
            .filter_map(|(style, text)| {
                let text = text.trim_end_matches(['\n', '\r']);
                (!text.is_empty()).then(|| StyledSpan::new(text, convert_style(style)))
            })
            .collect();
        lines.push(spans);
    }
    Some(lines)
}

/// one entry per source line; each line is a run of styled spans.
pub fn highlight_code(code: &str, lang: &str) -> Vec<Vec<StyledSpan>> {
    highlight_lines(code, lang).unwrap_or_else(|| plain_lines(code))
}
