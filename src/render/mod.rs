//! markdown -> rich text.
//!
//! the output is a flat list of styled blocks that the panel turns into ui
//! text nodes. parsing is done with `pulldown-cmark`; fenced code goes through
//! [`highlight`].

pub mod highlight;

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpanStyle {
    pub strong: bool,
    pub emphasis: bool,
    pub strikethrough: bool,
    pub code: bool,
    pub link: bool,
    /// explicit rgb, set by the code highlighter.
    pub color: Option<[u8; 3]>,
}

impl SpanStyle {
    pub fn code() -> Self {
        Self { code: true, ..Default::default() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StyledSpan {
    pub text: String,
    pub style: SpanStyle,
}

impl StyledSpan {
    pub fn new(text: impl Into<String>, style: SpanStyle) -> Self {
        Self { text: text.into(), style }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Block {
    Paragraph(Vec<StyledSpan>),
    Heading { level: u8, spans: Vec<StyledSpan> },
    /// `marker` is empty for continuation paragraphs of the same item.
    ListItem { depth: usize, marker: String, spans: Vec<StyledSpan> },
    Quote(Vec<StyledSpan>),
    Code { lang: String, lines: Vec<Vec<StyledSpan>> },
    TableRow { header: bool, cells: Vec<Vec<StyledSpan>> },
    Rule,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RichText {
    pub blocks: Vec<Block>,
}

fn spans_text(spans: &[StyledSpan]) -> String {
    spans.iter().map(|s| s.text.as_str()).collect()
}

impl RichText {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// unstyled text, one line per block (code blocks keep their lines).
    pub fn plain_text(&self) -> String {
        let mut lines: Vec<String> = Vec::new();
        for block in &self.blocks {
            match block {
                Block::Paragraph(spans) | Block::Quote(spans) => lines.push(spans_text(spans)),
                Block::Heading { spans, .. } => lines.push(spans_text(spans)),
                Block::ListItem { marker, spans, .. } => {
                    lines.push(format!("{marker}{}", spans_text(spans)))
                }
                Block::Code { lines: code, .. } => {
                    lines.extend(code.iter().map(|l| spans_text(l)))
                }
                Block::TableRow { cells, .. } => lines.push(
                    cells.iter().map(|c| spans_text(c)).collect::<Vec<_>>().join(" | "),
                ),
                Block::Rule => lines.push("---".into()),
            }
        }
        lines.join("\n")
    }
}

struct ListState {
    next: Option<u64>,
}

#[derive(Default)]
struct Builder {
    blocks: Vec<Block>,
    spans: Vec<StyledSpan>,
    strong: u32,
    emphasis: u32,
    strike: u32,
    link: u32,
    heading: Option<u8>,
    quote: u32,
    lists: Vec<ListState>,
    item_marker: Option<String>,
    code: Option<(String, String)>,
    table_cells: Vec<Vec<StyledSpan>>,
    table_head: bool,
}

impl Builder {
    fn style(&self) -> SpanStyle {
        SpanStyle {
            strong: self.strong > 0 || self.heading.is_some(),
            emphasis: self.emphasis > 0,
            strikethrough: self.strike > 0,
            link: self.link > 0,
            ..Default::default()
        }
    }

    fn push_text(&mut self, text: &str, style: SpanStyle) {
        if let Some(last) = self.spans.last_mut()
            && last.style == style
        {
            last.text.push_str(text);
            return;
        }
        self.spans.push(StyledSpan::new(text, style));
    }

    /// closes the current run of inline spans into whatever block we are inside.
    fn flush(&mut self) {
        if self.spans.is_empty() {
            return;
        }
        let spans = std::mem::take(&mut self.spans);
        let block = if let Some(level) = self.heading {
            Block::Heading { level, spans }
        } else if !self.lists.is_empty() {
            Block::ListItem {
                depth: self.lists.len() - 1,
                marker: self.item_marker.take().unwrap_or_default(),
                spans,
            }
        } else if self.quote > 0 {
            Block::Quote(spans)
        } else {
            Block::Paragraph(spans)
        };
        self.blocks.push(block);
    }

    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => {
                if let Some((_, code)) = self.code.as_mut() {
                    code.push_str(&text);
                } else {
                    let style = self.style();
                    self.push_text(&text, style);
                }
            }
            Event::Code(text) => {
                let style = SpanStyle { code: true, ..self.style() };
                self.push_text(&text, style);
            }
            Event::Html(html) => {
                let style = self.style();
                self.push_text(html.trim_end_matches('\n'), style);
            }
            Event::SoftBreak => {
                let style = self.style();
                self.push_text(" ", style);
            }
            Event::HardBreak => {
                let style = self.style();
                self.push_text("\n", style);
            }
            Event::TaskListMarker(done) => {
                let style = self.style();
                self.push_text(if done { "[x] " } else { "[ ] " }, style);
            }
            Event::Rule => {
                self.flush();
                self.blocks.push(Block::Rule);
            }
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph => {}
            Tag::Heading { level, .. } => {
                self.flush();
                self.heading = Some(level as u8);
            }
            Tag::BlockQuote => {
                self.flush();
                self.quote += 1;
            }
            Tag::CodeBlock(kind) => {
                self.flush();
                let lang = match kind {
                    CodeBlockKind::Fenced(info) => {
                        info.split_whitespace().next().unwrap_or_default().to_string()
                    }
                    CodeBlockKind::Indented => String::new(),
                };
                self.code = Some((lang, String::new()));
            }
            Tag::List(start) => {
                self.flush();
                self.lists.push(ListState { next: start });
            }
            Tag::Item => {
                self.flush();
                let depth = self.lists.len().saturating_sub(1);
                let indent = "  ".repeat(depth);
                let marker = match self.lists.last_mut() {
                    Some(ListState { next: Some(n) }) => {
                        let m = format!("{indent}{n}. ");
                        *n += 1;
                        m
                    }
                    _ => format!("{indent}• "),
                };
                self.item_marker = Some(marker);
            }
            Tag::TableHead => {
                self.table_head = true;
                self.table_cells.clear();
            }
            Tag::TableRow => self.table_cells.clear(),
            Tag::TableCell => self.spans.clear(),
            Tag::Emphasis => self.emphasis += 1,
            Tag::Strong => self.strong += 1,
            Tag::Strikethrough => self.strike += 1,
            Tag::Link { .. } => self.link += 1,
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph => self.flush(),
            TagEnd::Heading(_) => {
                self.flush();
                self.heading = None;
            }
            TagEnd::BlockQuote => {
                self.flush();
                self.quote = self.quote.saturating_sub(1);
            }
            TagEnd::CodeBlock => {
                if let Some((lang, code)) = self.code.take() {
                    let lines = highlight::highlight_code(&code, &lang);
                    self.blocks.push(Block::Code { lang, lines });
                }
            }
            TagEnd::List(_) => {
                self.flush();
                self.lists.pop();
            }
            TagEnd::Item => {
                self.flush();
                self.item_marker = None;
            }
            TagEnd::TableCell => {
                let cell = std::mem::take(&mut self.spans);
                self.table_cells.push(cell);
            }
            TagEnd::TableHead | TagEnd::TableRow => {
                let cells = std::mem::take(&mut self.table_cells);
                self.blocks.push(Block::TableRow { header: self.table_head, cells });
                self.table_head = false;
            }
            TagEnd::Emphasis => self.emphasis = self.emphasis.saturating_sub(1),
            TagEnd::Strong => self.strong = self.strong.saturating_sub(1),
            TagEnd::Strikethrough => self.strike = self.strike.saturating_sub(1),
            TagEnd::Link => self.link = self.link.saturating_sub(1),
            _ => {}
        }
    }
}

pub fn render_markdown(source: &str) -> RichText {
    let options = Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES | Options::ENABLE_TASKLISTS;
    let mut builder = Builder::default();
    for event in Parser::new_ext(source, options) {
        builder.event(event);
    }
    builder.flush();
    RichText { blocks: builder.blocks }
}
