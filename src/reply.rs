//! splits a finished reply into its reasoning segment and the visible answer.

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";
const BLANK_LINE: &str = "\n\n";

/// reasoning this short (in chars) is treated as absent, e.g. `<think>\n\n</think>`.
pub const REASONING_MIN_LEN: usize = 2;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FinalReply {
    /// raw text of the first `<think>` region, when it says anything.
    pub reasoning: Option<String>,
    /// what gets rendered as markdown.
    pub visible: String,
}

impl FinalReply {
    /// takes out the first `<think>...</think>` region (shortest match, newlines included)
    /// and the blank line that usually trails it. text without a region passes through.
    /// only a `\n\n` directly after the region is dropped; blank lines elsewhere stay.
    pub fn extract(raw: &str) -> Self {
        let Some(open) = raw.find(THINK_OPEN) else {
            return Self { reasoning: None, visible: raw.to_string() };
        };
        let inner_start = open + THINK_OPEN.len();
        let Some(close_rel) = raw[inner_start..].find(THINK_CLOSE) else {
            return Self { reasoning: None, visible: raw.to_string() };
        };
        let inner_end = inner_start + close_rel;
        let region_end = inner_end + THINK_CLOSE.len();

        let inner = &raw[inner_start..inner_end];
        let after = &raw[region_end..];
        let after = after.strip_prefix(BLANK_LINE).unwrap_or(after);

        let mut visible = String::with_capacity(raw.len());
        visible.push_str(&raw[..open]);
        visible.push_str(after);

        let reasoning = (inner.chars().count() > REASONING_MIN_LEN).then(|| inner.to_string());
        Self { reasoning, visible }
    }

    pub fn has_reasoning(&self) -> bool {
        self.reasoning.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_reply_passes_through() {
        let reply = FinalReply::extract("Hi there!");
        assert_eq!(reply, FinalReply { reasoning: None, visible: "Hi there!".into() });
        assert!(!reply.has_reasoning());
    }

    #[test]
    fn think_region_is_split_out() {
        let raw = ["<think>reasoning text</think>", "Answer."].concat();
        let reply = FinalReply::extract(&raw);
        assert_eq!(reply.reasoning.as_deref(), Some("reasoning text"));
        assert_eq!(reply.visible, "Answer.");
    }

    #[test]
    fn trailing_blank_line_after_region_is_dropped() {
        let reply = FinalReply::extract("<think>\nstep 1\nstep 2\n</think>\n\nThe answer is 4.");
        assert_eq!(reply.reasoning.as_deref(), Some("\nstep 1\nstep 2\n"));
        assert_eq!(reply.visible, "The answer is 4.");
    }

    #[test]
    fn blank_lines_elsewhere_are_kept() {
        let reply = FinalReply::extract("<think>hmm, ok</think>First.\n\nSecond.");
        assert_eq!(reply.visible, "First.\n\nSecond.");

        let plain = FinalReply::extract("First.\n\nSecond.");
        assert_eq!(plain.visible, "First.\n\nSecond.");
    }

    #[test]
    fn trivial_reasoning_is_absent_but_region_still_removed() {
        let reply = FinalReply::extract("<think>\n\n</think>\n\nHello!");
        assert_eq!(reply, FinalReply { reasoning: None, visible: "Hello!".into() });

        let reply = FinalReply::extract("<think>ab</think>x");
        assert_eq!(reply, FinalReply { reasoning: None, visible: "x".into() });

        let reply = FinalReply::extract("<think>abc</think>x");
        assert_eq!(reply.reasoning.as_deref(), Some("abc"));
    }

    #[test]
    fn only_first_region_is_taken() {
        let reply = FinalReply::extract("a<think>one two</think>b<think>three</think>c");
        assert_eq!(reply.reasoning.as_deref(), Some("one two"));
        assert_eq!(reply.visible, "ab<think>three</think>c");
    }

    #[test]
    fn unterminated_region_is_left_alone() {
        let reply = FinalReply::extract("<think>still going");
        assert_eq!(reply, FinalReply { reasoning: None, visible: "<think>still going".into() });
    }

    #[test]
    fn region_removed_from_the_middle() {
        let reply = FinalReply::extract("before <think>reasoning text</think> after");
        assert_eq!(reply.reasoning.as_deref(), Some("reasoning text"));
        assert_eq!(reply.visible, "before  after");
    }
}
