//! Recovers question/answer pairs from free-form model completions.
//!
//! Models are asked for a numbered `FLASHCARD n:` layout but do not always
//! comply, so three grammars are tried in priority order. The first grammar
//! that matches at least one block wins; results are never merged across
//! grammars.

use regex::Regex;
use std::sync::LazyLock;

use crate::models::FlashcardDraft;
use crate::text_normalizer::normalize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grammar {
    /// `FLASHCARD 1:` header, then `Q:` and `A:` lines.
    LabeledNumbered,
    /// `Q:` / `A:` pairs with no numbering; `Q:` may follow other text on
    /// its line, except a `1.` style list marker.
    BareQuestionAnswer,
    /// `1. Q: ... A: ...` numbered list.
    OrdinalList,
}

impl Grammar {
    pub fn as_str(&self) -> &'static str {
        match self {
            Grammar::LabeledNumbered => "labeled_numbered",
            Grammar::BareQuestionAnswer => "bare_question_answer",
            Grammar::OrdinalList => "ordinal_list",
        }
    }
}

/// Outcome of running the grammars over a completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Grammar that produced matches, if any did.
    pub grammar: Option<Grammar>,
    pub drafts: Vec<FlashcardDraft>,
    /// Matched blocks dropped because the question or answer was empty.
    pub rejected: usize,
}

struct GrammarRules {
    grammar: Grammar,
    /// Where a block begins; a block runs until the next start or end of input.
    block_start: Regex,
    /// Applied to a single block; group 1 is the question, group 2 the answer.
    block: Regex,
    /// Starts whose line prefix matches this still end the previous block but
    /// belong to another grammar, so they produce no block here.
    skip_prefix: Option<Regex>,
}

impl GrammarRules {
    fn new(grammar: Grammar, block_start: &str, block: &str) -> Self {
        Self {
            grammar,
            block_start: Regex::new(block_start).expect("invalid block start pattern"),
            block: Regex::new(block).expect("invalid block pattern"),
            skip_prefix: None,
        }
    }

    fn skipping(mut self, prefix: &str) -> Self {
        self.skip_prefix = Some(Regex::new(prefix).expect("invalid skip prefix pattern"));
        self
    }

    fn match_blocks<'t>(&self, text: &'t str) -> Vec<(&'t str, &'t str)> {
        let starts: Vec<(usize, bool)> = self
            .block_start
            .find_iter(text)
            .map(|m| {
                let skipped = self
                    .skip_prefix
                    .as_ref()
                    .is_some_and(|skip| skip.is_match(line_prefix(text, m.start())));
                (m.start(), skipped)
            })
            .collect();

        starts
            .iter()
            .enumerate()
            .filter(|(_, (_, skipped))| !skipped)
            .filter_map(|(i, &(start, _))| {
                let end = starts
                    .get(i + 1)
                    .map(|&(next, _)| block_end(text, start, next))
                    .unwrap_or(text.len());
                let captures = self.block.captures(&text[start..end])?;
                Some((captures.get(1)?.as_str(), captures.get(2)?.as_str()))
            })
            .collect()
    }
}

fn line_start(text: &str, pos: usize) -> usize {
    text[..pos].rfind('\n').map_or(0, |newline| newline + 1)
}

/// Text between the start of the line holding `pos` and `pos` itself.
fn line_prefix(text: &str, pos: usize) -> &str {
    &text[line_start(text, pos)..pos]
}

/// End of the block starting at `start` when the next block starts at `next`.
/// Lead-in text on the next start's own line (a header, a list marker) is cut
/// off unless that line still carries this block's answer.
fn block_end(text: &str, start: usize, next: usize) -> usize {
    let line = line_start(text, next);
    if line > start && !text[line..next].contains("A:") {
        line
    } else {
        next
    }
}

static GRAMMARS: LazyLock<[GrammarRules; 3]> = LazyLock::new(|| {
    [
        GrammarRules::new(
            Grammar::LabeledNumbered,
            r"FLASHCARD\s+\d+:",
            r"(?s)\AFLASHCARD\s+\d+:[^\S\n]*\n\s*Q:(.*?)\n\s*A:(.*)\z",
        ),
        GrammarRules::new(
            Grammar::BareQuestionAnswer,
            r"Q:",
            r"(?s)\AQ:(.*?)\n\s*A:(.*)\z",
        )
        .skipping(r"\A[ \t]*\d+\.[ \t]*\z"),
        GrammarRules::new(
            Grammar::OrdinalList,
            r"(?m)^[ \t]*\d+\.\s*Q:",
            r"(?s)\A[ \t]*\d+\.\s*Q:(.*?)\n\s*A:(.*)\z",
        ),
    ]
});

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("invalid whitespace pattern"));

/// Extract flashcard drafts from a completion. Returns an empty vector when
/// nothing recognisable is found.
pub fn extract(completion: &str) -> Vec<FlashcardDraft> {
    extract_with_grammar(completion).drafts
}

/// Like [`extract`], but also reports which grammar matched and how many
/// blocks were rejected.
pub fn extract_with_grammar(completion: &str) -> Extraction {
    for rules in GRAMMARS.iter() {
        let blocks = rules.match_blocks(completion);
        if blocks.is_empty() {
            continue;
        }

        let matched = blocks.len();
        let drafts: Vec<FlashcardDraft> = blocks
            .into_iter()
            .filter_map(|(question, answer)| {
                let question = clean_field(question);
                let answer = clean_field(answer);
                if question.is_empty() || answer.is_empty() {
                    None
                } else {
                    Some(FlashcardDraft { question, answer })
                }
            })
            .collect();

        return Extraction {
            grammar: Some(rules.grammar),
            rejected: matched - drafts.len(),
            drafts,
        };
    }

    Extraction {
        grammar: None,
        drafts: Vec::new(),
        rejected: 0,
    }
}

/// Collapse whitespace runs (newlines included) to one space, then normalize.
fn clean_field(raw: &str) -> String {
    let collapsed = WHITESPACE_RUN.replace_all(raw.trim(), " ");
    normalize(&collapsed)
}
