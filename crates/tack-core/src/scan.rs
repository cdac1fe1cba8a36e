//! Pure content scanning: `@handles`, mention attachments and card references.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::id::{BoardId, CardId, CardNumber, UserId};
use crate::model::{Card, Comment, ContentRef, RichText};

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|err| unreachable!("invalid built-in pattern {pattern}: {err}"))
}

static TAG: LazyLock<Regex> = LazyLock::new(|| compile(r"<[^>]*>"));
static HANDLE: LazyLock<Regex> = LazyLock::new(|| compile(r"(?:^|[^\w@])@([\w.]+(?:@[\w.-]+)?)"));
static MENTION_ATTACHMENT: LazyLock<Regex> =
    LazyLock::new(|| compile(r#"data-mention-id\s*=\s*["']([^"']+)["']"#));
static CARD_REFERENCE: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)#(?:card-)?(\d+)"));
static CARD_ID_ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| compile(r#"data-card-id\s*=\s*["']?(\d+)(?:["'\s/>]|$)"#));
static HREF: LazyLock<Regex> = LazyLock::new(|| compile(r#"href\s*=\s*["']([^"']*)["']"#));
static HREF_FRAGMENT: LazyLock<Regex> = LazyLock::new(|| compile(r"#(\d+)$"));
static HREF_CARD_SCHEME: LazyLock<Regex> = LazyLock::new(|| compile(r"^card:(\d+)$"));

/// Bounds applied to every scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanLimits {
    /// Bytes of each body considered.
    pub max_scan_bytes: usize,
    /// Distinct card numbers considered.
    pub max_references: usize,
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            max_scan_bytes: 64 * 1024,
            max_references: 100,
        }
    }
}

/// Content whose bodies can reference users and cards.
pub trait LinkScannable {
    /// Reference to this content.
    fn content_ref(&self) -> ContentRef;
    /// Rich-text bodies to scan.
    fn rich_texts(&self) -> Vec<&RichText>;
    /// Card the content belongs to (itself for a card).
    fn owning_card(&self) -> CardId;
    /// Author of the content.
    fn author(&self) -> UserId;

    /// Digest over all bodies, compared against the last scan.
    fn content_digest(&self) -> String {
        let mut hasher = Sha256::new();
        for text in self.rich_texts() {
            hasher.update(text.digest().as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Content that can mention users.
pub trait Mentionable: LinkScannable {
    /// Board whose members may be mentioned.
    fn eligible_board(&self) -> BoardId;
}

impl LinkScannable for Card {
    fn content_ref(&self) -> ContentRef {
        ContentRef::Card(self.id)
    }

    fn rich_texts(&self) -> Vec<&RichText> {
        vec![&self.description]
    }

    fn owning_card(&self) -> CardId {
        self.id
    }

    fn author(&self) -> UserId {
        self.creator
    }
}

impl Mentionable for Card {
    fn eligible_board(&self) -> BoardId {
        self.board
    }
}

impl LinkScannable for Comment {
    fn content_ref(&self) -> ContentRef {
        ContentRef::Comment(self.id)
    }

    fn rich_texts(&self) -> Vec<&RichText> {
        vec![&self.body]
    }

    fn owning_card(&self) -> CardId {
        self.card
    }

    fn author(&self) -> UserId {
        self.creator
    }
}

impl Mentionable for Comment {
    fn eligible_board(&self) -> BoardId {
        self.board
    }
}

/// Raw references found in a piece of content, before resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// `@handles` in first-seen order, without the leading `@`.
    pub handles: Vec<String>,
    /// Users referenced by mention attachments.
    pub attachments: BTreeSet<UserId>,
    /// Referenced card numbers in first-seen order.
    pub card_numbers: Vec<CardNumber>,
}

/// Scan every body of `content` within `limits`.
pub fn scan<C: LinkScannable + ?Sized>(content: &C, limits: ScanLimits) -> ScanResult {
    let mut result = ScanResult::default();
    for text in content.rich_texts() {
        let markup = truncate(&text.markup, limits.max_scan_bytes);
        let plain = truncate(&text.plain_text, limits.max_scan_bytes);

        for handle in mention_handles(plain) {
            if !result.handles.contains(&handle) {
                result.handles.push(handle);
            }
        }
        result.attachments.extend(mention_attachments(markup));
        for number in card_numbers_in_text(plain).into_iter().chain(card_numbers_in_markup(markup)) {
            if !result.card_numbers.contains(&number) {
                result.card_numbers.push(number);
            }
        }
    }
    result.card_numbers.truncate(limits.max_references);
    result
}

/// Longest prefix of `text` within `max_bytes` that ends on a char boundary.
#[must_use]
pub fn truncate(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Remove tags, decode the common entities and collapse whitespace.
#[must_use]
pub fn strip_tags(markup: &str) -> String {
    let text = TAG.replace_all(markup, " ");
    let decoded = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `@handle` / `@handle@domain` tokens that start the text or follow a non-word character.
///
/// Trailing dots are trimmed; duplicates are kept once.
#[must_use]
pub fn mention_handles(text: &str) -> Vec<String> {
    let mut handles: Vec<String> = Vec::new();
    for captures in HANDLE.captures_iter(text) {
        let Some(handle) = captures.get(1) else {
            continue;
        };
        let handle = handle.as_str().trim_end_matches('.');
        if handle.is_empty() || handles.iter().any(|seen| seen == handle) {
            continue;
        }
        handles.push(handle.to_owned());
    }
    handles
}

/// Users referenced by `data-mention-id` attributes; unparseable ids are skipped.
#[must_use]
pub fn mention_attachments(markup: &str) -> BTreeSet<UserId> {
    MENTION_ATTACHMENT
        .captures_iter(markup)
        .filter_map(|captures| captures.get(1))
        .filter_map(|id| id.as_str().parse().ok())
        .collect()
}

/// `#123` and `#card-123` references in plain text.
#[must_use]
pub fn card_numbers_in_text(text: &str) -> Vec<CardNumber> {
    let mut numbers = Vec::new();
    push_numbers(&CARD_REFERENCE, text, &mut numbers);
    numbers
}

/// Card references in markup: `data-card-id`, `href` fragments and `card:` links, plus text nodes.
#[must_use]
pub fn card_numbers_in_markup(markup: &str) -> Vec<CardNumber> {
    let mut numbers = Vec::new();
    push_numbers(&CARD_ID_ATTRIBUTE, markup, &mut numbers);
    for href in HREF.captures_iter(markup).filter_map(|captures| captures.get(1)) {
        let href = href.as_str().trim();
        push_numbers(&HREF_FRAGMENT, href, &mut numbers);
        push_numbers(&HREF_CARD_SCHEME, href, &mut numbers);
    }
    push_numbers(&CARD_REFERENCE, &strip_tags(markup), &mut numbers);
    numbers
}

fn push_numbers(pattern: &Regex, haystack: &str, numbers: &mut Vec<CardNumber>) {
    for captures in pattern.captures_iter(haystack) {
        let Some(number) = captures.get(1).and_then(|digits| digits.as_str().parse().ok()) else {
            continue;
        };
        let number = CardNumber(number);
        if !numbers.contains(&number) {
            numbers.push(number);
        }
    }
}
