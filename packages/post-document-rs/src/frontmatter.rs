//! Metadata header codec.
//!
//! A stored post is an optional header block delimited by `---` lines followed by
//! the body text. The header holds one `key: value` pair per line; values are
//! strings, booleans, numbers, string lists, or null. Parsing never fails: input
//! the codec cannot interpret degrades to an empty mapping or a plain string.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const HEADER_DELIMITER: &str = "---";
pub const DEFAULT_TITLE: &str = "Untitled Post";
pub const NEW_POST_BODY: &str = "\nStart writing here...\n";

// ===== Types =====

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    StringList(Vec<String>),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::StringList(values) => Some(values),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<String>> for MetadataValue {
    fn from(values: Vec<String>) -> Self {
        Self::StringList(values)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl MetadataValue {
    /// Empty list elements are never written, matching what parsing keeps.
    fn normalized(self) -> Self {
        match self {
            Self::StringList(items) => {
                Self::StringList(items.into_iter().filter(|item| !item.is_empty()).collect())
            }
            other => other,
        }
    }
}

/// Header keys live on one line and are trimmed. Returns `None` for a key that
/// would be empty, since such lines are dropped when parsed.
pub fn normalize_key(key: &str) -> Option<String> {
    let single_line: String = key
        .chars()
        .map(|ch| if ch == '\n' || ch == '\r' { ' ' } else { ch })
        .collect();
    let trimmed = single_line.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Insertion-ordered header mapping. Replacing a key keeps its position.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "IndexMap<String, MetadataValue>",
    into = "IndexMap<String, MetadataValue>"
)]
pub struct MetadataMap(IndexMap<String, MetadataValue>);

impl MetadataMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(MetadataValue::as_str)
    }

    /// Inserts under the normalized key. Returns false, leaving the map untouched,
    /// when the key normalizes to nothing.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> bool {
        let key = key.into();
        let Some(key) = normalize_key(&key) else {
            tracing::debug!("ignoring metadata entry with an empty key");
            return false;
        };
        self.0.insert(key, value.into().normalized());
        true
    }

    pub fn remove(&mut self, key: &str) -> Option<MetadataValue> {
        let key = normalize_key(key)?;
        self.0.shift_remove(&key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<IndexMap<String, MetadataValue>> for MetadataMap {
    fn from(entries: IndexMap<String, MetadataValue>) -> Self {
        entries.into_iter().collect()
    }
}

impl From<MetadataMap> for IndexMap<String, MetadataValue> {
    fn from(metadata: MetadataMap) -> Self {
        metadata.0
    }
}

impl<K: Into<String>, V: Into<MetadataValue>> FromIterator<(K, V)> for MetadataMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, value) in iter {
            map.set(key, value);
        }
        map
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ParsedDocument {
    pub metadata: MetadataMap,
    pub body: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Published,
    Archived,
}

impl PostStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Archived => "archived",
        }
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "draft" => Ok(Self::Draft),
            "published" => Ok(Self::Published),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown post status: {other}")),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FrontmatterValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

// ===== Parse =====

/// Splits stored text into its header mapping and body. Text without a complete
/// header block is returned whole as the body with an empty mapping.
pub fn parse_document(stored: &str) -> ParsedDocument {
    match split_header(stored) {
        Some((header, body)) => ParsedDocument {
            metadata: parse_header_block(header),
            body: body.to_string(),
        },
        None => ParsedDocument {
            metadata: MetadataMap::new(),
            body: stored.to_string(),
        },
    }
}

fn is_delimiter(line: &str) -> bool {
    line.trim_end() == HEADER_DELIMITER
}

fn split_header(stored: &str) -> Option<(&str, &str)> {
    let first_end = stored.find('\n')?;
    if !is_delimiter(&stored[..first_end]) {
        return None;
    }

    let header_start = first_end + 1;
    let mut offset = header_start;
    loop {
        let line_end = stored[offset..].find('\n').map(|index| offset + index);
        let line = &stored[offset..line_end.unwrap_or(stored.len())];
        if is_delimiter(line) {
            let body_start = line_end.map_or(stored.len(), |end| end + 1);
            return Some((&stored[header_start..offset], &stored[body_start..]));
        }
        match line_end {
            Some(end) => offset = end + 1,
            None => break,
        }
    }

    tracing::debug!("header block is not terminated; treating the whole document as body");
    None
}

fn parse_header_block(header: &str) -> MetadataMap {
    let mut metadata = MetadataMap::new();
    let mut pending_list: Option<(String, Vec<String>)> = None;

    for line in header.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some((_, items)) = pending_list.as_mut() {
            if let Some(item) = trimmed.strip_prefix("- ") {
                let item = unquote_item(item.trim());
                if !item.is_empty() {
                    items.push(item);
                }
                continue;
            }
        }
        if let Some((key, items)) = pending_list.take() {
            if !items.is_empty() {
                metadata.set(key, MetadataValue::StringList(items));
            }
        }

        let Some((key, raw)) = split_key_value(trimmed) else {
            tracing::debug!(line = trimmed, "dropping header line without a key");
            continue;
        };
        let Some(key) = normalize_key(&key) else {
            tracing::debug!(line = trimmed, "dropping header line with an empty key");
            continue;
        };

        let raw = raw.trim();
        metadata.set(key.as_str(), parse_value(raw));
        if raw.is_empty() {
            pending_list = Some((key, Vec::new()));
        }
    }

    if let Some((key, items)) = pending_list {
        if !items.is_empty() {
            metadata.set(key, MetadataValue::StringList(items));
        }
    }

    metadata
}

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[-+]?(?:[0-9]+(?:\.[0-9]*)?|\.[0-9]+)(?:[eE][-+]?[0-9]+)?$").unwrap()
});

/// Splits `key: value`. A key written in double quotes may itself contain `:`.
fn split_key_value(line: &str) -> Option<(String, &str)> {
    if let Some(rest) = line.strip_prefix('"') {
        if let Some(end) = closing_quote(rest) {
            if let Some(value) = rest[end + 1..].trim_start().strip_prefix(':') {
                return Some((unescape(&rest[..end]), value));
            }
        }
    }
    line.split_once(':')
        .map(|(key, value)| (key.to_string(), value))
}

/// Byte index of the first unescaped `"` in `text`.
fn closing_quote(text: &str) -> Option<usize> {
    let mut escaped = false;
    for (index, ch) in text.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => return Some(index),
            _ => {}
        }
    }
    None
}

fn strip_double_quotes(value: &str) -> Option<&str> {
    if value.len() < 2 {
        return None;
    }
    value
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
}

fn unquote_item(value: &str) -> String {
    if let Some(inner) = strip_double_quotes(value) {
        return unescape(inner);
    }
    value
        .strip_prefix('\'')
        .and_then(|inner| inner.strip_suffix('\''))
        .unwrap_or(value)
        .to_string()
}

/// Reverses [`quote`]. Unknown escapes are kept as written.
fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn parse_number(raw: &str) -> Option<f64> {
    match raw {
        ".inf" | "+.inf" => Some(f64::INFINITY),
        "-.inf" => Some(f64::NEG_INFINITY),
        ".nan" => Some(f64::NAN),
        _ if NUMBER_RE.is_match(raw) => raw.parse().ok(),
        _ => None,
    }
}

/// Interprets one header value. A double-quoted value is always a string, so the
/// list, boolean, number and null forms only apply to unquoted values.
fn parse_value(raw: &str) -> MetadataValue {
    if let Some(inner) = strip_double_quotes(raw) {
        return MetadataValue::String(unescape(inner));
    }

    if let Some(inner) = raw.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
        return MetadataValue::StringList(split_list(inner));
    }

    match raw {
        "" | "null" | "~" => MetadataValue::Null,
        "true" => MetadataValue::Bool(true),
        "false" => MetadataValue::Bool(false),
        _ => parse_number(raw).map_or_else(|| MetadataValue::String(raw.to_string()), MetadataValue::Number),
    }
}

fn split_list(inner: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in inner.chars() {
        if escaped {
            escaped = false;
            current.push(ch);
            continue;
        }
        match (quote, ch) {
            (Some('"'), '\\') => {
                escaped = true;
                current.push(ch);
            }
            (None, '"' | '\'') if current.trim().is_empty() => {
                quote = Some(ch);
                current.push(ch);
            }
            (Some(open), _) if ch == open => {
                quote = None;
                current.push(ch);
            }
            (None, ',') => items.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    items.push(current);

    items
        .iter()
        .map(|item| unquote_item(item.trim()))
        .filter(|item| !item.is_empty())
        .collect()
}

// ===== Serialize =====

/// Writes the header block followed by the body. The header is always emitted,
/// even for an empty mapping, so a body beginning with `---` reparses intact.
pub fn serialize_document(metadata: &MetadataMap, body: &str) -> String {
    let mut out = String::with_capacity(body.len() + metadata.len() * 24 + 8);
    out.push_str(HEADER_DELIMITER);
    out.push('\n');
    for (key, value) in metadata.iter() {
        if key_needs_quotes(key) {
            out.push_str(&quote(key));
        } else {
            out.push_str(key);
        }
        out.push_str(": ");
        out.push_str(&serialize_value(value));
        out.push('\n');
    }
    out.push_str(HEADER_DELIMITER);
    out.push('\n');
    out.push_str(body);
    out
}

fn key_needs_quotes(key: &str) -> bool {
    key.contains(':') || key.starts_with(['"', '\'', '-', '#', '['])
}

/// Double-quoted form with `\\`, `\"` and line-break escapes, so every string
/// stays on its header line.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

fn format_number(number: f64) -> String {
    if number.is_nan() {
        ".nan".to_string()
    } else if number == f64::INFINITY {
        ".inf".to_string()
    } else if number == f64::NEG_INFINITY {
        "-.inf".to_string()
    } else {
        number.to_string()
    }
}

fn serialize_value(value: &MetadataValue) -> String {
    match value {
        MetadataValue::Null => "null".to_string(),
        MetadataValue::Bool(flag) => flag.to_string(),
        MetadataValue::Number(number) => format_number(*number),
        MetadataValue::String(text) => quote(text),
        MetadataValue::StringList(items) => {
            let quoted: Vec<String> = items.iter().map(|item| quote(item)).collect();
            format!("[{}]", quoted.join(", "))
        }
    }
}

// ===== Post helpers =====

pub fn default_frontmatter(published_at: &str) -> MetadataMap {
    let mut metadata = MetadataMap::new();
    metadata.set("title", DEFAULT_TITLE);
    metadata.set("author", "");
    metadata.set("publishedAt", published_at);
    metadata.set("excerpt", "");
    metadata.set("featuredImage", "");
    metadata.set("status", PostStatus::Draft.as_str());
    metadata.set("featured", false);
    metadata.set("tags", Vec::<String>::new());
    metadata
}

/// Stored text of a fresh post. `published_at` is the `YYYY-MM-DD` creation date.
pub fn create_new_post(title: Option<&str>, published_at: &str) -> String {
    let mut metadata = default_frontmatter(published_at);
    if let Some(title) = title.map(str::trim).filter(|title| !title.is_empty()) {
        metadata.set("title", title);
    }
    serialize_document(&metadata, NEW_POST_BODY)
}

pub fn validate_frontmatter(metadata: &MetadataMap, max_description_length: usize) -> FrontmatterValidation {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    match metadata.get_str("title") {
        Some(title) if !title.trim().is_empty() => {}
        _ => errors.push("Title is required".to_string()),
    }

    if let Some(status) = metadata.get("status") {
        let known = status
            .as_str()
            .is_some_and(|value| value.parse::<PostStatus>().is_ok());
        if !known {
            errors.push("Status must be draft, published, or archived".to_string());
        }
    }

    if let Some(tags) = metadata.get("tags") {
        if tags.as_list().is_none() {
            errors.push("Tags must be an array".to_string());
        }
    }

    if let Some(featured) = metadata.get("featured") {
        if featured.as_bool().is_none() {
            errors.push("Featured must be true or false".to_string());
        }
    }

    if let Some(description) = metadata.get_str("metaDescription") {
        let length = description.chars().count();
        if length > max_description_length {
            warnings.push(format!(
                "Meta description is {length} characters; search engines show about {max_description_length}"
            ));
        }
    }

    FrontmatterValidation {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

static MD_IMAGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").unwrap());
static MD_LINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap());
static MD_HEADING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#{1,6}\s+").unwrap());
static MD_STRONG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*([^*]+)\*\*|__([^_]+)__").unwrap());
static MD_EMPHASIS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*([^*]+)\*|_([^_]+)_").unwrap());
static MD_FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```.*?```").unwrap());
static MD_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`]+)`").unwrap());
static MD_QUOTE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^>\s*").unwrap());
static MD_RULE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^(?:-{3,}|\*{3,})\s*$").unwrap());
static MD_LIST_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*(?:[-*+]|\d+\.)\s+").unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static SENTENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^.!?]+[.!?]+").unwrap());

fn strip_markdown(body: &str) -> String {
    let text = MD_FENCE_RE.replace_all(body, "");
    let text = MD_IMAGE_RE.replace_all(&text, "");
    let text = MD_LINK_RE.replace_all(&text, "$1");
    let text = MD_HEADING_RE.replace_all(&text, "");
    let text = MD_STRONG_RE.replace_all(&text, "$1$2");
    let text = MD_EMPHASIS_RE.replace_all(&text, "$1$2");
    let text = MD_CODE_RE.replace_all(&text, "$1");
    let text = MD_QUOTE_RE.replace_all(&text, "");
    let text = MD_RULE_RE.replace_all(&text, "");
    let text = MD_LIST_RE.replace_all(&text, "");
    WHITESPACE_RE.replace_all(&text, " ").trim().to_string()
}

/// Plain-text summary of a body: whole sentences up to `max_length` characters,
/// or the first sentence cut at a word boundary with a trailing `...`.
pub fn generate_meta_description(body: &str, max_length: usize) -> String {
    let clean = strip_markdown(body);
    let sentences: Vec<&str> = {
        let found: Vec<&str> = SENTENCE_RE
            .find_iter(&clean)
            .map(|mat| mat.as_str())
            .collect();
        if found.is_empty() { vec![clean.as_str()] } else { found }
    };

    let mut description = String::new();
    for sentence in sentences {
        let sentence = sentence.trim();
        let candidate = if description.is_empty() {
            sentence.to_string()
        } else {
            format!("{description} {sentence}")
        };

        if candidate.chars().count() <= max_length {
            description = candidate;
            continue;
        }

        if description.is_empty() {
            let truncated: String = sentence.chars().take(max_length).collect();
            let threshold = max_length * 7 / 10;
            let cut = match truncated.rfind(' ') {
                Some(index) if truncated[..index].chars().count() > threshold => {
                    truncated[..index].to_string()
                }
                _ => truncated,
            };
            description = format!("{}...", cut.trim_end());
        }
        break;
    }

    description
}
