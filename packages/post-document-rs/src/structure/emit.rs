use once_cell::sync::Lazy;
use regex::Regex;

use super::node::{ImageNode, Node};
use super::parse::{MAX_HEADING_LEVEL, push_node};

/// Largest number a list marker may carry; longer digit runs are not markers.
const MAX_LIST_NUMBER: u64 = 999_999_999;

static ENTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^&(?:#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[A-Za-z][A-Za-z0-9]{1,31});").unwrap()
});

pub(super) fn write_document(tree: &Node) -> String {
    let text = match tree {
        Node::Document { children } => render_blocks(children, false),
        other => render_blocks(std::slice::from_ref(other), false),
    };
    if text.is_empty() { text } else { text + "\n" }
}

#[derive(Default)]
struct MarkerState {
    previous_bullet: Option<char>,
    previous_ordered: Option<char>,
}

fn render_blocks(nodes: &[Node], tight: bool) -> String {
    let mut out = String::new();
    let mut markers = MarkerState::default();
    let mut previous_was_paragraph = false;
    let mut index = 0;

    while index < nodes.len() {
        let node = &nodes[index];
        let (text, is_paragraph) = if node.is_inline() {
            let end = nodes[index..]
                .iter()
                .position(|candidate| !candidate.is_inline())
                .map_or(nodes.len(), |offset| index + offset);
            let text = render_paragraph(&nodes[index..end]);
            index = end;
            (text, true)
        } else {
            index += 1;
            (
                render_block(node, &mut markers),
                matches!(node, Node::Paragraph { .. }),
            )
        };

        if !matches!(node, Node::BulletList { .. }) {
            markers.previous_bullet = None;
        }
        if !matches!(node, Node::OrderedList { .. }) {
            markers.previous_ordered = None;
        }
        if text.is_empty() {
            continue;
        }

        if !out.is_empty() {
            // Only these lists may interrupt a paragraph without a blank line.
            let interrupts = matches!(
                node,
                Node::BulletList { .. } | Node::OrderedList { start: 1, .. }
            );
            out.push_str(if tight && previous_was_paragraph && interrupts {
                "\n"
            } else {
                "\n\n"
            });
        }
        out.push_str(&text);
        previous_was_paragraph = is_paragraph;
    }

    out
}

fn render_block(node: &Node, markers: &mut MarkerState) -> String {
    match node {
        Node::Document { children } => render_blocks(children, false),
        Node::Paragraph { children } => render_paragraph(children),
        Node::Heading { level, children } => {
            let mut writer = InlineWriter::new(true);
            writer.write_nodes(&normalize_inlines(children, Enclosing::default()));
            let hashes = "#".repeat(usize::from((*level).clamp(1, MAX_HEADING_LEVEL)));
            let content = writer.out.trim();
            if content.is_empty() {
                hashes
            } else {
                format!("{hashes} {content}")
            }
        }
        Node::Blockquote { children } => {
            let inner = render_blocks(children, false);
            if inner.is_empty() {
                return ">".to_string();
            }
            inner
                .split('\n')
                .map(|line| {
                    if line.is_empty() {
                        ">".to_string()
                    } else {
                        format!("> {line}")
                    }
                })
                .collect::<Vec<_>>()
                .join("\n")
        }
        Node::BulletList { children } => {
            if children.is_empty() {
                return String::new();
            }
            let bullet = match markers.previous_bullet {
                Some('-') => '*',
                _ => '-',
            };
            markers.previous_bullet = Some(bullet);
            let marker = format!("{bullet} ");
            children
                .iter()
                .map(|item| render_item(item, &marker))
                .collect::<Vec<_>>()
                .join("\n")
        }
        Node::OrderedList { start, children } => {
            if children.is_empty() {
                return String::new();
            }
            let delimiter = match markers.previous_ordered {
                Some('.') => ')',
                _ => '.',
            };
            markers.previous_ordered = Some(delimiter);
            children
                .iter()
                .enumerate()
                .map(|(offset, item)| {
                    let number = start.saturating_add(offset as u64).min(MAX_LIST_NUMBER);
                    let marker = format!("{number}{delimiter} ");
                    render_item(item, &marker)
                })
                .collect::<Vec<_>>()
                .join("\n")
        }
        Node::ListItem { .. } => render_item(node, "- "),
        Node::CodeBlock { language, code } => render_code_block(language.as_deref(), code),
        inline => render_paragraph(std::slice::from_ref(inline)),
    }
}

fn render_item(item: &Node, marker: &str) -> String {
    let children = match item {
        Node::ListItem { children } => children.as_slice(),
        other => std::slice::from_ref(other),
    };
    let content = render_blocks(children, true);
    if content.is_empty() {
        return marker.trim_end().to_string();
    }

    let indent = " ".repeat(marker.len());
    let mut out = String::with_capacity(content.len() + marker.len());
    for (line_index, line) in content.split('\n').enumerate() {
        if line_index == 0 {
            out.push_str(marker);
        } else {
            out.push('\n');
            if !line.is_empty() {
                out.push_str(&indent);
            }
        }
        out.push_str(line);
    }
    out
}

fn render_code_block(language: Option<&str>, code: &str) -> String {
    let fence = "`".repeat(longest_backtick_run(code).max(2) + 1);
    let info = language.unwrap_or("");
    if code.is_empty() {
        format!("{fence}{info}\n{fence}")
    } else {
        format!("{fence}{info}\n{code}\n{fence}")
    }
}

fn longest_backtick_run(text: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for ch in text.chars() {
        if ch == '`' {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

fn has_backtick_run_of(text: &str, length: usize) -> bool {
    text.split(|ch| ch != '`')
        .any(|run| run.len() == length)
}

fn render_paragraph(nodes: &[Node]) -> String {
    let nodes = normalize_inlines(nodes, Enclosing::default());
    // Hard breaks at either edge have no text form; a trailing one would reparse
    // as a literal backslash.
    let is_edge = |node: &Node| match node {
        Node::LineBreak => true,
        Node::Text { text } => text.trim().is_empty(),
        _ => false,
    };
    let start = nodes.iter().position(|node| !is_edge(node)).unwrap_or(nodes.len());
    let end = nodes
        .iter()
        .rposition(|node| !is_edge(node))
        .map_or(start, |index| index + 1);
    let mut writer = InlineWriter::new(false);
    writer.write_nodes(&nodes[start..end]);
    writer.out.trim_end().to_string()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Emphasis {
    Bold,
    Italic,
    Strike,
}

impl Emphasis {
    fn of(node: &Node) -> Option<(Self, &[Node])> {
        match node {
            Node::Bold { children } => Some((Self::Bold, children)),
            Node::Italic { children } => Some((Self::Italic, children)),
            Node::Strike { children } => Some((Self::Strike, children)),
            _ => None,
        }
    }

    fn wrap(self, children: Vec<Node>) -> Node {
        match self {
            Self::Bold => Node::Bold { children },
            Self::Italic => Node::Italic { children },
            Self::Strike => Node::Strike { children },
        }
    }
}

/// Emphasis kinds already open around the inlines being normalized.
#[derive(Clone, Copy, Debug, Default)]
struct Enclosing {
    bold: bool,
    italic: bool,
    strike: bool,
}

impl Enclosing {
    fn contains(self, kind: Emphasis) -> bool {
        match kind {
            Emphasis::Bold => self.bold,
            Emphasis::Italic => self.italic,
            Emphasis::Strike => self.strike,
        }
    }

    fn with(mut self, kind: Emphasis) -> Self {
        match kind {
            Emphasis::Bold => self.bold = true,
            Emphasis::Italic => self.italic = true,
            Emphasis::Strike => self.strike = true,
        }
        self
    }
}

/// Rewrites inlines into the shape text can express: no empty text or code,
/// adjacent text merged, emphasis never nested in its own kind, adjacent runs of
/// one kind fused, and whitespace or hard breaks at emphasis edges moved outside.
fn normalize_inlines(nodes: &[Node], enclosing: Enclosing) -> Vec<Node> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        if let Some((kind, children)) = Emphasis::of(node) {
            let inner = normalize_inlines(children, enclosing.with(kind));
            if enclosing.contains(kind) {
                for child in inner {
                    push_inline(&mut out, child, enclosing);
                }
            } else {
                push_emphasis(&mut out, kind, inner, enclosing);
            }
            continue;
        }
        match node {
            Node::Text { text } if text.is_empty() => {}
            Node::InlineCode { code } if code.is_empty() => {}
            Node::Link {
                href,
                title,
                children,
            } => out.push(Node::Link {
                href: href.clone(),
                title: title.clone(),
                children: normalize_inlines(children, Enclosing::default()),
            }),
            other => push_node(&mut out, other.clone()),
        }
    }
    out
}

fn push_emphasis(out: &mut Vec<Node>, kind: Emphasis, mut inner: Vec<Node>, enclosing: Enclosing) {
    let mut leading = Vec::new();
    while let Some(first) = inner.first_mut() {
        match first {
            Node::LineBreak => leading.push(inner.remove(0)),
            Node::Text { text } => {
                let kept = text.trim_start();
                if kept.len() < text.len() {
                    leading.push(Node::text(&text[..text.len() - kept.len()]));
                    *text = kept.to_string();
                }
                if text.is_empty() {
                    inner.remove(0);
                    continue;
                }
                break;
            }
            _ => break,
        }
    }

    let mut trailing = Vec::new();
    while let Some(last) = inner.last_mut() {
        match last {
            Node::LineBreak => {
                if let Some(node) = inner.pop() {
                    trailing.insert(0, node);
                }
            }
            Node::Text { text } => {
                let kept_len = text.trim_end().len();
                if kept_len < text.len() {
                    trailing.insert(0, Node::text(&text[kept_len..]));
                    text.truncate(kept_len);
                }
                if text.is_empty() {
                    inner.pop();
                    continue;
                }
                break;
            }
            _ => break,
        }
    }

    for node in leading {
        push_inline(out, node, enclosing);
    }
    if !inner.is_empty() {
        push_inline(out, kind.wrap(inner), enclosing);
    }
    for node in trailing {
        push_inline(out, node, enclosing);
    }
}

/// Appends a normalized inline, fusing it into a preceding emphasis of the same
/// kind since their delimiters would merge in text anyway.
fn push_inline(out: &mut Vec<Node>, node: Node, enclosing: Enclosing) {
    if let (Some((kind, children)), Some(last)) = (Emphasis::of(&node), out.last_mut()) {
        if let Some((last_kind, last_children)) = Emphasis::of(last) {
            if last_kind == kind {
                let merged: Vec<Node> = last_children.iter().chain(children).cloned().collect();
                *last = kind.wrap(normalize_inlines(&merged, enclosing.with(kind)));
                return;
            }
        }
    }
    push_node(out, node);
}

struct InlineWriter {
    out: String,
    prev: Option<char>,
    line_start: bool,
    heading: bool,
}

impl InlineWriter {
    fn new(heading: bool) -> Self {
        Self {
            out: String::new(),
            prev: None,
            line_start: true,
            heading,
        }
    }

    fn nested(&self, prev: char) -> Self {
        Self {
            out: String::new(),
            prev: Some(prev),
            line_start: false,
            heading: self.heading,
        }
    }

    fn push(&mut self, ch: char) {
        // Indentation at line start could open a code block and a second line
        // break would end the paragraph.
        if self.line_start && matches!(ch, ' ' | '\t' | '\n') {
            return;
        }
        if ch == '\n' {
            while self.out.ends_with(' ') || self.out.ends_with('\t') {
                self.out.pop();
            }
            self.line_start = true;
        } else {
            self.line_start = false;
        }
        self.out.push(ch);
        self.prev = Some(ch);
    }

    fn push_str(&mut self, text: &str) {
        for ch in text.chars() {
            self.push(ch);
        }
    }

    fn escape(&mut self, ch: char) {
        self.push('\\');
        self.push(ch);
    }

    fn write_nodes(&mut self, nodes: &[Node]) {
        self.write_nodes_before(nodes, None);
    }

    /// Writes `nodes` where `after` is what follows the last of them.
    fn write_nodes_before(&mut self, nodes: &[Node], after: Option<&Node>) {
        for (index, node) in nodes.iter().enumerate() {
            self.write_node(node, nodes.get(index + 1).or(after));
        }
    }

    fn write_node(&mut self, node: &Node, next: Option<&Node>) {
        match node {
            Node::Text { text } => self.write_text(text, next),
            Node::Bold { children } => self.write_delimited(Emphasis::Bold, children, next),
            Node::Italic { children } => self.write_delimited(Emphasis::Italic, children, next),
            Node::Strike { children } => self.write_delimited(Emphasis::Strike, children, next),
            Node::InlineCode { code } => self.write_code_span(code),
            Node::Link {
                href,
                title,
                children,
            } => {
                let mut inner = self.nested('[');
                inner.write_nodes(children);
                self.push('[');
                self.push_str(&inner.out);
                self.push_str("](");
                self.push_str(&format_destination(href));
                self.write_title(title.as_deref());
                self.push(')');
            }
            Node::Image(image) => self.write_image(image),
            Node::LineBreak => {
                if self.heading {
                    self.push(' ');
                } else {
                    self.push_str("\\\n");
                }
            }
            block => self.write_nodes(block.children()),
        }
    }

    /// Writes an emphasis run whose delimiters must open and close where they
    /// stand. Punctuation at an edge that would stop a delimiter from flanking is
    /// moved outside; when the edge is not text the emphasis is dropped and its
    /// content written plain.
    fn write_delimited(&mut self, kind: Emphasis, children: &[Node], next: Option<&Node>) {
        let mut core = children.to_vec();

        while let Some(first) = core.first() {
            if opens_cleanly(self.prev, first_emitted_char(first)) {
                break;
            }
            let Node::Text { text } = first else {
                tracing::debug!(?kind, "emphasis cannot open here; writing its content plain");
                self.write_nodes_before(&core, next);
                return;
            };
            let (head, rest) = split_first_char(text);
            let (head, rest) = (head.to_string(), rest.to_string());
            if rest.is_empty() {
                core.remove(0);
            } else {
                core[0] = Node::text(rest);
            }
            self.write_text(&head, core.first().or(next));
        }
        if core.is_empty() {
            return;
        }

        let mut trailing = String::new();
        loop {
            let Some(last) = core.last_mut() else {
                self.write_text(&trailing, next);
                return;
            };
            if closes_cleanly(last_emitted_char(last), following_char(&trailing, next)) {
                break;
            }
            let Node::Text { text } = last else {
                tracing::debug!(?kind, "emphasis cannot close here; writing its content plain");
                if !trailing.is_empty() {
                    push_node(&mut core, Node::text(trailing));
                }
                self.write_nodes_before(&core, next);
                return;
            };
            if let Some(ch) = text.pop() {
                trailing.insert(0, ch);
            }
            if text.is_empty() {
                core.pop();
            }
        }

        let after = following_char(&trailing, next);
        let marker = match kind {
            Emphasis::Bold => "**",
            Emphasis::Strike => "~~",
            Emphasis::Italic
                if self.prev.is_some_and(char::is_alphanumeric)
                    || after.is_some_and(char::is_alphanumeric) =>
            {
                "*"
            }
            Emphasis::Italic => "_",
        };

        let mut inner = self.nested(marker.chars().last().unwrap_or('*'));
        inner.write_nodes(&core);
        self.push_str(marker);
        self.push_str(&inner.out);
        self.push_str(marker);
        self.write_text(&trailing, next);
    }

    fn write_code_span(&mut self, code: &str) {
        if code.is_empty() {
            return;
        }
        // Line breaks read back as spaces, and a blank line would end the paragraph.
        let code = code.replace(['\r', '\n'], " ");
        let code = code.as_str();
        let mut length = 1;
        while has_backtick_run_of(code, length) {
            length += 1;
        }
        let fence = "`".repeat(length);
        let pad = code.starts_with('`')
            || code.ends_with('`')
            || (code.starts_with(' ') && code.ends_with(' ') && !code.trim().is_empty());

        self.push_str(&fence);
        if pad {
            self.push(' ');
        }
        self.push_str(code);
        if pad {
            self.push(' ');
        }
        self.push_str(&fence);
    }

    fn write_image(&mut self, image: &ImageNode) {
        let mut alt = self.nested('[');
        alt.write_text(&image.alt, None);
        self.push_str("![");
        self.push_str(&alt.out);
        self.push_str("](");
        self.push_str(&format_destination(image.text_src()));
        self.write_title(image.title.as_deref());
        self.push(')');
    }

    fn write_title(&mut self, title: Option<&str>) {
        let Some(title) = title else {
            return;
        };
        self.push_str(" \"");
        for ch in title.chars() {
            match ch {
                '"' | '\\' => self.escape(ch),
                '\n' => self.push(' '),
                _ => self.push(ch),
            }
        }
        self.push('"');
    }

    fn write_text(&mut self, text: &str, next: Option<&Node>) {
        let chars: Vec<(usize, char)> = text.char_indices().collect();
        let mut index = 0;

        while index < chars.len() {
            let (offset, ch) = chars[index];
            let following = chars.get(index + 1).map(|(_, next_ch)| *next_ch);

            if ch == '\n' {
                self.push(if self.heading { ' ' } else { '\n' });
                index += 1;
                continue;
            }

            if self.line_start && !self.heading {
                match ch {
                    '#' | '>' | '-' | '+' | '=' => {
                        self.escape(ch);
                        index += 1;
                        continue;
                    }
                    digit if digit.is_ascii_digit() => {
                        let run_end = chars[index..]
                            .iter()
                            .position(|(_, candidate)| !candidate.is_ascii_digit())
                            .map_or(chars.len(), |position| index + position);
                        let delimiter = chars.get(run_end).map(|(_, value)| *value);
                        if run_end - index <= 9 && matches!(delimiter, Some('.' | ')')) {
                            for (_, value) in &chars[index..run_end] {
                                self.push(*value);
                            }
                            if let Some(delimiter) = delimiter {
                                self.escape(delimiter);
                            }
                            index = run_end + 1;
                            continue;
                        }
                    }
                    _ => {}
                }
            }

            match ch {
                '\\' | '*' | '`' | '[' | ']' | '<' | '~' => self.escape(ch),
                '#' if self.heading => self.escape(ch),
                '_' => {
                    let intraword = self.prev.is_some_and(char::is_alphanumeric)
                        && following.is_some_and(char::is_alphanumeric);
                    if intraword {
                        self.push(ch);
                    } else {
                        self.escape(ch);
                    }
                }
                '&' if ENTITY_RE.is_match(&text[offset..]) => self.escape(ch),
                '!' if following.is_none() && matches!(next, Some(Node::Link { .. })) => {
                    self.escape(ch)
                }
                _ => self.push(ch),
            }
            index += 1;
        }
    }
}

fn split_first_char(text: &str) -> (&str, &str) {
    let split = text.chars().next().map_or(0, char::len_utf8);
    text.split_at(split)
}

fn first_emitted_char(node: &Node) -> Option<char> {
    match node {
        Node::Text { text } => text.chars().next(),
        Node::Bold { .. } | Node::Italic { .. } => Some('*'),
        Node::Strike { .. } => Some('~'),
        Node::InlineCode { .. } => Some('`'),
        Node::Link { .. } => Some('['),
        Node::Image(_) => Some('!'),
        Node::LineBreak => Some('\\'),
        _ => None,
    }
}

fn last_emitted_char(node: &Node) -> Option<char> {
    match node {
        Node::Text { text } => text.chars().next_back(),
        Node::Bold { .. } | Node::Italic { .. } => Some('*'),
        Node::Strike { .. } => Some('~'),
        Node::InlineCode { .. } => Some('`'),
        Node::Link { .. } | Node::Image(_) => Some(')'),
        Node::LineBreak => Some('\n'),
        _ => None,
    }
}

fn following_char(trailing: &str, next: Option<&Node>) -> Option<char> {
    trailing
        .chars()
        .next()
        .or_else(|| next.and_then(first_emitted_char))
}

fn is_punctuation(ch: char) -> bool {
    !ch.is_alphanumeric() && !ch.is_whitespace()
}

/// Whether an opening delimiter between `before` and `first` is left-flanking.
fn opens_cleanly(before: Option<char>, first: Option<char>) -> bool {
    match first {
        None => true,
        Some(first) if first.is_whitespace() => false,
        Some(first) => {
            !is_punctuation(first) || before.is_none_or(|ch| ch.is_whitespace() || is_punctuation(ch))
        }
    }
}

/// Whether a closing delimiter between `last` and `after` is right-flanking.
fn closes_cleanly(last: Option<char>, after: Option<char>) -> bool {
    match last {
        None => true,
        Some(last) if last.is_whitespace() => false,
        Some(last) => {
            !is_punctuation(last) || after.is_none_or(|ch| ch.is_whitespace() || is_punctuation(ch))
        }
    }
}

fn format_destination(dest: &str) -> String {
    let mut depth: i32 = 0;
    let mut balanced = true;
    for ch in dest.chars() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    balanced = false;
                }
            }
            _ => {}
        }
    }
    let needs_angle = !balanced
        || depth != 0
        || dest
            .chars()
            .any(|ch| ch.is_whitespace() || ch.is_control() || ch == '<' || ch == '>');

    if needs_angle {
        let escaped = dest.replace('<', "\\<").replace('>', "\\>");
        format!("<{escaped}>")
    } else {
        dest.to_string()
    }
}
