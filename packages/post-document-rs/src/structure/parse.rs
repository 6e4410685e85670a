use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag};

use super::node::{ImageNode, Node};
use super::resolve_display_src;

pub(super) const MAX_HEADING_LEVEL: u8 = 3;

enum FrameKind {
    Root,
    Paragraph,
    Heading(u8),
    Blockquote,
    CodeBlock(Option<String>),
    HtmlBlock,
    BulletList,
    OrderedList(u64),
    ListItem,
    Bold,
    Italic,
    Strike,
    Link { href: String, title: Option<String> },
    Image { src: String, title: Option<String> },
    Transparent,
}

impl FrameKind {
    fn collects_raw(&self) -> bool {
        matches!(self, Self::CodeBlock(_) | Self::HtmlBlock)
    }
}

struct Frame {
    kind: FrameKind,
    children: Vec<Node>,
    raw: String,
}

impl Frame {
    fn new(kind: FrameKind) -> Self {
        Self {
            kind,
            children: Vec::new(),
            raw: String::new(),
        }
    }
}

pub(super) struct TreeBuilder<'a> {
    stack: Vec<Frame>,
    context_path: Option<&'a str>,
    route_prefix: &'a str,
}

impl<'a> TreeBuilder<'a> {
    pub(super) fn new(context_path: Option<&'a str>, route_prefix: &'a str) -> Self {
        Self {
            stack: vec![Frame::new(FrameKind::Root)],
            context_path,
            route_prefix,
        }
    }

    pub(super) fn build(mut self, body: &str) -> Node {
        for event in Parser::new_ext(body, bridge_options()) {
            self.handle(event);
        }
        self.finish()
    }

    fn top(&mut self) -> &mut Frame {
        let index = self.stack.len() - 1;
        &mut self.stack[index]
    }

    fn handle(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => {
                let kind = frame_kind(tag);
                self.stack.push(Frame::new(kind));
            }
            Event::End(_) => self.close(),
            Event::Text(text) => self.push_text(&text),
            Event::Code(code) => push_node(
                &mut self.top().children,
                Node::InlineCode {
                    code: code.to_string(),
                },
            ),
            Event::Html(raw) | Event::InlineHtml(raw) => {
                if !self.top().kind.collects_raw() {
                    tracing::debug!(markup = &*raw, "raw markup kept as literal text");
                }
                self.push_text(&raw);
            }
            Event::SoftBreak => self.push_text("\n"),
            Event::HardBreak => push_node(&mut self.top().children, Node::LineBreak),
            Event::Rule => {
                tracing::debug!("thematic break kept as literal text");
                push_node(
                    &mut self.top().children,
                    Node::paragraph(vec![Node::text("---")]),
                );
            }
            _ => {}
        }
    }

    fn push_text(&mut self, text: &str) {
        let frame = self.top();
        if frame.kind.collects_raw() {
            frame.raw.push_str(text);
        } else {
            push_node(&mut frame.children, Node::text(text));
        }
    }

    fn close(&mut self) {
        if self.stack.len() <= 1 {
            return;
        }
        let Some(frame) = self.stack.pop() else {
            return;
        };
        let nodes = self.frame_nodes(frame);
        let parent = self.top();
        for node in nodes {
            push_node(&mut parent.children, node);
        }
    }

    fn frame_nodes(&self, frame: Frame) -> Vec<Node> {
        let Frame {
            kind,
            children,
            raw,
        } = frame;

        let node = match kind {
            FrameKind::Root | FrameKind::Transparent => return children,
            FrameKind::Paragraph => {
                if children.is_empty() {
                    return Vec::new();
                }
                Node::Paragraph { children }
            }
            FrameKind::Heading(level) => Node::Heading { level, children },
            FrameKind::Blockquote => Node::Blockquote {
                children: wrap_inline_runs(children),
            },
            FrameKind::CodeBlock(language) => Node::CodeBlock {
                language,
                code: raw.strip_suffix('\n').unwrap_or(raw.as_str()).to_string(),
            },
            FrameKind::HtmlBlock => {
                let text = raw.trim_end();
                if text.is_empty() {
                    return Vec::new();
                }
                tracing::debug!("html block kept as literal text");
                Node::paragraph(vec![Node::text(text)])
            }
            FrameKind::BulletList => Node::BulletList { children },
            FrameKind::OrderedList(start) => Node::OrderedList { start, children },
            FrameKind::ListItem => Node::ListItem {
                children: wrap_inline_runs(children),
            },
            FrameKind::Bold => Node::Bold { children },
            FrameKind::Italic => Node::Italic { children },
            FrameKind::Strike => Node::Strike { children },
            FrameKind::Link { href, title } => Node::Link {
                href,
                title,
                children,
            },
            FrameKind::Image { src, title } => {
                let alt: String = children.iter().map(Node::plain_text).collect();
                Node::Image(self.image_node(src, alt, title))
            }
        };
        vec![node]
    }

    fn image_node(&self, src: String, alt: String, title: Option<String>) -> ImageNode {
        match resolve_display_src(&src, self.context_path, self.route_prefix) {
            Some(display_src) => ImageNode {
                display_src,
                markdown_src: Some(src),
                alt,
                title,
            },
            None => ImageNode {
                display_src: src,
                markdown_src: None,
                alt,
                title,
            },
        }
    }

    fn finish(mut self) -> Node {
        while self.stack.len() > 1 {
            self.close();
        }
        let children = self
            .stack
            .pop()
            .map(|root| wrap_inline_runs(root.children))
            .unwrap_or_default();
        Node::Document { children }
    }
}

fn frame_kind(tag: Tag<'_>) -> FrameKind {
    match tag {
        Tag::Paragraph => FrameKind::Paragraph,
        Tag::Heading { level, .. } => FrameKind::Heading(clamp_heading(level)),
        Tag::BlockQuote(_) => FrameKind::Blockquote,
        Tag::CodeBlock(CodeBlockKind::Fenced(info)) => {
            let language = info.split_whitespace().next().map(str::to_string);
            FrameKind::CodeBlock(language)
        }
        Tag::CodeBlock(CodeBlockKind::Indented) => FrameKind::CodeBlock(None),
        Tag::HtmlBlock => FrameKind::HtmlBlock,
        Tag::List(Some(start)) => FrameKind::OrderedList(start),
        Tag::List(None) => FrameKind::BulletList,
        Tag::Item => FrameKind::ListItem,
        Tag::Emphasis => FrameKind::Italic,
        Tag::Strong => FrameKind::Bold,
        Tag::Strikethrough => FrameKind::Strike,
        Tag::Link {
            dest_url, title, ..
        } => FrameKind::Link {
            href: dest_url.to_string(),
            title: non_empty(&title),
        },
        Tag::Image {
            dest_url, title, ..
        } => FrameKind::Image {
            src: dest_url.to_string(),
            title: non_empty(&title),
        },
        _ => FrameKind::Transparent,
    }
}

fn bridge_options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options
}

fn clamp_heading(level: HeadingLevel) -> u8 {
    let depth = match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    };
    if depth > MAX_HEADING_LEVEL {
        tracing::debug!(depth, "heading level clamped");
    }
    depth.min(MAX_HEADING_LEVEL)
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Appends a node, merging adjacent text.
pub(super) fn push_node(children: &mut Vec<Node>, node: Node) {
    if let Node::Text { text } = &node {
        if let Some(Node::Text { text: last }) = children.last_mut() {
            last.push_str(text);
            return;
        }
    }
    children.push(node);
}

/// Groups inline runs that sit directly in a block container into paragraphs.
pub(super) fn wrap_inline_runs(children: Vec<Node>) -> Vec<Node> {
    let mut blocks = Vec::with_capacity(children.len());
    let mut run: Vec<Node> = Vec::new();

    for child in children {
        if child.is_inline() {
            push_node(&mut run, child);
            continue;
        }
        flush_run(&mut run, &mut blocks);
        blocks.push(child);
    }
    flush_run(&mut run, &mut blocks);
    blocks
}

fn flush_run(run: &mut Vec<Node>, blocks: &mut Vec<Node>) {
    if run.is_empty() {
        return;
    }
    let whitespace_only = run
        .iter()
        .all(|node| matches!(node, Node::Text { text } if text.trim().is_empty()));
    let inlines = std::mem::take(run);
    if !whitespace_only {
        blocks.push(Node::Paragraph { children: inlines });
    }
}
