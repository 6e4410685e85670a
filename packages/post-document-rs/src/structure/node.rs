use serde::{Deserialize, Serialize};

use crate::assets::AssetReferences;

/// Structural tree node as seen by the visual editor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Node {
    Document { children: Vec<Node> },
    Heading { level: u8, children: Vec<Node> },
    Paragraph { children: Vec<Node> },
    Blockquote { children: Vec<Node> },
    BulletList { children: Vec<Node> },
    OrderedList { start: u64, children: Vec<Node> },
    ListItem { children: Vec<Node> },
    CodeBlock {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        code: String,
    },
    Bold { children: Vec<Node> },
    Italic { children: Vec<Node> },
    Strike { children: Vec<Node> },
    InlineCode { code: String },
    Link {
        href: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        children: Vec<Node>,
    },
    Image(ImageNode),
    LineBreak,
    Text { text: String },
}

/// An image carries two references: the one the visual view loads and, when they
/// differ, the one written back into body text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageNode {
    pub display_src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown_src: Option<String>,
    #[serde(default)]
    pub alt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl ImageNode {
    /// Reference emitted into body text.
    pub fn text_src(&self) -> &str {
        self.markdown_src.as_deref().unwrap_or(&self.display_src)
    }

    /// Image inserted into the visual view after an upload.
    pub fn from_upload(references: &AssetReferences, alt: impl Into<String>) -> Self {
        Self {
            display_src: references.display_reference.clone(),
            markdown_src: Some(references.storage_reference.clone()),
            alt: alt.into(),
            title: None,
        }
    }
}

impl Node {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn paragraph(children: Vec<Node>) -> Self {
        Self::Paragraph { children }
    }

    pub fn document(children: Vec<Node>) -> Self {
        Self::Document { children }
    }

    pub fn children(&self) -> &[Node] {
        match self {
            Self::Document { children }
            | Self::Heading { children, .. }
            | Self::Paragraph { children }
            | Self::Blockquote { children }
            | Self::BulletList { children }
            | Self::OrderedList { children, .. }
            | Self::ListItem { children }
            | Self::Bold { children }
            | Self::Italic { children }
            | Self::Strike { children }
            | Self::Link { children, .. } => children,
            Self::CodeBlock { .. }
            | Self::InlineCode { .. }
            | Self::Image(_)
            | Self::LineBreak
            | Self::Text { .. } => &[],
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(
            self,
            Self::Bold { .. }
                | Self::Italic { .. }
                | Self::Strike { .. }
                | Self::InlineCode { .. }
                | Self::Link { .. }
                | Self::Image(_)
                | Self::LineBreak
                | Self::Text { .. }
        )
    }

    /// Concatenated text content, with formatting dropped.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        self.collect_plain_text(&mut out);
        out
    }

    fn collect_plain_text(&self, out: &mut String) {
        match self {
            Self::Text { text } => out.push_str(text),
            Self::InlineCode { code } | Self::CodeBlock { code, .. } => out.push_str(code),
            Self::Image(image) => out.push_str(&image.alt),
            Self::LineBreak => out.push('\n'),
            _ => {
                for child in self.children() {
                    child.collect_plain_text(out);
                }
            }
        }
    }

    /// Every image in document order.
    pub fn images(&self) -> Vec<&ImageNode> {
        let mut found = Vec::new();
        self.collect_images(&mut found);
        found
    }

    fn collect_images<'a>(&'a self, found: &mut Vec<&'a ImageNode>) {
        if let Self::Image(image) = self {
            found.push(image);
        }
        for child in self.children() {
            child.collect_images(found);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nodes_serialize_with_a_type_tag() {
        let node = Node::paragraph(vec![
            Node::text("Hello "),
            Node::Bold {
                children: vec![Node::text("world")],
            },
        ]);
        assert_eq!(
            serde_json::to_value(&node).unwrap(),
            json!({
                "type": "paragraph",
                "children": [
                    { "type": "text", "text": "Hello " },
                    { "type": "bold", "children": [{ "type": "text", "text": "world" }] }
                ]
            })
        );
    }

    #[test]
    fn image_nodes_round_trip_through_json() {
        let value = json!({
            "type": "image",
            "displaySrc": "/api/images/blog/x.png",
            "markdownSrc": "./x.png",
            "alt": "x"
        });
        let node: Node = serde_json::from_value(value.clone()).unwrap();
        let Node::Image(image) = &node else {
            panic!("expected image node");
        };
        assert_eq!(image.text_src(), "./x.png");
        assert_eq!(serde_json::to_value(&node).unwrap(), value);
    }

    #[test]
    fn plain_text_flattens_formatting() {
        let node = Node::document(vec![Node::paragraph(vec![
            Node::text("a "),
            Node::Italic {
                children: vec![Node::text("b")],
            },
            Node::InlineCode {
                code: "c".to_string(),
            },
        ])]);
        assert_eq!(node.plain_text(), "a bc");
    }
}
