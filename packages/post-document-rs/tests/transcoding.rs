use post_document_rs::frontmatter::{MetadataMap, MetadataValue, parse_document, serialize_document};
use post_document_rs::options::EngineConfig;
use post_document_rs::render::render_fragment;
use post_document_rs::session::DocumentSession;
use post_document_rs::structure::{ImageNode, Node, canonical_text, to_structure, to_text};

const SCENARIO: &str = "---\ntitle: \"Hi\"\ntags: [\"a\", \"b\"]\n---\n\nHello **world**\n";

fn sample_metadata() -> Vec<MetadataMap> {
    let strings = [
        "",
        "plain",
        "with: colon",
        "true",
        "42",
        "null",
        "[bracketed]",
        "quote \" inside",
        "  padded  ",
        "two\nlines",
        "back\\slash",
    ];
    let mut maps: Vec<MetadataMap> = strings
        .iter()
        .map(|value| [("title", MetadataValue::from(*value))].into_iter().collect())
        .collect();

    maps.push(MetadataMap::new());
    maps.push(
        [
            ("title", MetadataValue::from("Post")),
            ("featured", MetadataValue::Bool(true)),
            ("draft", MetadataValue::Bool(false)),
            (
                "tags",
                MetadataValue::StringList(vec!["rust".into(), "two words".into(), "comma, inside".into()]),
            ),
            ("empty", MetadataValue::StringList(Vec::new())),
            ("order", MetadataValue::Number(3.0)),
            ("ratio", MetadataValue::Number(-0.25)),
            ("cover", MetadataValue::Null),
            ("time: zone", MetadataValue::from("UTC")),
        ]
        .into_iter()
        .collect(),
    );
    maps
}

fn sample_bodies() -> Vec<&'static str> {
    vec![
        "",
        "\n",
        "\nHello **world**\n",
        "---\nlooks like a header\n---\n",
        "no trailing newline",
        "\r\nwindows\r\nlines\r\n",
        "# Heading\n\n- a\n- b\n",
    ]
}

#[test]
fn scenario_document_transcodes_end_to_end() {
    let parsed = parse_document(SCENARIO);
    assert_eq!(parsed.metadata.get_str("title"), Some("Hi"));
    assert_eq!(
        parsed.metadata.get("tags"),
        Some(&MetadataValue::StringList(vec!["a".into(), "b".into()]))
    );
    assert_eq!(parsed.body, "\nHello **world**\n");

    let tree = to_structure(&parsed.body, None);
    assert_eq!(
        tree,
        Node::document(vec![Node::paragraph(vec![
            Node::text("Hello "),
            Node::Bold {
                children: vec![Node::text("world")],
            },
        ])])
    );

    let fragment = render_fragment(&parsed.body, None, &EngineConfig::default());
    assert!(fragment.html.contains("<p>Hello <strong>world</strong></p>"));
}

#[test]
fn metadata_round_trips_for_every_value_kind() {
    for metadata in sample_metadata() {
        for body in sample_bodies() {
            let parsed = parse_document(&serialize_document(&metadata, body));
            assert_eq!(parsed.metadata, metadata, "metadata for body {body:?}");
            assert_eq!(parsed.body, body);
        }
    }
}

#[test]
fn text_without_a_header_is_returned_whole() {
    for body in ["", "plain", "-- almost", " ---\nindented", "--- \nno end", "# title\n---\n"] {
        let parsed = parse_document(body);
        assert!(parsed.metadata.is_empty(), "metadata for {body:?}");
        assert_eq!(parsed.body, body);
    }
}

#[test]
fn structural_trees_survive_text_round_trips() {
    let bodies = [
        "Plain paragraph.",
        "# One\n\n## Two\n\n### Three",
        "**bold _italic_** and ~~strike~~ with `code` and [link](/a \"t\")",
        "- a\n- b\n  1. c\n  2. d\n\n> quote\n> continues",
        "```js\nconst a = 1;\n```",
        "line one\\\nline two",
        "1\\. not a list and 3 * 4",
        "Text with <b>inline</b> markup",
    ];

    for body in bodies {
        let tree = to_structure(body, None);
        let rewritten = to_text(&tree);
        assert_eq!(to_structure(&rewritten, None), tree, "body {body:?} became {rewritten:?}");
        assert_eq!(canonical_text(&rewritten), rewritten);
    }
}

#[test]
fn hand_built_trees_read_back_in_normalized_form() {
    let paragraph = |children: Vec<Node>| Node::document(vec![Node::paragraph(children)]);
    let bold = |text: &str| Node::Bold {
        children: vec![Node::text(text)],
    };
    let italic = |children: Vec<Node>| Node::Italic { children };
    let strike = |text: &str| Node::Strike {
        children: vec![Node::text(text)],
    };

    let cases = [
        (
            paragraph(vec![bold("a"), bold("b")]),
            paragraph(vec![bold("ab")]),
        ),
        (
            paragraph(vec![strike("a"), strike("b")]),
            paragraph(vec![strike("ab")]),
        ),
        (
            paragraph(vec![Node::text("x"), italic(vec![Node::text("(a)")])]),
            paragraph(vec![Node::text("x("), italic(vec![Node::text("a)")])]),
        ),
        (
            paragraph(vec![Node::text("a"), bold("\"q\""), Node::text("b")]),
            paragraph(vec![Node::text("a\""), bold("q"), Node::text("\"b")]),
        ),
        (
            paragraph(vec![Node::text("    code")]),
            paragraph(vec![Node::text("code")]),
        ),
        (
            paragraph(vec![Node::text("a\n\nb")]),
            paragraph(vec![Node::text("a\nb")]),
        ),
        (
            paragraph(vec![italic(vec![italic(vec![Node::text("x")])])]),
            paragraph(vec![italic(vec![Node::text("x")])]),
        ),
    ];

    for (tree, expected) in cases {
        let written = to_text(&tree);
        assert_eq!(to_structure(&written, None), expected, "{tree:?} was written as {written:?}");
        assert_eq!(to_text(&expected), written);
    }
}

#[test]
fn images_keep_their_same_directory_reference() {
    let tree = to_structure("![alt](./images/x.png)", Some("blog/2024/01/post/post.md"));
    let images: Vec<ImageNode> = tree.images().into_iter().cloned().collect();
    assert_eq!(images.len(), 1);
    assert_eq!(
        images[0].display_src,
        "/api/images/blog/2024/01/post/images/x.png"
    );
    assert_eq!(images[0].markdown_src.as_deref(), Some("./images/x.png"));
    assert_eq!(to_text(&tree), "![alt](./images/x.png)\n");
}

#[test]
fn structural_echo_is_suppressed() {
    let mut session = DocumentSession::default();
    session.open_document(SCENARIO, Some("blog/post.md"));
    let before = session.body_text().unwrap().to_string();

    let echoed = to_structure(&to_text(&to_structure(&before, Some("blog/post.md"))), Some("blog/post.md"));
    let outcome = session.set_body_from_structure(echoed).unwrap();

    assert!(!outcome.body_changed);
    assert!(!outcome.refresh_structure_view);
    assert!(!outcome.refresh_text_view);
    assert_eq!(session.body_text().unwrap(), before);
}

#[test]
fn stored_text_always_reflects_session_state() {
    let mut session = DocumentSession::default();
    session.open_document(SCENARIO, None);

    let check = |session: &DocumentSession| {
        let parsed = parse_document(&session.current_stored_text().unwrap());
        assert_eq!(&parsed.metadata, session.metadata().unwrap());
        assert_eq!(parsed.body, session.body_text().unwrap());
    };

    session.set_body_from_text("\n# New\n\nBody text\n").unwrap();
    check(&session);

    session.set_metadata_field("featured", true.into()).unwrap();
    check(&session);

    let tree = Node::document(vec![
        Node::Heading {
            level: 1,
            children: vec![Node::text("New")],
        },
        Node::paragraph(vec![Node::text("Edited visually")]),
    ]);
    session.set_body_from_structure(tree).unwrap();
    check(&session);
    assert_eq!(session.body_text().unwrap(), "\n# New\n\nEdited visually\n");

    session
        .set_metadata_field("tags", MetadataValue::StringList(vec!["x".into()]))
        .unwrap();
    session.set_body_from_text("---\nbody that looks like a header\n---\n").unwrap();
    check(&session);
}

#[test]
fn rendering_never_passes_script_through() {
    let config = EngineConfig::default();
    for body in [
        "<script>alert(1)</script>",
        "inline <script>alert(1)</script> here",
        "<img src=x onerror=alert(1)>",
        "[x](javascript:alert(1))",
        "<iframe src=\"https://evil.example\"></iframe>",
        "<a href=\"javascript&colon;alert(1)\">x</a>",
        "[x](javascript&#58;alert(1))",
        "<div>\n<img/src=\"x\"/onerror=\"alert(1)\">\n</div>",
        "<div>\n<svg/onload=\"alert(1)\">\n</div>",
    ] {
        let html = render_fragment(body, None, &config).html.to_lowercase();
        assert!(!html.contains("<script"), "{body:?} rendered {html:?}");
        assert!(!html.contains("onerror"), "{body:?} rendered {html:?}");
        assert!(!html.contains("onload"), "{body:?} rendered {html:?}");
        assert!(!html.contains("javascript"), "{body:?} rendered {html:?}");
        assert!(!html.contains("<iframe"), "{body:?} rendered {html:?}");
    }
}
