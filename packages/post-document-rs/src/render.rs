use pulldown_cmark::{Event, Options, Parser, Tag, html};
use serde::Serialize;

use crate::frontmatter::{MetadataMap, parse_document};
use crate::options::EngineConfig;
use crate::sanitize::{SanitizeDiagnostic, sanitize_html};
use crate::structure::resolve_display_src;

#[derive(Clone, Debug, Default, Serialize)]
pub struct RenderedFragment {
    pub html: String,
    pub diagnostics: Vec<SanitizeDiagnostic>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RenderedDocument {
    pub html: String,
    pub metadata: MetadataMap,
    pub diagnostics: Vec<SanitizeDiagnostic>,
}

fn render_options(config: &EngineConfig) -> Options {
    let mut options = Options::empty();
    if config.gfm {
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_TASKLISTS);
    }
    options
}

/// Renders body text as a sanitized HTML fragment. Same-directory images are
/// pointed at the image route when `context_path` is known.
pub fn render_fragment(body: &str, context_path: Option<&str>, config: &EngineConfig) -> RenderedFragment {
    let events = Parser::new_ext(body, render_options(config)).map(|event| match event {
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        }) => {
            let dest_url = resolve_display_src(&dest_url, context_path, &config.image_route_prefix)
                .map_or(dest_url, Into::into);
            Event::Start(Tag::Image {
                link_type,
                dest_url,
                title,
                id,
            })
        }
        other => other,
    });

    let mut raw = String::with_capacity(body.len() + body.len() / 2);
    html::push_html(&mut raw, events);

    let sanitized = sanitize_html(&raw, &config.sanitize);
    RenderedFragment {
        html: sanitized.html,
        diagnostics: sanitized.diagnostics,
    }
}

/// Full-document mode: strips the header block and returns its metadata alongside
/// the rendered body.
pub fn render_document(stored: &str, context_path: Option<&str>, config: &EngineConfig) -> RenderedDocument {
    let parsed = parse_document(stored);
    let fragment = render_fragment(&parsed.body, context_path, config);
    RenderedDocument {
        html: fragment.html,
        metadata: parsed.metadata,
        diagnostics: fragment.diagnostics,
    }
}
