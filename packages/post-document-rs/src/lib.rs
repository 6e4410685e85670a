pub mod assets;
pub mod error;
pub mod frontmatter;
pub mod logging;
pub mod options;
pub mod render;
pub mod sanitize;
pub mod session;
pub mod store;
pub mod structure;

use napi::bindgen_prelude::Result;
use napi_derive::napi;
use serde::Serialize;
use serde_json::Value;

use crate::frontmatter::{MetadataMap, MetadataValue};
use crate::options::EngineConfig;
use crate::session::DocumentSession;
use crate::structure::Node;

fn to_napi_error(error: impl std::fmt::Display) -> napi::Error {
    napi::Error::from_reason(error.to_string())
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(to_napi_error)
}

fn resolve_config(options: Option<Value>) -> Result<EngineConfig> {
    EngineConfig::from_value(options).map_err(to_napi_error)
}

fn metadata_from_value(value: Value) -> Result<MetadataMap> {
    serde_json::from_value(value).map_err(to_napi_error)
}

fn tree_from_value(value: Value) -> Result<Node> {
    serde_json::from_value(value).map_err(to_napi_error)
}

fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

#[napi(object)]
pub struct AssetReferencesResult {
    #[napi(js_name = "displayReference")]
    pub display_reference: String,
    #[napi(js_name = "storageReference")]
    pub storage_reference: String,
    #[napi(js_name = "storagePath")]
    pub storage_path: String,
}

/// Split stored text into `{ metadata, body }`.
#[napi(js_name = "parseDocument")]
pub fn parse_document(stored_text: String) -> Result<Value> {
    to_json(&frontmatter::parse_document(&stored_text))
}

#[napi(js_name = "serializeDocument")]
pub fn serialize_document(metadata: Value, body: String) -> Result<String> {
    let metadata = metadata_from_value(metadata)?;
    Ok(frontmatter::serialize_document(&metadata, &body))
}

#[napi(js_name = "validateFrontmatter")]
pub fn validate_frontmatter(metadata: Value, options: Option<Value>) -> Result<Value> {
    let config = resolve_config(options)?;
    let metadata = metadata_from_value(metadata)?;
    to_json(&frontmatter::validate_frontmatter(
        &metadata,
        config.meta_description_max_length,
    ))
}

#[napi(js_name = "generateMetaDescription")]
pub fn generate_meta_description(body: String, max_length: Option<u32>) -> String {
    let max_length = max_length
        .map(|value| value as usize)
        .filter(|value| *value > 0)
        .unwrap_or(options::DEFAULT_META_DESCRIPTION_MAX_LENGTH);
    frontmatter::generate_meta_description(&body, max_length)
}

/// Stored text for a new draft dated today.
#[napi(js_name = "createNewPost")]
pub fn create_new_post(title: Option<String>) -> String {
    frontmatter::create_new_post(title.as_deref(), &today())
}

#[napi(js_name = "toStructure")]
pub fn to_structure(body: String, context_path: Option<String>, options: Option<Value>) -> Result<Value> {
    let config = resolve_config(options)?;
    let tree = structure::to_structure_with_prefix(
        &body,
        context_path.as_deref(),
        &config.image_route_prefix,
    );
    to_json(&tree)
}

#[napi(js_name = "toText")]
pub fn to_text(tree: Value) -> Result<String> {
    let tree = tree_from_value(tree)?;
    Ok(structure::to_text(&tree))
}

#[napi(js_name = "semanticallyEqual")]
pub fn semantically_equal(a: String, b: String) -> bool {
    structure::semantically_equal(&a, &b)
}

/// Body-only preview: sanitized HTML for the body text.
#[napi(js_name = "renderMarkdown")]
pub fn render_markdown(body: String, context_path: Option<String>, options: Option<Value>) -> Result<String> {
    let config = resolve_config(options)?;
    Ok(render::render_fragment(&body, context_path.as_deref(), &config).html)
}

/// Full-document preview: `{ html, metadata, diagnostics }`.
#[napi(js_name = "renderDocument")]
pub fn render_document(stored_text: String, context_path: Option<String>, options: Option<Value>) -> Result<Value> {
    let config = resolve_config(options)?;
    to_json(&render::render_document(
        &stored_text,
        context_path.as_deref(),
        &config,
    ))
}

#[napi(js_name = "sanitizeHtml")]
pub fn sanitize_html(html: String, options: Option<Value>) -> Result<Value> {
    let config = resolve_config(options)?;
    to_json(&sanitize::sanitize_html(&html, &config.sanitize))
}

#[napi(js_name = "assetReferences")]
pub fn asset_references(
    context_path: String,
    file_name: String,
    options: Option<Value>,
) -> Result<AssetReferencesResult> {
    let config = resolve_config(options)?;
    let references = assets::asset_references(&context_path, &file_name, &config.image_route_prefix);
    Ok(AssetReferencesResult {
        display_reference: references.display_reference,
        storage_reference: references.storage_reference,
        storage_path: assets::asset_storage_path(&context_path, &file_name),
    })
}

#[napi(js_name = "initLogging")]
pub fn init_logging(filter: Option<String>) -> bool {
    logging::init(filter.as_deref())
}

#[napi(js_name = "DocumentSession")]
pub struct DocumentSessionBinding {
    session: DocumentSession,
}

#[napi]
impl DocumentSessionBinding {
    #[napi(constructor)]
    pub fn new(options: Option<Value>) -> Result<Self> {
        Ok(Self {
            session: DocumentSession::new(resolve_config(options)?),
        })
    }

    #[napi(js_name = "openDocument")]
    pub fn open_document(&mut self, stored_text: String, path: Option<String>) {
        self.session.open_document(&stored_text, path.as_deref());
    }

    #[napi(js_name = "closeDocument")]
    pub fn close_document(&mut self) {
        self.session.close_document();
    }

    #[napi(js_name = "isOpen")]
    pub fn is_open(&self) -> bool {
        self.session.is_open()
    }

    #[napi(js_name = "setBodyFromText")]
    pub fn set_body_from_text(&mut self, body: String) -> Result<Value> {
        let outcome = self.session.set_body_from_text(&body).map_err(to_napi_error)?;
        to_json(&outcome)
    }

    #[napi(js_name = "setBodyFromStructure")]
    pub fn set_body_from_structure(&mut self, tree: Value) -> Result<Value> {
        let tree = tree_from_value(tree)?;
        let outcome = self
            .session
            .set_body_from_structure(tree)
            .map_err(to_napi_error)?;
        to_json(&outcome)
    }

    #[napi(js_name = "setMetadataField")]
    pub fn set_metadata_field(&mut self, key: String, value: Value) -> Result<String> {
        let value: MetadataValue = serde_json::from_value(value).map_err(to_napi_error)?;
        self.session
            .set_metadata_field(&key, value)
            .map_err(to_napi_error)
    }

    #[napi(js_name = "removeMetadataField")]
    pub fn remove_metadata_field(&mut self, key: String) -> Result<Value> {
        let removed = self
            .session
            .remove_metadata_field(&key)
            .map_err(to_napi_error)?;
        to_json(&removed)
    }

    #[napi(js_name = "setMetadata")]
    pub fn set_metadata(&mut self, metadata: Value) -> Result<String> {
        let metadata = metadata_from_value(metadata)?;
        self.session.set_metadata(metadata).map_err(to_napi_error)
    }

    #[napi(js_name = "currentStoredText")]
    pub fn current_stored_text(&self) -> Result<String> {
        self.session.current_stored_text().map_err(to_napi_error)
    }

    #[napi]
    pub fn metadata(&self) -> Result<Value> {
        to_json(self.session.metadata().map_err(to_napi_error)?)
    }

    #[napi(js_name = "bodyText")]
    pub fn body_text(&self) -> Result<String> {
        self.session
            .body_text()
            .map(str::to_string)
            .map_err(to_napi_error)
    }

    #[napi(js_name = "structuralTree")]
    pub fn structural_tree(&mut self) -> Result<Value> {
        to_json(self.session.structural_tree().map_err(to_napi_error)?)
    }

    #[napi(js_name = "isDirty")]
    pub fn is_dirty(&self) -> Result<bool> {
        self.session.is_dirty().map_err(to_napi_error)
    }

    #[napi(js_name = "markSaved")]
    pub fn mark_saved(&mut self) -> Result<String> {
        self.session.mark_saved().map_err(to_napi_error)
    }

    #[napi(js_name = "renderPreview")]
    pub fn render_preview(&self) -> Result<String> {
        self.session
            .render_preview()
            .map(|fragment| fragment.html)
            .map_err(to_napi_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_binding_constructs_from_options() {
        let mut binding = DocumentSessionBinding::new(None).unwrap();
        assert!(!binding.is_open());

        binding.open_document("---\ntitle: \"Hi\"\n---\n\nHello\n".to_string(), None);
        let outcome = binding.set_body_from_text("\nHello **there**\n".to_string()).unwrap();
        assert_eq!(outcome["bodyChanged"], json!(true));
        assert_eq!(
            binding.current_stored_text().unwrap(),
            "---\ntitle: \"Hi\"\n---\n\nHello **there**\n"
        );

        let configured = DocumentSessionBinding::new(Some(json!({ "imageRoutePrefix": "/media" })));
        assert!(configured.is_ok());
    }

    #[test]
    fn invalid_options_are_reported_as_errors() {
        assert!(DocumentSessionBinding::new(Some(json!({ "gfm": "yes" }))).is_err());
        assert!(to_text(json!({ "type": "unknown" })).is_err());
    }
}
