//! Single source of truth for an open post.
//!
//! The session owns the metadata mapping and the body text. The structural tree is
//! derived from the body on demand and remembered together with the body text it
//! reflects, so that edits which do not change meaning never bounce between the
//! text view and the visual view.

use serde::Serialize;

use crate::error::{SessionError, SessionResult};
use crate::frontmatter::{MetadataMap, MetadataValue, parse_document, serialize_document};
use crate::options::EngineConfig;
use crate::render::{RenderedFragment, render_fragment};
use crate::store::DocumentStore;
use crate::structure::{Node, semantically_equal, to_structure_with_prefix, to_text};

/// What changed after an edit, and which derived views need refreshing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub body_changed: bool,
    pub refresh_text_view: bool,
    pub refresh_structure_view: bool,
    pub revision: u64,
}

impl SyncOutcome {
    fn unchanged(revision: u64) -> Self {
        Self {
            revision,
            ..Self::default()
        }
    }
}

#[derive(Debug)]
struct OpenDocument {
    path: Option<String>,
    metadata: MetadataMap,
    body_text: String,
    structural_tree: Option<Node>,
    last_synced_body_text: String,
    saved_text: String,
    revision: u64,
}

impl OpenDocument {
    fn stored_text(&self) -> String {
        serialize_document(&self.metadata, &self.body_text)
    }
}

#[derive(Debug, Default)]
pub struct DocumentSession {
    config: EngineConfig,
    document: Option<OpenDocument>,
}

impl DocumentSession {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            document: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.document.is_some()
    }

    fn open_ref(&self, operation: &'static str) -> SessionResult<&OpenDocument> {
        self.document
            .as_ref()
            .ok_or(SessionError::NotOpen { operation })
    }

    fn open_mut(&mut self, operation: &'static str) -> SessionResult<&mut OpenDocument> {
        self.document
            .as_mut()
            .ok_or(SessionError::NotOpen { operation })
    }

    /// Replaces any open document. `path` is the document-root relative location,
    /// used to resolve same-directory images.
    pub fn open_document(&mut self, stored_text: &str, path: Option<&str>) {
        let parsed = parse_document(stored_text);
        tracing::trace!(path, keys = parsed.metadata.len(), "document opened");
        // Compared in normalized form so that opening never reads as an edit.
        let saved_text = serialize_document(&parsed.metadata, &parsed.body);
        self.document = Some(OpenDocument {
            path: path.map(str::to_string),
            metadata: parsed.metadata,
            last_synced_body_text: parsed.body.clone(),
            body_text: parsed.body,
            structural_tree: None,
            saved_text,
            revision: 0,
        });
    }

    pub fn open_from_store(&mut self, store: &dyn DocumentStore, path: &str) -> SessionResult<()> {
        let stored_text = store.read(path)?;
        self.open_document(&stored_text, Some(path));
        Ok(())
    }

    pub fn close_document(&mut self) {
        if let Some(document) = self.document.take() {
            tracing::trace!(path = document.path.as_deref(), "document closed");
        }
    }

    pub fn path(&self) -> SessionResult<Option<&str>> {
        Ok(self.open_ref("path")?.path.as_deref())
    }

    pub fn metadata(&self) -> SessionResult<&MetadataMap> {
        Ok(&self.open_ref("metadata")?.metadata)
    }

    pub fn body_text(&self) -> SessionResult<&str> {
        Ok(&self.open_ref("body_text")?.body_text)
    }

    pub fn revision(&self) -> SessionResult<u64> {
        Ok(self.open_ref("revision")?.revision)
    }

    pub fn current_stored_text(&self) -> SessionResult<String> {
        Ok(self.open_ref("current_stored_text")?.stored_text())
    }

    /// True when the structural tree must be recomputed from the body text.
    pub fn is_structure_stale(&self) -> SessionResult<bool> {
        Ok(self.open_ref("is_structure_stale")?.structural_tree.is_none())
    }

    /// The structural tree for the current body, recomputed if stale.
    pub fn structural_tree(&mut self) -> SessionResult<&Node> {
        let Self { config, document } = self;
        let document = document
            .as_mut()
            .ok_or(SessionError::NotOpen {
                operation: "structural_tree",
            })?;

        if document.structural_tree.is_none() {
            document.last_synced_body_text = document.body_text.clone();
        }
        let tree = document.structural_tree.get_or_insert_with(|| {
            to_structure_with_prefix(
                &document.body_text,
                document.path.as_deref(),
                &config.image_route_prefix,
            )
        });
        Ok(tree)
    }

    /// Applies an edit made in the text view.
    pub fn set_body_from_text(&mut self, new_body: &str) -> SessionResult<SyncOutcome> {
        let document = self.open_mut("set_body_from_text")?;
        if new_body == document.body_text {
            return Ok(SyncOutcome::unchanged(document.revision));
        }

        document.body_text = new_body.to_string();
        document.revision += 1;

        let stale = !semantically_equal(&document.body_text, &document.last_synced_body_text);
        if stale {
            document.structural_tree = None;
        } else {
            tracing::trace!("text edit keeps the structural view current");
        }

        Ok(SyncOutcome {
            body_changed: true,
            refresh_text_view: false,
            refresh_structure_view: stale,
            revision: document.revision,
        })
    }

    /// Applies an edit made in the visual view. A tree whose text form means the
    /// same as the current body leaves the body untouched.
    ///
    /// The remembered tree is the one the new body parses to. When that differs
    /// from `tree` (fused emphasis, clamped heading levels and the like), the
    /// outcome asks the visual view to refresh.
    pub fn set_body_from_structure(&mut self, tree: Node) -> SessionResult<SyncOutcome> {
        let Self { config, document } = self;
        let document = document.as_mut().ok_or(SessionError::NotOpen {
            operation: "set_body_from_structure",
        })?;
        let proposed = to_text(&tree);
        let reparsed = to_structure_with_prefix(
            &proposed,
            document.path.as_deref(),
            &config.image_route_prefix,
        );
        let reshaped = reparsed != tree;
        if reshaped {
            tracing::debug!("structural edit normalized on its way to text");
        }

        if semantically_equal(&proposed, &document.body_text) {
            tracing::debug!("structural edit echoes the current body; ignored");
            document.structural_tree = Some(reparsed);
            document.last_synced_body_text = document.body_text.clone();
            return Ok(SyncOutcome {
                refresh_structure_view: reshaped,
                ..SyncOutcome::unchanged(document.revision)
            });
        }

        document.body_text = keep_leading_blank_lines(&document.body_text, &proposed);
        document.last_synced_body_text = document.body_text.clone();
        document.structural_tree = Some(reparsed);
        document.revision += 1;

        Ok(SyncOutcome {
            body_changed: true,
            refresh_text_view: true,
            refresh_structure_view: reshaped,
            revision: document.revision,
        })
    }

    /// Sets one metadata field and returns the recomputed stored text. The key is
    /// stored in its normalized single-line form.
    pub fn set_metadata_field(&mut self, key: &str, value: MetadataValue) -> SessionResult<String> {
        let document = self.open_mut("set_metadata_field")?;
        if !document.metadata.set(key, value) {
            return Err(SessionError::InvalidMetadataKey {
                key: key.to_string(),
            });
        }
        document.revision += 1;
        Ok(document.stored_text())
    }

    pub fn remove_metadata_field(&mut self, key: &str) -> SessionResult<Option<MetadataValue>> {
        let document = self.open_mut("remove_metadata_field")?;
        let removed = document.metadata.remove(key);
        if removed.is_some() {
            document.revision += 1;
        }
        Ok(removed)
    }

    /// Replaces the whole metadata mapping and returns the recomputed stored text.
    pub fn set_metadata(&mut self, metadata: MetadataMap) -> SessionResult<String> {
        let document = self.open_mut("set_metadata")?;
        if document.metadata != metadata {
            document.metadata = metadata;
            document.revision += 1;
        }
        Ok(document.stored_text())
    }

    pub fn is_dirty(&self) -> SessionResult<bool> {
        let document = self.open_ref("is_dirty")?;
        Ok(document.stored_text() != document.saved_text)
    }

    /// Records the current stored text as persisted and returns it.
    pub fn mark_saved(&mut self) -> SessionResult<String> {
        let document = self.open_mut("mark_saved")?;
        document.saved_text = document.stored_text();
        Ok(document.saved_text.clone())
    }

    pub fn save_to_store(&mut self, store: &dyn DocumentStore) -> SessionResult<()> {
        let document = self.open_ref("save_to_store")?;
        let path = document.path.as_deref().ok_or(SessionError::MissingPath)?;
        let stored_text = document.stored_text();
        store.write(path, &stored_text)?;
        self.mark_saved()?;
        Ok(())
    }

    /// Preview of the body alone, with images resolved against the document path.
    pub fn render_preview(&self) -> SessionResult<RenderedFragment> {
        let document = self.open_ref("render_preview")?;
        Ok(render_fragment(
            &document.body_text,
            document.path.as_deref(),
            &self.config,
        ))
    }
}

fn keep_leading_blank_lines(previous: &str, proposed: &str) -> String {
    let is_newline = |ch: char| ch == '\n' || ch == '\r';
    let prefix_len = previous.len() - previous.trim_start_matches(is_newline).len();
    format!(
        "{}{}",
        &previous[..prefix_len],
        proposed.trim_start_matches(is_newline)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FsDocumentStore;
    use tempfile::tempdir;

    const STORED: &str = "---\ntitle: \"Hi\"\n---\n\nHello **world**\n";

    fn open(stored: &str, path: Option<&str>) -> DocumentSession {
        let mut session = DocumentSession::default();
        session.open_document(stored, path);
        session
    }

    #[test]
    fn opening_splits_header_and_body() {
        let mut session = open(STORED, None);
        assert_eq!(session.metadata().unwrap().get_str("title"), Some("Hi"));
        assert_eq!(session.body_text().unwrap(), "\nHello **world**\n");
        assert!(session.is_structure_stale().unwrap());

        let tree = session.structural_tree().unwrap().clone();
        assert_eq!(
            tree,
            Node::document(vec![Node::paragraph(vec![
                Node::text("Hello "),
                Node::Bold {
                    children: vec![Node::text("world")],
                },
            ])])
        );
        assert!(!session.is_structure_stale().unwrap());
        assert_eq!(session.current_stored_text().unwrap(), STORED);
    }

    #[test]
    fn echoed_structure_leaves_the_body_alone() {
        let mut session = open(STORED, None);
        let tree = session.structural_tree().unwrap().clone();

        let outcome = session.set_body_from_structure(tree).unwrap();
        assert!(!outcome.body_changed);
        assert!(!outcome.refresh_text_view);
        assert_eq!(session.body_text().unwrap(), "\nHello **world**\n");
        assert_eq!(session.current_stored_text().unwrap(), STORED);
    }

    #[test]
    fn structural_edit_rewrites_body_and_keeps_leading_blank_line() {
        let mut session = open(STORED, None);
        let tree = Node::document(vec![Node::paragraph(vec![
            Node::text("Hello "),
            Node::Italic {
                children: vec![Node::text("there")],
            },
        ])]);

        let outcome = session.set_body_from_structure(tree).unwrap();
        assert!(outcome.body_changed);
        assert!(outcome.refresh_text_view);
        assert!(!outcome.refresh_structure_view);
        assert_eq!(session.body_text().unwrap(), "\nHello _there_\n");
        assert_eq!(
            session.current_stored_text().unwrap(),
            "---\ntitle: \"Hi\"\n---\n\nHello _there_\n"
        );
    }

    #[test]
    fn formatting_only_text_edits_do_not_invalidate_the_tree() {
        let mut session = open(STORED, None);
        session.structural_tree().unwrap();

        let outcome = session.set_body_from_text("\nHello __world__\n\n").unwrap();
        assert!(outcome.body_changed);
        assert!(!outcome.refresh_structure_view);
        assert!(!session.is_structure_stale().unwrap());
        assert_eq!(session.body_text().unwrap(), "\nHello __world__\n\n");
    }

    #[test]
    fn meaningful_text_edits_mark_the_tree_stale() {
        let mut session = open(STORED, None);
        session.structural_tree().unwrap();

        let outcome = session.set_body_from_text("\nHello world\n").unwrap();
        assert!(outcome.refresh_structure_view);
        assert!(session.is_structure_stale().unwrap());

        let tree = session.structural_tree().unwrap();
        assert_eq!(
            tree,
            &Node::document(vec![Node::paragraph(vec![Node::text("Hello world")])])
        );
    }

    #[test]
    fn identical_text_is_a_no_op() {
        let mut session = open(STORED, None);
        let outcome = session.set_body_from_text("\nHello **world**\n").unwrap();
        assert_eq!(outcome, SyncOutcome::unchanged(0));
    }

    #[test]
    fn metadata_edits_recompute_stored_text() {
        let mut session = open(STORED, None);
        let stored = session
            .set_metadata_field("tags", vec!["a".to_string()].into())
            .unwrap();
        assert_eq!(
            stored,
            "---\ntitle: \"Hi\"\ntags: [\"a\"]\n---\n\nHello **world**\n"
        );

        let removed = session.remove_metadata_field("title").unwrap();
        assert_eq!(removed, Some(MetadataValue::from("Hi")));
        assert_eq!(
            session.current_stored_text().unwrap(),
            "---\ntags: [\"a\"]\n---\n\nHello **world**\n"
        );
    }

    #[test]
    fn every_metadata_value_matches_its_stored_text() {
        let mut session = open(STORED, None);
        session.set_metadata_field("order", MetadataValue::Number(3.0)).unwrap();
        session.set_metadata_field("cover", MetadataValue::Null).unwrap();
        session.set_metadata_field("weight", MetadataValue::Number(2.5)).unwrap();
        session
            .set_metadata_field("summary", "two\nlines \"quoted\"".into())
            .unwrap();
        session.set_metadata_field("see: also", "x".into()).unwrap();
        session.set_metadata_field(" multi\nline ", true.into()).unwrap();

        let stored = session.current_stored_text().unwrap();
        assert!(stored.contains("order: 3\n"));
        assert!(stored.contains("\"see: also\": \"x\"\n"));
        assert!(stored.contains("multi line: true\n"));
        assert_eq!(&parse_document(&stored).metadata, session.metadata().unwrap());
    }

    #[test]
    fn numeric_and_null_values_survive_open_and_save() {
        let stored = "---\norder: 3\ncover: null\nempty:\n---\nBody";
        let session = open(stored, None);
        let metadata = session.metadata().unwrap();
        assert_eq!(metadata.get("order"), Some(&MetadataValue::Number(3.0)));
        assert_eq!(metadata.get("cover"), Some(&MetadataValue::Null));
        assert_eq!(metadata.get("empty"), Some(&MetadataValue::Null));
        assert_eq!(
            session.current_stored_text().unwrap(),
            "---\norder: 3\ncover: null\nempty: null\n---\nBody"
        );
        assert!(!session.is_dirty().unwrap());
    }

    #[test]
    fn blank_metadata_keys_are_rejected() {
        let mut session = open(STORED, None);
        assert!(matches!(
            session.set_metadata_field(" \n ", "x".into()),
            Err(SessionError::InvalidMetadataKey { .. })
        ));
        assert_eq!(session.revision().unwrap(), 0);
        assert_eq!(session.current_stored_text().unwrap(), STORED);
    }

    #[test]
    fn reshaped_structural_edits_ask_the_visual_view_to_refresh() {
        let mut session = open(STORED, None);
        let tree = Node::document(vec![Node::paragraph(vec![
            Node::Bold {
                children: vec![Node::text("Hello")],
            },
            Node::Bold {
                children: vec![Node::text(", world")],
            },
        ])]);

        let outcome = session.set_body_from_structure(tree).unwrap();
        assert!(outcome.body_changed);
        assert!(outcome.refresh_structure_view);
        assert_eq!(session.body_text().unwrap(), "\n**Hello, world**\n");
        assert_eq!(
            session.structural_tree().unwrap(),
            &Node::document(vec![Node::paragraph(vec![Node::Bold {
                children: vec![Node::text("Hello, world")],
            }])])
        );
    }

    #[test]
    fn image_round_trip_keeps_the_same_directory_reference() {
        let stored = "---\ntitle: \"Pic\"\n---\n\n![x](./images/x.png)\n";
        let mut session = open(stored, Some("blog/2024/01/post.md"));

        let tree = session.structural_tree().unwrap().clone();
        let image = tree.images()[0].clone();
        assert_eq!(image.display_src, "/api/images/blog/2024/01/images/x.png");

        let outcome = session.set_body_from_structure(tree).unwrap();
        assert!(!outcome.body_changed);
        assert_eq!(session.current_stored_text().unwrap(), stored);
    }

    #[test]
    fn dirty_tracking_follows_saves() {
        let mut session = open(STORED, None);
        assert!(!session.is_dirty().unwrap());

        let unquoted = open("---\ntitle: Hi\n---\nBody", None);
        assert!(!unquoted.is_dirty().unwrap());

        session.set_body_from_text("\nHello again\n").unwrap();
        assert!(session.is_dirty().unwrap());

        let saved = session.mark_saved().unwrap();
        assert_eq!(saved, "---\ntitle: \"Hi\"\n---\n\nHello again\n");
        assert!(!session.is_dirty().unwrap());
    }

    #[test]
    fn operations_before_open_are_rejected() {
        let mut session = DocumentSession::default();
        assert!(matches!(
            session.set_body_from_text("x"),
            Err(SessionError::NotOpen {
                operation: "set_body_from_text"
            })
        ));
        assert!(matches!(
            session.current_stored_text(),
            Err(SessionError::NotOpen { .. })
        ));
        assert!(session.structural_tree().is_err());
        assert!(session.set_metadata_field("a", true.into()).is_err());

        session.open_document(STORED, None);
        session.close_document();
        assert!(session.body_text().is_err());
    }

    #[test]
    fn store_round_trip_saves_and_clears_dirty_state() {
        let dir = tempdir().unwrap();
        let store = FsDocumentStore::new(dir.path());
        store.write("blog/post.md", STORED).unwrap();

        let mut session = DocumentSession::default();
        session.open_from_store(&store, "blog/post.md").unwrap();
        session.set_metadata_field("status", "published".into()).unwrap();
        assert!(session.is_dirty().unwrap());

        session.save_to_store(&store).unwrap();
        assert!(!session.is_dirty().unwrap());
        assert!(store.read("blog/post.md").unwrap().contains("status: \"published\""));
    }

    #[test]
    fn saving_without_a_path_fails() {
        let dir = tempdir().unwrap();
        let store = FsDocumentStore::new(dir.path());
        let mut session = open(STORED, None);
        assert!(matches!(
            session.save_to_store(&store),
            Err(SessionError::MissingPath)
        ));
    }

    #[test]
    fn preview_resolves_images_against_the_document_path() {
        let session = open("![x](./x.png)", Some("blog/post.md"));
        let preview = session.render_preview().unwrap();
        assert!(preview.html.contains("/api/images/blog/x.png"));
    }
}
