use serde::Serialize;

use crate::structure::document_dir;

const ASSET_DIR: &str = "images";

/// The two references an uploaded image is known by: the route the visual view
/// loads it from and the same-directory path written into body text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetReferences {
    pub display_reference: String,
    pub storage_reference: String,
}

/// Replaces every character outside `[A-Za-z0-9._-]` with `-`.
pub fn sanitize_asset_file_name(file_name: &str) -> String {
    let sanitized: String = file_name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '-'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "image".to_string()
    } else {
        sanitized
    }
}

/// References for an asset stored in the `images/` directory beside the document.
pub fn asset_references(context_path: &str, file_name: &str, route_prefix: &str) -> AssetReferences {
    let name = sanitize_asset_file_name(file_name);
    AssetReferences {
        display_reference: format!(
            "{route_prefix}{}{ASSET_DIR}/{name}",
            document_dir(context_path)
        ),
        storage_reference: format!("./{ASSET_DIR}/{name}"),
    }
}

/// Path of the stored asset relative to the document root.
pub fn asset_storage_path(context_path: &str, file_name: &str) -> String {
    format!(
        "{}{ASSET_DIR}/{}",
        document_dir(context_path),
        sanitize_asset_file_name(file_name)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::{ImageNode, Node, to_structure, to_text};

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_asset_file_name("my photo (1).PNG"), "my-photo--1-.PNG");
        assert_eq!(sanitize_asset_file_name("ok_name-2.jpg"), "ok_name-2.jpg");
        assert_eq!(sanitize_asset_file_name(""), "image");
    }

    #[test]
    fn references_point_beside_the_document() {
        let refs = asset_references("blog/2024/post.md", "a b.png", "/api/images/");
        assert_eq!(refs.display_reference, "/api/images/blog/2024/images/a-b.png");
        assert_eq!(refs.storage_reference, "./images/a-b.png");
        assert_eq!(asset_storage_path("blog/2024/post.md", "a b.png"), "blog/2024/images/a-b.png");
    }

    #[test]
    fn uploaded_image_writes_its_storage_reference() {
        let refs = asset_references("blog/post.md", "x.png", "/api/images/");
        let image = ImageNode::from_upload(&refs, "x");
        let tree = Node::document(vec![Node::paragraph(vec![Node::Image(image)])]);

        let body = to_text(&tree);
        assert_eq!(body, "![x](./images/x.png)\n");

        let reparsed = to_structure(&body, Some("blog/post.md"));
        assert_eq!(reparsed, tree);
    }
}
