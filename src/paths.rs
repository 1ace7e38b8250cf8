//! Artifact layout: where a run's outputs live.
//!
//! ```text
//! <output_root>/<document_name>/<method>/          artifact prefix
//! <output_root>/<document_name>/<method>/images/   image prefix
//! ```
//!
//! Prefixes are `/`-joined strings so the same layout works as a directory
//! tree on local disk and as a key prefix in an object-store bucket.

use serde::Serialize;

/// The two prefixes a run writes under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputPrefixes {
    pub image_prefix: String,
    pub artifact_prefix: String,
}

/// Compute the image and artifact prefixes for one document and method.
///
/// Pure and deterministic. Whether the prefix is writable is only discovered
/// when a writer first uses it.
pub fn resolve(output_root: &str, document_name: &str, method: &str) -> OutputPrefixes {
    let artifact_prefix = join(&join(output_root, document_name), method);
    let image_prefix = join(&artifact_prefix, "images");
    OutputPrefixes {
        image_prefix,
        artifact_prefix,
    }
}

/// Join two path segments with exactly one `/` between them.
///
/// A base made only of slashes is the file-system root and stays absolute.
pub fn join(base: &str, segment: &str) -> String {
    let rooted = base.starts_with('/');
    let base = base.trim_end_matches('/');
    let segment = segment.trim_start_matches('/');
    match (base.is_empty(), segment.is_empty()) {
        (true, _) if rooted => format!("/{segment}"),
        (true, _) => segment.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{base}/{segment}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_documented_layout() {
        let p = resolve("out", "paper", "auto");
        assert_eq!(p.artifact_prefix, "out/paper/auto");
        assert_eq!(p.image_prefix, "out/paper/auto/images");
    }

    #[test]
    fn image_prefix_is_always_artifact_prefix_plus_images() {
        for (root, name, method) in [
            ("out", "a", "txt"),
            ("/abs/out/", "b", "ocr"),
            ("", "c", "auto"),
            ("s3-prefix/nested", "d e", "auto"),
        ] {
            let p = resolve(root, name, method);
            assert_eq!(p.image_prefix, format!("{}/images", p.artifact_prefix));
        }
    }

    #[test]
    fn deterministic() {
        assert_eq!(resolve("r", "n", "ocr"), resolve("r", "n", "ocr"));
    }

    #[test]
    fn trailing_and_empty_roots() {
        assert_eq!(resolve("out/", "doc", "txt").artifact_prefix, "out/doc/txt");
        assert_eq!(resolve("", "doc", "txt").artifact_prefix, "doc/txt");
        assert_eq!(resolve("/data", "doc", "ocr").artifact_prefix, "/data/doc/ocr");
        assert_eq!(resolve("/", "doc", "txt").artifact_prefix, "/doc/txt");
        assert_eq!(resolve("//", "doc", "txt").image_prefix, "/doc/txt/images");
    }

    #[test]
    fn join_collapses_separators() {
        assert_eq!(join("a/", "/b"), "a/b");
        assert_eq!(join("a", ""), "a");
        assert_eq!(join("", "b"), "b");
    }
}
