use crate::html::plaintext_to_html;
use crate::pipeline::{GenerationResult, OutputImage};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("no image to upscale")]
    EmptyGallery,
    #[error("bad image index: {index} (gallery has {len} images)")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("generation info carries {infotexts} infotexts for {gallery} gallery images")]
    InfotextMismatch { infotexts: usize, gallery: usize },
    #[error("gallery image {index} has no saved reference")]
    MissingReference { index: usize },
    #[error("invalid generation info: {0}")]
    BadInfo(#[from] serde_json::Error),
    #[error("invalid inline image data: {0}")]
    BadInlineData(#[from] base64::DecodeError),
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// One gallery entry as the UI hands it back: either an already-saved file
/// marker (URL-like, possibly with a cache-busting query suffix) or inline
/// base64 image data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GallerySource {
    Saved { name: String },
    Inline(String),
}

impl GallerySource {
    /// Saved-file reference with any `?`-delimited suffix stripped.
    pub fn saved_reference(&self) -> Option<&str> {
        match self {
            GallerySource::Saved { name } => {
                Some(name.rsplit_once('?').map(|(kept, _)| kept).unwrap_or(name))
            }
            GallerySource::Inline(_) => None,
        }
    }
}

/// Decodes a gallery entry back into pixel data.
///
/// Inline entries are base64-decoded (with or without a `data:` URL
/// prefix); saved entries are loaded from their on-disk location.
pub fn decode_source(source: &GallerySource) -> Result<DynamicImage, ReconcileError> {
    match source {
        GallerySource::Inline(data) => {
            let encoded = data
                .rsplit_once("base64,")
                .map(|(_, payload)| payload)
                .unwrap_or(data);
            let bytes = BASE64_STANDARD.decode(encoded.trim())?;
            Ok(image::load_from_memory(&bytes)?)
        }
        GallerySource::Saved { name } => {
            let path = name.rsplit_once('?').map(|(kept, _)| kept).unwrap_or(name);
            let file = std::fs::read(path).map_err(|source| ReconcileError::Open {
                path: path.to_string(),
                source,
            })?;
            Ok(image::load_from_memory(&file)?)
        }
    }
}

/// Caller-owned metadata parallel to the gallery: one infotext per image
/// plus the displayed summary. Unknown keys from the UI blob survive a
/// round trip untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationInfo {
    #[serde(default)]
    pub infotexts: Vec<String>,
    #[serde(default)]
    pub info: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GenerationInfo {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Everything the UI needs after splicing a regenerated image in.
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub gallery: Vec<OutputImage>,
    pub generation_info_json: String,
    pub info_html: String,
    pub comments_html: String,
}

/// Splices a regeneration result into an existing gallery.
///
/// The slot at `gallery_index` is replaced by every image the result
/// produced; untouched slots become placeholders back-referencing their
/// saved location, so unchanged images are never re-encoded. `info` is
/// updated in place: its infotext slot is spliced the same way, and the
/// top-level summary is taken from the result wholesale.
pub fn reconcile(
    gallery: &[GallerySource],
    gallery_index: usize,
    info: &mut GenerationInfo,
    result: &GenerationResult,
) -> Result<ReconcileOutcome, ReconcileError> {
    if gallery.is_empty() {
        return Err(ReconcileError::EmptyGallery);
    }
    if gallery_index >= gallery.len() {
        return Err(ReconcileError::IndexOutOfRange {
            index: gallery_index,
            len: gallery.len(),
        });
    }
    if info.infotexts.len() != gallery.len() {
        return Err(ReconcileError::InfotextMismatch {
            infotexts: info.infotexts.len(),
            gallery: gallery.len(),
        });
    }

    let mut new_gallery = Vec::with_capacity(gallery.len() - 1 + result.images.len());
    for (index, source) in gallery.iter().enumerate() {
        if index == gallery_index {
            new_gallery.extend(result.images.iter().cloned());
        } else {
            let reference = source
                .saved_reference()
                .ok_or(ReconcileError::MissingReference { index })?;
            new_gallery.push(OutputImage::placeholder(reference));
        }
    }

    info.infotexts.splice(
        gallery_index..gallery_index + 1,
        result.infotexts.iter().cloned(),
    );
    info.info = result.info.clone();

    Ok(ReconcileOutcome {
        gallery: new_gallery,
        generation_info_json: serde_json::to_string(info)?,
        info_html: plaintext_to_html(&result.info, None),
        comments_html: plaintext_to_html(&result.comments, Some("comments")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn saved(name: &str) -> GallerySource {
        GallerySource::Saved {
            name: name.to_string(),
        }
    }

    fn three_image_setup() -> (Vec<GallerySource>, GenerationInfo) {
        let gallery = vec![
            saved("outputs/a1.png?t=1"),
            saved("outputs/b1.png?t=2"),
            saved("outputs/c1.png"),
        ];
        let info = GenerationInfo {
            infotexts: vec!["A1".into(), "B1".into(), "C1".into()],
            info: "A1".into(),
            extra: Map::new(),
        };
        (gallery, info)
    }

    fn single_image_result(infotext: &str, saved_as: &str) -> GenerationResult {
        GenerationResult {
            images: vec![OutputImage::placeholder(saved_as)],
            infotexts: vec![infotext.into()],
            info: infotext.into(),
            comments: String::new(),
        }
    }

    #[test]
    fn splices_single_regenerated_image() {
        let (gallery, mut info) = three_image_setup();
        let result = single_image_result("B2", "outputs/b2.png");

        let outcome = reconcile(&gallery, 1, &mut info, &result).expect("reconcile failed");

        assert_eq!(outcome.gallery.len(), 3);
        assert_eq!(outcome.gallery[0].reference(), Some("outputs/a1.png"));
        assert_eq!(outcome.gallery[1].reference(), Some("outputs/b2.png"));
        assert_eq!(outcome.gallery[2].reference(), Some("outputs/c1.png"));
        assert_eq!(info.infotexts, vec!["A1", "B2", "C1"]);
    }

    #[test]
    fn placeholders_strip_query_suffix_only() {
        let (gallery, mut info) = three_image_setup();
        let result = single_image_result("C2", "outputs/c2.png");

        let outcome = reconcile(&gallery, 2, &mut info, &result).expect("reconcile failed");

        // Untouched entries keep their position and identity, minus the
        // cache-busting suffix.
        assert_eq!(outcome.gallery[0].reference(), Some("outputs/a1.png"));
        assert_eq!(outcome.gallery[1].reference(), Some("outputs/b1.png"));
    }

    #[test]
    fn fan_out_grows_gallery_by_result_size() {
        let (gallery, mut info) = three_image_setup();
        let result = GenerationResult {
            images: vec![
                OutputImage::placeholder("outputs/b2-0.png"),
                OutputImage::placeholder("outputs/b2-1.png"),
            ],
            infotexts: vec!["B2-0".into(), "B2-1".into()],
            info: "B2-0".into(),
            comments: String::new(),
        };

        let outcome = reconcile(&gallery, 1, &mut info, &result).expect("reconcile failed");

        assert_eq!(outcome.gallery.len(), gallery.len() - 1 + result.images.len());
        assert_eq!(info.infotexts, vec!["A1", "B2-0", "B2-1", "C1"]);
    }

    #[test]
    fn summary_is_overwritten_from_result_regardless_of_index() {
        // Known quirk, kept on purpose: the top-level summary always comes
        // from the regenerated image even when another slot's summary was
        // showing.
        let (gallery, mut info) = three_image_setup();
        let result = single_image_result("C2", "outputs/c2.png");

        reconcile(&gallery, 2, &mut info, &result).expect("reconcile failed");
        assert_eq!(info.info, "C2");
    }

    #[test]
    fn rejects_empty_gallery_and_bad_index() {
        let mut info = GenerationInfo::default();
        let result = single_image_result("X", "outputs/x.png");
        assert!(matches!(
            reconcile(&[], 0, &mut info, &result),
            Err(ReconcileError::EmptyGallery)
        ));

        let (gallery, mut info) = three_image_setup();
        assert!(matches!(
            reconcile(&gallery, 3, &mut info, &result),
            Err(ReconcileError::IndexOutOfRange { index: 3, len: 3 })
        ));
    }

    #[test]
    fn rejects_infotext_gallery_length_mismatch() {
        let (gallery, mut info) = three_image_setup();
        info.infotexts.pop();
        let result = single_image_result("X", "outputs/x.png");
        assert!(matches!(
            reconcile(&gallery, 0, &mut info, &result),
            Err(ReconcileError::InfotextMismatch {
                infotexts: 2,
                gallery: 3
            })
        ));
    }

    #[test]
    fn unknown_info_keys_survive_reserialization() {
        let (gallery, _) = three_image_setup();
        let mut info = GenerationInfo::from_json(
            r#"{"infotexts":["A1","B1","C1"],"info":"A1","seed":123,"job_timestamp":"0"}"#,
        )
        .expect("parse failed");
        let result = single_image_result("B2", "outputs/b2.png");

        let outcome = reconcile(&gallery, 1, &mut info, &result).expect("reconcile failed");
        let reparsed: Value =
            serde_json::from_str(&outcome.generation_info_json).expect("bad json");
        assert_eq!(reparsed["seed"], json!(123));
        assert_eq!(reparsed["job_timestamp"], json!("0"));
        assert_eq!(reparsed["info"], json!("B2"));
    }

    #[test]
    fn decodes_inline_base64_image_data() {
        use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
        use image::{DynamicImage, ImageFormat, RgbImage};
        use std::io::Cursor;

        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(2, 3))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("failed to encode png");
        let source = GallerySource::Inline(format!(
            "data:image/png;base64,{}",
            BASE64_STANDARD.encode(&bytes)
        ));

        let decoded = decode_source(&source).expect("decode failed");
        assert_eq!(decoded.width(), 2);
        assert_eq!(decoded.height(), 3);
    }

    #[test]
    fn decodes_saved_entry_after_stripping_query_suffix() {
        use image::{DynamicImage, RgbImage};

        let path = std::env::temp_dir().join(format!(
            "forge_gen_link_decode_{}.png",
            std::process::id()
        ));
        DynamicImage::ImageRgb8(RgbImage::new(3, 2))
            .save(&path)
            .expect("failed to write temp png");

        let source = GallerySource::Saved {
            name: format!("{}?t=99", path.display()),
        };
        let decoded = decode_source(&source).expect("decode failed");
        assert_eq!(decoded.width(), 3);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn gallery_source_parses_both_shapes() {
        let sources: Vec<GallerySource> = serde_json::from_str(
            r#"[{"name":"outputs/a.png?x=1"},"data:image/png;base64,AAAA"]"#,
        )
        .expect("parse failed");
        assert_eq!(sources[0].saved_reference(), Some("outputs/a.png"));
        assert_eq!(sources[1].saved_reference(), None);
    }
}
