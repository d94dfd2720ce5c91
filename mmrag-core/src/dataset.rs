//! Input loading: questions, metadata tables, the text corpus and image files.
//!
//! Top-level files are fatal on failure. Individual images are not: an image
//! that is missing or cannot be decoded is logged and left out of the pool.

use crate::error::DatasetError;
use crate::poison::{PoisonRecord, PoisonTable};
use crate::types::{LoadedImage, Question};
use flate2::read::GzDecoder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Clean metadata for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMeta {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

/// `image_id -> ImageMeta`, read-only for the whole run.
pub type ImageMetadata = HashMap<String, ImageMeta>;

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, DatasetError> {
    let content = std::fs::read_to_string(path).map_err(|source| DatasetError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|e| DatasetError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Load the question set (JSON array).
pub fn load_questions(path: &Path) -> Result<Vec<Question>, DatasetError> {
    let questions: Vec<Question> = read_json(path)?;
    tracing::info!(count = questions.len(), path = %path.display(), "Loaded questions");
    Ok(questions)
}

/// Load clean image metadata (`image_id -> {path, caption}`).
pub fn load_image_metadata(path: &Path) -> Result<ImageMetadata, DatasetError> {
    let metadata: ImageMetadata = read_json(path)?;
    tracing::info!(count = metadata.len(), path = %path.display(), "Loaded image metadata");
    Ok(metadata)
}

/// Load the precomputed poison table.
pub fn load_poison_table(path: &Path) -> Result<PoisonTable, DatasetError> {
    let records: HashMap<String, PoisonRecord> = read_json(path)?;
    tracing::info!(count = records.len(), path = %path.display(), "Loaded poison metadata");
    Ok(PoisonTable::new(records))
}

#[derive(Deserialize)]
struct CorpusLine {
    id: String,
    text: String,
}

/// Load a gzip-compressed, line-delimited `{id, text}` corpus.
pub fn load_text_corpus(path: &Path) -> Result<HashMap<String, String>, DatasetError> {
    let file = std::fs::File::open(path).map_err(|source| DatasetError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(GzDecoder::new(file));
    let mut corpus = HashMap::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| DatasetError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: CorpusLine = serde_json::from_str(&line).map_err(|e| DatasetError::Parse {
            path: path.to_path_buf(),
            message: format!("line {}: {e}", lineno + 1),
        })?;
        corpus.insert(entry.id, entry.text);
    }
    tracing::info!(count = corpus.len(), path = %path.display(), "Loaded text corpus");
    Ok(corpus)
}

/// Resolves an image id to a file on disk.
///
/// The canonical path from metadata is preferred. When it is absent or does
/// not exist, `image_dir/<id><ext>` is tried for each extension in order and
/// the first existing file wins.
#[derive(Debug, Clone)]
pub struct ImageResolver {
    image_dir: PathBuf,
    extensions: Vec<String>,
}

impl ImageResolver {
    pub fn new(image_dir: impl Into<PathBuf>, extensions: Vec<String>) -> Self {
        Self {
            image_dir: image_dir.into(),
            extensions,
        }
    }

    pub fn resolve(&self, image_id: &str, canonical: Option<&str>) -> Option<PathBuf> {
        if let Some(path) = canonical.filter(|p| !p.is_empty()) {
            let path = Path::new(path);
            let candidate = if path.is_absolute() {
                path.to_path_buf()
            } else {
                self.image_dir.join(path)
            };
            if candidate.is_file() {
                return Some(candidate);
            }
            // metadata paths are sometimes relative to the dataset root instead
            if let Some(name) = path.file_name() {
                let flat = self.image_dir.join(name);
                if flat.is_file() {
                    return Some(flat);
                }
            }
        }

        self.extensions.iter().find_map(|ext| {
            let candidate = self.image_dir.join(format!("{image_id}{ext}"));
            candidate.is_file().then_some(candidate)
        })
    }
}

/// Loads and validates images for a question.
#[derive(Debug, Clone)]
pub struct ImageLoader {
    resolver: ImageResolver,
}

impl ImageLoader {
    pub fn new(resolver: ImageResolver) -> Self {
        Self { resolver }
    }

    /// Load every resolvable, decodable image. Returns the images and their ids
    /// in input order; anything unreadable is skipped with a warning.
    pub fn load<S: AsRef<str>>(
        &self,
        image_ids: &[S],
        metadata: &ImageMetadata,
    ) -> (Vec<LoadedImage>, Vec<String>) {
        let mut images = Vec::with_capacity(image_ids.len());
        let mut valid_ids = Vec::with_capacity(image_ids.len());

        for id in image_ids {
            let id = id.as_ref();
            let canonical = metadata.get(id).and_then(|m| m.path.as_deref());
            let Some(path) = self.resolver.resolve(id, canonical) else {
                tracing::warn!(image_id = id, "Image file not found, skipping");
                continue;
            };
            match decode_image(id, &path) {
                Ok(image) => {
                    valid_ids.push(id.to_string());
                    images.push(image);
                }
                Err(e) => {
                    tracing::warn!(image_id = id, error = %e, "Skipping unreadable image");
                }
            }
        }
        (images, valid_ids)
    }
}

fn decode_image(id: &str, path: &Path) -> Result<LoadedImage, DatasetError> {
    let bytes = std::fs::read(path).map_err(|source| DatasetError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let decoded = image::load_from_memory(&bytes).map_err(|e| DatasetError::ImageDecode {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(LoadedImage {
        id: id.to_string(),
        path: path.to_path_buf(),
        bytes,
        pixels: decoded.to_rgb8(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn write_png(path: &Path, rgb: [u8; 3]) {
        image::RgbImage::from_pixel(4, 4, image::Rgb(rgb))
            .save(path)
            .unwrap();
    }

    fn default_exts() -> Vec<String> {
        vec![".jpg".into(), ".png".into(), ".jpeg".into()]
    }

    #[test]
    fn test_load_questions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.json");
        std::fs::write(
            &path,
            r#"[{"qid": "q1", "question": "What?", "answers": [{"answer": "x"}],
                 "metadata": {"image_doc_ids": ["i1"]}}]"#,
        )
        .unwrap();
        let questions = load_questions(&path).unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].metadata.image_doc_ids, vec!["i1"]);
    }

    #[test]
    fn test_load_questions_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            load_questions(&missing),
            Err(DatasetError::Read { .. })
        ));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{not json").unwrap();
        assert!(matches!(load_questions(&bad), Err(DatasetError::Parse { .. })));
    }

    #[test]
    fn test_load_text_corpus_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("texts.jsonl.gz");
        let mut enc = GzEncoder::new(std::fs::File::create(&path).unwrap(), Compression::default());
        writeln!(enc, r#"{{"id": "t1", "text": "first"}}"#).unwrap();
        writeln!(enc).unwrap();
        writeln!(enc, r#"{{"id": "t2", "text": "second"}}"#).unwrap();
        enc.finish().unwrap();

        let corpus = load_text_corpus(&path).unwrap();
        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus["t2"], "second");
    }

    #[test]
    fn test_resolver_prefers_canonical_path() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("canonical.png"), [1, 2, 3]);
        write_png(&dir.path().join("img.png"), [1, 2, 3]);
        let resolver = ImageResolver::new(dir.path(), default_exts());

        assert_eq!(
            resolver.resolve("img", Some("canonical.png")),
            Some(dir.path().join("canonical.png"))
        );
        // stale canonical path falls back to the extension probe
        assert_eq!(
            resolver.resolve("img", Some("gone.jpg")),
            Some(dir.path().join("img.png"))
        );
        assert_eq!(resolver.resolve("other", None), None);
    }

    #[test]
    fn test_resolver_extension_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.jpeg"), b"").unwrap();
        std::fs::write(dir.path().join("x.jpg"), b"").unwrap();
        let resolver = ImageResolver::new(dir.path(), default_exts());
        assert_eq!(resolver.resolve("x", None), Some(dir.path().join("x.jpg")));
    }

    #[test]
    fn test_loader_skips_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("good.png"), [200, 10, 10]);
        std::fs::write(dir.path().join("corrupt.jpg"), b"not an image").unwrap();

        let loader = ImageLoader::new(ImageResolver::new(dir.path(), default_exts()));
        let (images, ids) = loader.load(&["good", "corrupt", "absent"], &ImageMetadata::new());
        assert_eq!(ids, vec!["good"]);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].pixels.dimensions(), (4, 4));
        assert!(!images[0].bytes.is_empty());
    }
}
