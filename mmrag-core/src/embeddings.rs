//! Pluggable embedding encoders for text and images.
//!
//! Provides a trait-based abstraction over embedding models, with a local
//! hashed-feature encoder (always available) and an HTTP encoder for a
//! CLIP-style embedding service. Encoders preserve input order and
//! cardinality, and embedding `i` depends only on input `i`.

use crate::config::{EncoderConfig, EncoderKind};
use crate::error::EncodingError;
use crate::types::{Embedding, LoadedImage};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Trait for embedding encoders.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Encode texts, one embedding per input, in input order.
    async fn encode_text(&self, texts: &[String]) -> Result<Vec<Embedding>, EncodingError>;

    /// Encode images, one embedding per input, in input order.
    async fn encode_images(&self, images: &[LoadedImage])
    -> Result<Vec<Embedding>, EncodingError>;

    /// Return the dimensionality of embeddings.
    fn dimensions(&self) -> usize;

    /// Return the encoder name.
    fn name(&self) -> &str;
}

/// Scale `vector` to unit L2 norm in place. A zero vector is left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

fn finish(mut embeddings: Vec<Embedding>, normalize: bool) -> Vec<Embedding> {
    if normalize {
        for e in &mut embeddings {
            l2_normalize(e);
        }
    }
    embeddings
}

/// djb2 string hash.
fn simple_hash(s: &str) -> usize {
    let mut hash: usize = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as usize);
    }
    hash
}

/// Local encoder built from hashed features.
///
/// Text: term frequencies of lowercased alphanumeric tokens, hashed into
/// buckets. Images: a 4x4x4 RGB histogram plus an 8x8 luminance thumbnail,
/// hashed into the same number of buckets. Both modalities share a size but
/// not a semantic space, so cross-modal scores only rank consistently, they
/// do not mean anything.
#[derive(Debug, Clone)]
pub struct HashingEncoder {
    dimensions: usize,
    normalize: bool,
}

impl HashingEncoder {
    pub fn new(dimensions: usize, normalize: bool) -> Self {
        Self {
            dimensions: dimensions.max(1),
            normalize,
        }
    }

    fn embed_text(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0f32; self.dimensions];

        let lowered = text.to_lowercase();
        let mut tf: HashMap<&str, usize> = HashMap::new();
        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            *tf.entry(word).or_insert(0) += 1;
        }

        for (term, count) in &tf {
            let idx = simple_hash(term) % self.dimensions;
            vector[idx] += *count as f32;
        }
        vector
    }

    fn embed_image(&self, image: &LoadedImage) -> Embedding {
        let mut vector = vec![0.0f32; self.dimensions];
        let pixels = &image.pixels;
        let total = (pixels.width() as f32 * pixels.height() as f32).max(1.0);

        let mut histogram = [0.0f32; 64];
        for p in pixels.pixels() {
            let bin = (p[0] as usize / 64) * 16 + (p[1] as usize / 64) * 4 + p[2] as usize / 64;
            histogram[bin] += 1.0;
        }
        for (i, count) in histogram.iter().enumerate() {
            if *count > 0.0 {
                vector[simple_hash(&format!("hist:{i}")) % self.dimensions] += count / total;
            }
        }

        if pixels.width() > 0 && pixels.height() > 0 {
            let thumb =
                image::imageops::resize(pixels, 8, 8, image::imageops::FilterType::Triangle);
            for (i, p) in thumb.pixels().enumerate() {
                let luma =
                    (0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32) / 255.0;
                vector[simple_hash(&format!("lum:{i}")) % self.dimensions] += luma;
            }
        }
        vector
    }
}

#[async_trait]
impl Encoder for HashingEncoder {
    async fn encode_text(&self, texts: &[String]) -> Result<Vec<Embedding>, EncodingError> {
        let raw = texts.iter().map(|t| self.embed_text(t)).collect();
        Ok(finish(raw, self.normalize))
    }

    async fn encode_images(
        &self,
        images: &[LoadedImage],
    ) -> Result<Vec<Embedding>, EncodingError> {
        let raw = images.iter().map(|i| self.embed_image(i)).collect();
        Ok(finish(raw, self.normalize))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Encoder backed by a CLIP-style HTTP embedding service.
///
/// `POST {base_url}/embed/text` with `{"model", "inputs"}` and
/// `POST {base_url}/embed/image` with `{"model", "images"}` (base64-encoded
/// file bytes); both answer `{"embeddings": [[f32, ..], ..]}`.
pub struct HttpEncoder {
    client: reqwest::Client,
    model: String,
    base_url: String,
    dims: usize,
    normalize: bool,
}

impl HttpEncoder {
    pub fn new(config: &EncoderConfig) -> Result<Self, EncodingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EncodingError::Request {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            dims: config.dimensions,
            normalize: config.normalize,
        })
    }

    async fn post(
        &self,
        route: &str,
        body: serde_json::Value,
        expected: usize,
    ) -> Result<Vec<Embedding>, EncodingError> {
        let url = format!("{}/{}", self.base_url, route);
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| EncodingError::Request {
                message: format!("{url}: {e}"),
            })?;
        let text = resp.text().await.map_err(|e| EncodingError::Request {
            message: e.to_string(),
        })?;
        let embeddings = parse_embeddings(&text, expected)?;
        Ok(finish(embeddings, self.normalize))
    }
}

/// Parse an embedding service response and check it has one vector per input.
pub(crate) fn parse_embeddings(body: &str, expected: usize) -> Result<Vec<Embedding>, EncodingError> {
    let parsed: EmbeddingResponse =
        serde_json::from_str(body).map_err(|e| EncodingError::ResponseParse {
            message: e.to_string(),
        })?;
    if parsed.embeddings.len() != expected {
        return Err(EncodingError::Cardinality {
            expected,
            got: parsed.embeddings.len(),
        });
    }
    Ok(parsed.embeddings)
}

#[async_trait]
impl Encoder for HttpEncoder {
    async fn encode_text(&self, texts: &[String]) -> Result<Vec<Embedding>, EncodingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "inputs": texts,
        });
        self.post("embed/text", body, texts.len()).await
    }

    async fn encode_images(
        &self,
        images: &[LoadedImage],
    ) -> Result<Vec<Embedding>, EncodingError> {
        if images.is_empty() {
            return Ok(Vec::new());
        }
        let encoded: Vec<String> = images
            .iter()
            .map(|i| base64::engine::general_purpose::STANDARD.encode(&i.bytes))
            .collect();
        let body = serde_json::json!({
            "model": self.model,
            "images": encoded,
        });
        self.post("embed/image", body, images.len()).await
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Build the configured encoder once, at startup.
pub fn create_encoder(config: &EncoderConfig) -> Result<Box<dyn Encoder>, EncodingError> {
    let encoder: Box<dyn Encoder> = match config.kind {
        EncoderKind::Hashing => Box::new(HashingEncoder::new(config.dimensions, config.normalize)),
        EncoderKind::Http => Box::new(HttpEncoder::new(config)?),
    };
    tracing::info!(
        encoder = encoder.name(),
        dimensions = encoder.dimensions(),
        normalize = config.normalize,
        "Embedding encoder ready"
    );
    Ok(encoder)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_image(id: &str, rgb: [u8; 3]) -> LoadedImage {
        LoadedImage {
            id: id.into(),
            path: format!("{id}.png").into(),
            bytes: Vec::new(),
            pixels: image::RgbImage::from_pixel(16, 16, image::Rgb(rgb)),
        }
    }

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[tokio::test]
    async fn test_hashing_text_normalized() {
        let encoder = HashingEncoder::new(128, true);
        let out = encoder
            .encode_text(&["a brown horse".to_string(), "".to_string()])
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!((norm(&out[0]) - 1.0).abs() < 1e-5);
        // empty text stays a zero vector
        assert!(out[1].iter().all(|&x| x == 0.0));
    }

    #[tokio::test]
    async fn test_hashing_text_unnormalized_counts() {
        let encoder = HashingEncoder::new(64, false);
        let out = encoder
            .encode_text(&["horse horse".to_string()])
            .await
            .unwrap();
        assert_eq!(out[0].iter().sum::<f32>(), 2.0);
    }

    #[tokio::test]
    async fn test_hashing_batch_has_no_cross_talk() {
        let encoder = HashingEncoder::new(128, true);
        let alone = encoder.encode_text(&["horse".to_string()]).await.unwrap();
        let batched = encoder
            .encode_text(&["zebra crossing".to_string(), "horse".to_string()])
            .await
            .unwrap();
        assert_eq!(alone[0], batched[1]);
    }

    #[tokio::test]
    async fn test_hashing_images() {
        let encoder = HashingEncoder::new(256, true);
        let images = vec![solid_image("red", [255, 0, 0]), solid_image("blue", [0, 0, 255])];
        let out = encoder.encode_images(&images).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].len(), 256);
        assert!((norm(&out[0]) - 1.0).abs() < 1e-5);
        assert_ne!(out[0], out[1]);

        let again = encoder.encode_images(&images[..1]).await.unwrap();
        assert_eq!(again[0], out[0]);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        let mut v = vec![0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);

        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.6, 0.8]);
    }

    #[test]
    fn test_parse_embeddings_cardinality() {
        let body = r#"{"embeddings": [[0.1, 0.2], [0.3, 0.4]]}"#;
        assert_eq!(parse_embeddings(body, 2).unwrap().len(), 2);
        assert!(matches!(
            parse_embeddings(body, 3),
            Err(EncodingError::Cardinality {
                expected: 3,
                got: 2
            })
        ));
        assert!(matches!(
            parse_embeddings("{}", 1),
            Err(EncodingError::ResponseParse { .. })
        ));
    }

    #[test]
    fn test_create_encoder_default() {
        let encoder = create_encoder(&EncoderConfig::default()).unwrap();
        assert_eq!(encoder.name(), "hashing");
        assert_eq!(encoder.dimensions(), 512);
    }

    #[test]
    fn test_create_http_encoder() {
        let config = EncoderConfig {
            kind: EncoderKind::Http,
            base_url: "http://localhost:9999/".into(),
            ..Default::default()
        };
        let encoder = create_encoder(&config).unwrap();
        assert_eq!(encoder.name(), "http");
    }
}
