use sha2::{Digest, Sha256};

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 64;

/// Deterministic content embedder derived from SHA-256 digests.
///
/// Stands in for a real model: equal inputs give equal unit vectors, and
/// construction is the expensive step an extension loads once.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        self.embed(b"text", text.trim().as_bytes())
    }

    pub fn embed_image(&self, bytes: &[u8]) -> Vec<f32> {
        self.embed(b"image", bytes)
    }

    fn embed(&self, domain: &[u8], input: &[u8]) -> Vec<f32> {
        let mut values = Vec::with_capacity(self.dimensions);
        let mut block = 0u64;
        while values.len() < self.dimensions {
            let digest = Sha256::new()
                .chain_update(domain)
                .chain_update(block.to_le_bytes())
                .chain_update(input)
                .finalize();
            for byte in digest.iter() {
                if values.len() == self.dimensions {
                    break;
                }
                values.push(f32::from(*byte) / 127.5 - 1.0);
            }
            block += 1;
        }
        normalize(&mut values);
        values
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

fn normalize(values: &mut [f32]) {
    let norm = values.iter().map(|value| value * value).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in values.iter_mut() {
            *value /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::HashEmbedder;

    #[test]
    fn unit_embeddings_are_deterministic_unit_vectors() {
        let embedder = HashEmbedder::new(40);
        let first = embedder.embed_text("a red bicycle");
        let second = embedder.embed_text("  a red bicycle ");
        assert_eq!(first, second);
        assert_eq!(first.len(), 40);
        let norm = first.iter().map(|value| value * value).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn unit_text_and_image_domains_differ() {
        let embedder = HashEmbedder::default();
        assert_ne!(
            embedder.embed_text("payload"),
            embedder.embed_image(b"payload")
        );
        assert_ne!(embedder.embed_text("cat"), embedder.embed_text("dog"));
    }

    #[test]
    fn regression_zero_dimensions_are_clamped() {
        assert_eq!(HashEmbedder::new(0).embed_text("x").len(), 1);
    }
}
