use anyhow::{bail, Context, Result};
use serde::Deserialize;

use super::{Embedder, Embedding};

/// Longest prompt sent to the model, in bytes.
const MAX_PROMPT_BYTES: usize = 8192;

pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str) -> Result<Self> {
        let mut embedder = Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimensions: 0,
        };

        // Probe dimensions with a short test string
        let test = embedder.embed("test")?;
        if test.is_empty() {
            bail!("ollama model {model} returned an empty embedding");
        }
        embedder.dimensions = test.len();
        tracing::debug!(model, dimensions = embedder.dimensions, "ollama embedder ready");
        Ok(embedder)
    }
}

impl Embedder for OllamaEmbedder {
    fn embed(&self, text: &str) -> Result<Embedding> {
        let text = if text.is_empty() { " " } else { text };
        let text = truncate_at_char_boundary(text, MAX_PROMPT_BYTES);

        let url = format!("{}/api/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": text,
        });

        let result = ureq::post(&url).send_json(&body);

        let mut response = match result {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(code)) => {
                bail!("ollama returned HTTP {code}");
            }
            Err(e) => {
                return Err(anyhow::anyhow!(e).context("ollama embedding request failed"));
            }
        };

        let resp: EmbeddingResponse = response
            .body_mut()
            .read_json()
            .context("parsing ollama response")?;

        Ok(resp.embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn truncate_at_char_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_untouched() {
        assert_eq!(truncate_at_char_boundary("intro to rust", 8192), "intro to rust");
    }

    #[test]
    fn truncation_respects_utf8() {
        // 'é' is two bytes; cutting at 3 would split the second one
        let s = "éé";
        assert_eq!(truncate_at_char_boundary(s, 3), "é");
    }
}
