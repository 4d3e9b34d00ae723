use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    pub async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let input = text.trim();
        if input.is_empty() {
            anyhow::bail!("cannot embed empty text input");
        }

        // Newer Ollama releases use /api/embed, older ones only /api/embeddings.
        match self.embed_modern(model, input).await {
            Ok(vector) => Ok(vector),
            Err(modern_err) => self.embed_legacy(model, input).await.map_err(|legacy_err| {
                anyhow::anyhow!(
                    "ollama embedding failed via /api/embed and /api/embeddings. \
                     modern error: {modern_err}; legacy error: {legacy_err}; \
                     ensure the embedding model is pulled (e.g. `ollama pull {model}`)"
                )
            }),
        }
    }

    async fn embed_modern(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        #[derive(Serialize)]
        struct EmbedReq<'a> {
            model: &'a str,
            input: &'a str,
            truncate: bool,
        }

        #[derive(Deserialize)]
        struct EmbedResp {
            embeddings: Vec<Vec<f32>>,
        }

        let url = format!("{}/api/embed", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&EmbedReq {
                model,
                input: text,
                truncate: true,
            })
            .send()
            .await
            .context("failed to call ollama embed endpoint")?;

        let response: EmbedResp = decode(response, "/api/embed").await?;
        response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("ollama /api/embed returned empty embeddings array"))
    }

    async fn embed_legacy(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        #[derive(Serialize)]
        struct EmbeddingReq<'a> {
            model: &'a str,
            prompt: &'a str,
        }

        #[derive(Deserialize)]
        struct EmbeddingResp {
            embedding: Vec<f32>,
        }

        let url = format!("{}/api/embeddings", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&EmbeddingReq {
                model,
                prompt: text,
            })
            .send()
            .await
            .context("failed to call ollama embeddings endpoint")?;

        let response: EmbeddingResp = decode(response, "/api/embeddings").await?;
        Ok(response.embedding)
    }

    /// One non-streaming chat completion over `messages`.
    pub async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        num_predict: usize,
        temperature: f32,
    ) -> Result<String> {
        #[derive(Serialize)]
        struct ChatReq<'a> {
            model: &'a str,
            messages: &'a [ChatMessage],
            stream: bool,
            options: ChatOptions,
        }

        #[derive(Serialize)]
        struct ChatOptions {
            num_predict: usize,
            temperature: f32,
        }

        #[derive(Deserialize)]
        struct ChatResp {
            message: ChatMessage,
        }

        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&ChatReq {
                model,
                messages,
                stream: false,
                options: ChatOptions {
                    num_predict,
                    temperature,
                },
            })
            .send()
            .await
            .context("failed to call ollama chat endpoint")?;

        let response: ChatResp = decode(response, "/api/chat").await?;
        Ok(response.message.content.trim().to_string())
    }
}

async fn decode<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    endpoint: &str,
) -> Result<T> {
    if response.status() != StatusCode::OK {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!(
            "ollama {endpoint} returned {status}: {}",
            normalize_err_body(&body)
        );
    }

    response
        .json::<T>()
        .await
        .with_context(|| format!("failed to decode ollama {endpoint} response"))
}

fn normalize_err_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(err) = json.get("error").and_then(|v| v.as_str()) {
            return err.to_string();
        }
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_prefers_json_error_field() {
        assert_eq!(
            normalize_err_body(r#"{"error": "model \"x\" not found"}"#),
            "model \"x\" not found"
        );
        assert_eq!(normalize_err_body("  plain failure "), "plain failure");
        assert_eq!(normalize_err_body(""), "<empty body>");
    }
}
