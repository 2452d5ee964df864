//! Chat-model service used for reviews and fixes.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::io::config::ModelConfig;

/// A chat model that answers one system + user prompt with raw text.
pub trait ModelService {
    fn invoke(&self, system: &str, user: &str) -> Result<String>;
}

impl<T: ModelService + ?Sized> ModelService for &T {
    fn invoke(&self, system: &str, user: &str) -> Result<String> {
        (**self).invoke(system, user)
    }
}

/// The model service could not be reached at all.
///
/// Travels inside `anyhow::Error`; callers recover it with `downcast_ref`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUnavailableError {
    pub base_url: String,
    pub detail: String,
}

impl fmt::Display for ServiceUnavailableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot reach the model service at {} ({}). Make sure Ollama is running \
             (`ollama serve`) and the model is pulled (`ollama pull <model>`)",
            self.base_url, self.detail
        )
    }
}

impl std::error::Error for ServiceUnavailableError {}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
    format: &'a str,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

/// Blocking client for a local Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::blocking::Client,
    base_url: String,
    model: String,
    temperature: f64,
}

impl OllamaClient {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.name.clone(),
            temperature: config.temperature,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check that the server answers before any work starts.
    #[instrument(skip_all, fields(base_url = %self.base_url))]
    pub fn ping(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .map_err(|err| self.transport_error(err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("model service health check returned {status}"));
        }
        debug!("model service reachable");
        Ok(())
    }

    fn transport_error(&self, err: reqwest::Error) -> anyhow::Error {
        if err.is_connect() {
            warn!(err = %err, "model service unreachable");
            anyhow::Error::new(ServiceUnavailableError {
                base_url: self.base_url.clone(),
                detail: err.to_string(),
            })
        } else {
            anyhow::Error::new(err).context("model request failed")
        }
    }
}

impl ModelService for OllamaClient {
    #[instrument(skip_all, fields(model = %self.model))]
    fn invoke(&self, system: &str, user: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            stream: false,
            format: "json",
            options: ChatOptions {
                temperature: self.temperature,
            },
        };

        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .map_err(|err| self.transport_error(err))?;

        let status = response.status();
        let text = response.text().context("read model response body")?;
        if !status.is_success() {
            let preview: String = text.chars().take(200).collect();
            return Err(anyhow!("model service returned {status}: {preview}"));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .with_context(|| format!("decode model response envelope: {text}"))?;
        debug!(chars = parsed.message.content.len(), "model answered");
        Ok(parsed.message.content)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    fn config_for(base_url: String) -> ModelConfig {
        ModelConfig {
            base_url,
            request_timeout_secs: 5,
            ..ModelConfig::default()
        }
    }

    fn closed_port_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        format!("http://{addr}")
    }

    /// Serve one request with a canned response and hand back the request body.
    fn serve_once(status_line: &'static str, body: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream);
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).expect("read header");
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                let lower = line.to_ascii_lowercase();
                if let Some(value) = lower.strip_prefix("content-length:") {
                    content_length = value.trim().parse().expect("length");
                }
            }
            let mut request_body = vec![0u8; content_length];
            reader.read_exact(&mut request_body).expect("read body");
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            reader
                .get_mut()
                .write_all(response.as_bytes())
                .expect("write response");
            String::from_utf8(request_body).expect("utf8")
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn unreachable_service_is_typed() {
        let client = OllamaClient::new(&config_for(closed_port_url())).expect("client");
        let err = client.invoke("s", "u").expect_err("should fail");
        assert!(err.downcast_ref::<ServiceUnavailableError>().is_some(), "{err:#}");

        let err = client.ping().expect_err("should fail");
        assert!(err.downcast_ref::<ServiceUnavailableError>().is_some(), "{err:#}");
    }

    #[test]
    fn invoke_returns_message_content() {
        let (url, handle) = serve_once(
            "200 OK",
            r#"{"message":{"role":"assistant","content":"{\"summary\":\"ok\"}"},"done":true}"#,
        );
        let client = OllamaClient::new(&config_for(url)).expect("client");
        let content = client.invoke("be terse", "review this").expect("invoke");
        assert_eq!(content, r#"{"summary":"ok"}"#);

        let request: serde_json::Value =
            serde_json::from_str(&handle.join().expect("server")).expect("request json");
        assert_eq!(request["stream"], false);
        assert_eq!(request["format"], "json");
        assert_eq!(request["messages"][0]["role"], "system");
        assert_eq!(request["messages"][1]["content"], "review this");
    }

    #[test]
    fn error_status_is_an_ordinary_error() {
        let (url, handle) = serve_once("404 Not Found", r#"{"error":"model not found"}"#);
        let client = OllamaClient::new(&config_for(url)).expect("client");
        let err = client.invoke("s", "u").expect_err("should fail");
        assert!(err.downcast_ref::<ServiceUnavailableError>().is_none());
        assert!(err.to_string().contains("404"), "{err:#}");
        assert!(err.to_string().contains("model not found"), "{err:#}");
        handle.join().expect("server");
    }
}
