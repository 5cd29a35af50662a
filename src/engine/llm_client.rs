use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::config::{ProviderFlavor, ServiceSettings};
use crate::error::ServiceError;
use crate::model::message::ChatMessage;

/// Which of the two per-simulation calls is being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Generation,
    Evaluation,
}

impl Purpose {
    pub fn as_str(self) -> &'static str {
        match self {
            Purpose::Generation => "generation",
            Purpose::Evaluation => "evaluation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub purpose: Purpose,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// "Send a prompt, get text back, or an error."
///
/// Implementations must not retry; the simulator decides what a failure means.
pub trait GenerativeService: Send + Sync {
    fn invoke(&self, prompt: &str, params: &SamplingParams) -> Result<String, ServiceError>;
}

impl<T: GenerativeService + ?Sized> GenerativeService for Box<T> {
    fn invoke(&self, prompt: &str, params: &SamplingParams) -> Result<String, ServiceError> {
        (**self).invoke(prompt, params)
    }
}

/* =========================
   Wire formats
   ========================= */

#[derive(Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}

#[derive(Serialize)]
pub struct DashScopeRequest<'a> {
    pub model: &'a str,
    pub input: DashScopeInput,
    pub parameters: DashScopeParameters,
}

#[derive(Serialize)]
pub struct DashScopeInput {
    pub messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
pub struct DashScopeParameters {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub result_format: &'static str,
}

// Every envelope field is optional so a shape change surfaces as an
// `Envelope` error naming the missing piece instead of a serde message.

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Option<Vec<Choice>>,
}

#[derive(Deserialize)]
struct DashScopeResponse {
    output: Option<DashScopeOutput>,
}

#[derive(Deserialize)]
struct DashScopeOutput {
    choices: Option<Vec<Choice>>,
    text: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChatMessageResponse>,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

/* =========================
   HTTP client
   ========================= */

/// Blocking client for DashScope or any OpenAI-compatible chat endpoint.
pub struct LlmClient {
    http: Client,
    flavor: ProviderFlavor,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    top_p: f32,
    timeout_secs: u64,
}

impl LlmClient {
    pub fn new(settings: &ServiceSettings) -> Result<Self, ServiceError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| ServiceError::ClientBuild(e.to_string()))?;

        Ok(Self {
            http,
            flavor: settings.provider,
            endpoint: settings.endpoint(),
            model: settings.model.clone(),
            api_key: settings
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string),
            top_p: settings.top_p,
            timeout_secs: settings.timeout_secs,
        })
    }

    fn provider(&self) -> &'static str {
        self.flavor.as_str()
    }

    /// Timeouts while sending or while reading the body both count as `Timeout`.
    fn transport_error(&self, e: reqwest::Error, context: &str) -> ServiceError {
        let provider = self.provider();
        if e.is_timeout() {
            ServiceError::Timeout {
                provider,
                secs: self.timeout_secs,
            }
        } else {
            ServiceError::Transport {
                provider,
                reason: format!("{context}: {e}"),
            }
        }
    }

    fn request_body(&self, prompt: &str, params: &SamplingParams) -> serde_json::Result<serde_json::Value> {
        let messages = vec![ChatMessage::user(prompt)];
        match self.flavor {
            ProviderFlavor::DashScope => serde_json::to_value(DashScopeRequest {
                model: &self.model,
                input: DashScopeInput { messages },
                parameters: DashScopeParameters {
                    temperature: params.temperature,
                    max_tokens: params.max_tokens,
                    top_p: self.top_p,
                    result_format: "message",
                },
            }),
            ProviderFlavor::OpenAiCompatible => serde_json::to_value(ChatCompletionRequest {
                model: &self.model,
                messages,
                temperature: params.temperature,
                max_tokens: params.max_tokens,
                top_p: self.top_p,
            }),
        }
    }
}

impl GenerativeService for LlmClient {
    fn invoke(&self, prompt: &str, params: &SamplingParams) -> Result<String, ServiceError> {
        let provider = self.provider();

        if self.flavor.requires_credential() && self.api_key.is_none() {
            return Err(ServiceError::MissingCredential { provider });
        }

        let body = self
            .request_body(prompt, params)
            .map_err(|e| ServiceError::Transport {
                provider,
                reason: format!("failed to encode request: {e}"),
            })?;

        tracing::debug!(
            provider,
            purpose = params.purpose.as_str(),
            model = %self.model,
            temperature = params.temperature,
            max_tokens = params.max_tokens,
            "Sending request to {}",
            self.endpoint
        );

        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().map_err(|e| {
            tracing::error!(provider, "Request failed: {}", e);
            self.transport_error(e, "request failed")
        })?;

        let status = response.status();
        let text = response.text().map_err(|e| {
            tracing::error!(provider, "Reading response failed: {}", e);
            self.transport_error(e, "failed to read response body")
        })?;

        if !status.is_success() {
            return Err(ServiceError::Status {
                provider,
                status: status.as_u16(),
                body: truncate(&text, 300),
            });
        }

        let content = extract_content(self.flavor, &text)?;
        tracing::trace!(provider, purpose = params.purpose.as_str(), "Raw content: {}", content);
        Ok(content)
    }
}

/// Pulls the generated text out of a response envelope, checking every level exists.
pub fn extract_content(flavor: ProviderFlavor, body: &str) -> Result<String, ServiceError> {
    let provider = flavor.as_str();
    let envelope = |reason: &str| ServiceError::Envelope {
        provider,
        reason: reason.to_string(),
    };

    let (choices, text) = match flavor {
        ProviderFlavor::DashScope => {
            let resp: DashScopeResponse = serde_json::from_str(body)
                .map_err(|e| envelope(&format!("body is not JSON: {e}")))?;
            let output = resp.output.ok_or_else(|| envelope("missing `output`"))?;
            (output.choices, output.text)
        }
        ProviderFlavor::OpenAiCompatible => {
            let resp: ChatCompletionResponse = serde_json::from_str(body)
                .map_err(|e| envelope(&format!("body is not JSON: {e}")))?;
            (resp.choices, None)
        }
    };

    if let Some(choices) = choices {
        return choices
            .into_iter()
            .next()
            .ok_or_else(|| envelope("`choices` is empty"))?
            .message
            .ok_or_else(|| envelope("missing `message` in first choice"))?
            .content
            .ok_or_else(|| envelope("missing `content` in first choice"));
    }

    text.ok_or_else(|| envelope("missing `choices`"))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max_chars).collect();
        cut.push('…');
        cut
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread::{self, JoinHandle};

    use super::*;

    /// Reads one HTTP request (head plus `content-length` body) as text.
    fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_string();
                let len = head
                    .lines()
                    .find_map(|line| {
                        let (key, value) = line.split_once(':')?;
                        if key.trim().eq_ignore_ascii_case("content-length") {
                            value.trim().parse::<usize>().ok()
                        } else {
                            None
                        }
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + len {
                    break;
                }
            }
        }
        String::from_utf8(buf).unwrap()
    }

    /// Serves a single connection: captures the request, writes `reply`, then
    /// keeps the socket open for `linger` before closing.
    fn serve_once(reply: String, linger: Duration) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/generate", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_request(&mut stream);
            let _ = stream.write_all(reply.as_bytes());
            let _ = stream.flush();
            thread::sleep(linger);
            request
        });
        (url, handle)
    }

    fn http_reply(status_line: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn client_for(provider: ProviderFlavor, url: String, api_key: Option<&str>) -> LlmClient {
        LlmClient::new(&ServiceSettings {
            provider,
            endpoint: Some(url),
            api_key: api_key.map(str::to_string),
            timeout_secs: 1,
            ..ServiceSettings::default()
        })
        .unwrap()
    }

    fn generation() -> SamplingParams {
        SamplingParams {
            purpose: Purpose::Generation,
            temperature: 0.8,
            max_tokens: 500,
        }
    }

    #[test]
    fn dashscope_envelope() {
        let body = r#"{"output":{"choices":[{"message":{"role":"assistant","content":"我不想说。"}}]},"request_id":"x"}"#;
        assert_eq!(
            extract_content(ProviderFlavor::DashScope, body).unwrap(),
            "我不想说。"
        );

        let text_format = r#"{"output":{"text":"嗯。","finish_reason":"stop"}}"#;
        assert_eq!(
            extract_content(ProviderFlavor::DashScope, text_format).unwrap(),
            "嗯。"
        );
    }

    #[test]
    fn openai_envelope() {
        let body = r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"ok"}}]}"#;
        assert_eq!(
            extract_content(ProviderFlavor::OpenAiCompatible, body).unwrap(),
            "ok"
        );
    }

    #[test]
    fn malformed_envelopes_are_rejected() {
        for (flavor, body) in [
            (ProviderFlavor::DashScope, r#"{"code":"InvalidApiKey"}"#),
            (ProviderFlavor::DashScope, r#"{"output":{}}"#),
            (ProviderFlavor::DashScope, r#"{"output":{"choices":[]}}"#),
            (ProviderFlavor::OpenAiCompatible, r#"{"choices":[{"message":{}}]}"#),
            (ProviderFlavor::OpenAiCompatible, r#"{"choices":[{}]}"#),
            (ProviderFlavor::OpenAiCompatible, "<html>bad gateway</html>"),
        ] {
            let err = extract_content(flavor, body).unwrap_err();
            assert!(matches!(err, ServiceError::Envelope { .. }), "{body}: {err}");
        }
    }

    #[test]
    fn missing_key_fails_before_any_request() {
        let settings = ServiceSettings {
            provider: ProviderFlavor::DashScope,
            api_key: None,
            // Unroutable: reaching the network would be a bug here.
            endpoint: Some("http://127.0.0.1:9/unused".into()),
            ..ServiceSettings::default()
        };
        let client = LlmClient::new(&settings).unwrap();
        let params = SamplingParams {
            purpose: Purpose::Generation,
            temperature: 0.8,
            max_tokens: 10,
        };

        let err = client.invoke("hi", &params).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::MissingCredential { provider: "dashscope" }
        ));
    }

    #[test]
    fn dashscope_request_shape() {
        let settings = ServiceSettings {
            api_key: Some("k".into()),
            ..ServiceSettings::default()
        };
        let client = LlmClient::new(&settings).unwrap();
        let body = client
            .request_body(
                "prompt",
                &SamplingParams {
                    purpose: Purpose::Evaluation,
                    temperature: 0.3,
                    max_tokens: 800,
                },
            )
            .unwrap();

        assert_eq!(body["model"], "qwen-turbo");
        assert_eq!(body["input"]["messages"][0]["role"], "user");
        assert_eq!(body["input"]["messages"][0]["content"], "prompt");
        assert_eq!(body["parameters"]["max_tokens"], 800);
        assert_eq!(body["parameters"]["result_format"], "message");
    }

    #[test]
    fn dashscope_call_sends_key_and_envelope() {
        let body = r#"{"output":{"choices":[{"message":{"role":"assistant","content":"还行吧。"}}]}}"#;
        let (url, server) = serve_once(http_reply("200 OK", body), Duration::ZERO);

        let client = client_for(ProviderFlavor::DashScope, url, Some("k"));
        let content = client.invoke("你今天怎么样？", &generation()).unwrap();
        assert_eq!(content, "还行吧。");

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /generate "), "{request}");
        assert!(request.to_ascii_lowercase().contains("authorization: bearer k\r\n"));
        assert!(request.contains(r#""result_format":"message""#), "{request}");
        assert!(request.contains(r#""content":"你今天怎么样？""#), "{request}");
        assert!(request.contains(r#""model":"qwen-turbo""#), "{request}");
    }

    #[test]
    fn openai_call_without_key_sends_no_authorization() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"嗯。"}}]}"#;
        let (url, server) = serve_once(http_reply("200 OK", body), Duration::ZERO);

        let client = client_for(ProviderFlavor::OpenAiCompatible, url, None);
        assert_eq!(client.invoke("你好", &generation()).unwrap(), "嗯。");

        let request = server.join().unwrap();
        assert!(!request.to_ascii_lowercase().contains("authorization:"), "{request}");
        assert!(request.contains(r#""messages":[{"#), "{request}");
    }

    #[test]
    fn error_status_is_reported_with_body() {
        let (url, server) = serve_once(
            http_reply("500 Internal Server Error", r#"{"code":"InternalError"}"#),
            Duration::ZERO,
        );

        let client = client_for(ProviderFlavor::DashScope, url, Some("k"));
        let err = client.invoke("你好", &generation()).unwrap_err();
        match err {
            ServiceError::Status {
                provider,
                status,
                body,
            } => {
                assert_eq!(provider, "dashscope");
                assert_eq!(status, 500);
                assert!(body.contains("InternalError"));
            }
            other => panic!("expected Status, got {other:?}"),
        }
        server.join().unwrap();
    }

    #[test]
    fn silent_server_times_out() {
        let (url, _server) = serve_once(String::new(), Duration::from_secs(3));

        let client = client_for(ProviderFlavor::DashScope, url, Some("k"));
        let err = client.invoke("你好", &generation()).unwrap_err();
        assert!(
            matches!(err, ServiceError::Timeout { provider: "dashscope", secs: 1 }),
            "{err:?}"
        );
    }

    #[test]
    fn stalled_body_times_out() {
        // Headers promise more body than is ever sent.
        let reply = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 100\r\n\r\n{\"output\"".to_string();
        let (url, _server) = serve_once(reply, Duration::from_secs(3));

        let client = client_for(ProviderFlavor::DashScope, url, Some("k"));
        let err = client.invoke("你好", &generation()).unwrap_err();
        assert!(matches!(err, ServiceError::Timeout { secs: 1, .. }), "{err:?}");
    }

    #[test]
    fn truncate_counts_chars() {
        assert_eq!(truncate("你好世界", 2), "你好…");
        assert_eq!(truncate("abc", 5), "abc");
    }
}
