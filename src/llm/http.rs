use super::{
    GenerationParams, InferenceProvider, LoadOptions, LoadProgress, LoadStatus, ModelHandle,
    ProgressSender, ProviderError,
};
use crate::config::ProviderConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

/// What a loaded handle carries for this provider.
#[derive(Debug)]
struct HttpModel {
    model_type: Option<String>,
    endpoint: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    inputs: &'a str,
    parameters: GenerateParameters<'a>,
}

#[derive(Serialize)]
struct GenerateParameters<'a> {
    #[serde(flatten)]
    params: &'a GenerationParams,
    return_full_text: bool,
}

#[derive(Deserialize)]
struct Generated {
    generated_text: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GenerateResponse {
    Batch(Vec<Generated>),
    Single(Generated),
}

/// HTTP inference provider.
///
/// Loading pulls the model's metadata files from the hub and checks that they
/// parse; generation is a single POST that asks for the full text back.
#[derive(Clone)]
pub struct HttpProvider {
    client: reqwest::Client,
    hub_url: String,
    inference_url: String,
    api_key: Option<String>,
}

impl HttpProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            hub_url: config.hub_url.trim_end_matches('/').to_string(),
            inference_url: config.inference_url.clone(),
            api_key: config.get_api_key(),
        })
    }

    fn file_url(&self, model_id: &str, revision: &str, file: &str) -> String {
        format!("{}/{}/resolve/{}/{}", self.hub_url, model_id, revision, file)
    }

    fn endpoint_for(&self, model_id: &str) -> String {
        self.inference_url.replace("{model}", model_id)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {}", key)),
            None => request,
        }
    }

    /// Download one file, reporting overall progress across `total` files.
    async fn fetch_file(
        &self,
        url: &str,
        file: &str,
        index: usize,
        total: f32,
        progress: &ProgressSender,
    ) -> Result<Vec<u8>, ProviderError> {
        let response = self.authorized(self.client.get(url)).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::http(status, format!("{file}: {error_text}")));
        }

        let expected = response.content_length();
        let _ = progress.send(LoadProgress::new(
            LoadStatus::Download,
            Some(file.to_string()),
            index as f32 / total,
        ));

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            body.extend_from_slice(&chunk);

            if let Some(expected) = expected.filter(|len| *len > 0) {
                let fraction = (body.len() as f32 / expected as f32).min(1.0);
                let _ = progress.send(LoadProgress::new(
                    LoadStatus::Progress,
                    Some(file.to_string()),
                    (index as f32 + fraction) / total,
                ));
            }
        }

        Ok(body)
    }
}

#[async_trait]
impl InferenceProvider for HttpProvider {
    async fn load(
        &self,
        model_id: &str,
        options: &LoadOptions,
        progress: ProgressSender,
    ) -> Result<ModelHandle, ProviderError> {
        let total = options.files.len().max(1) as f32;
        let mut model_type = None;

        for (index, file) in options.files.iter().enumerate() {
            let _ = progress.send(LoadProgress::new(
                LoadStatus::Initiate,
                Some(file.clone()),
                index as f32 / total,
            ));

            let url = self.file_url(model_id, &options.revision, file);
            tracing::debug!(%url, "fetching model file");
            let body = self.fetch_file(&url, file, index, total, &progress).await?;

            let value: serde_json::Value = serde_json::from_slice(&body)
                .map_err(|e| ProviderError::decode(format!("{file} is not valid JSON: {e}")))?;
            if file == "config.json" {
                model_type = value
                    .get("model_type")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
            }

            let _ = progress.send(LoadProgress::new(
                LoadStatus::Done,
                Some(file.clone()),
                (index + 1) as f32 / total,
            ));
        }

        let _ = progress.send(LoadProgress::new(LoadStatus::Ready, None, 1.0));
        tracing::debug!(model = model_id, model_type = ?model_type, "model metadata ready");

        Ok(ModelHandle::new(
            model_id,
            HttpModel {
                model_type,
                endpoint: self.endpoint_for(model_id),
            },
        ))
    }

    async fn generate(
        &self,
        handle: &ModelHandle,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, ProviderError> {
        let model = handle.downcast::<HttpModel>()?;
        tracing::debug!(model_type = ?model.model_type, endpoint = %model.endpoint, "generating");

        let payload = build_request(prompt, params);
        let response = self
            .authorized(self.client.post(&model.endpoint))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::http(status, error_text));
        }

        let body = response.bytes().await?;
        parse_generated_text(&body)
    }

    fn name(&self) -> &str {
        "http"
    }
}

fn build_request<'a>(prompt: &'a str, params: &'a GenerationParams) -> GenerateRequest<'a> {
    GenerateRequest {
        inputs: prompt,
        parameters: GenerateParameters {
            params,
            return_full_text: true,
        },
    }
}

fn parse_generated_text(body: &[u8]) -> Result<String, ProviderError> {
    let parsed: GenerateResponse = serde_json::from_slice(body)
        .map_err(|e| ProviderError::decode(format!("unexpected generation response: {e}")))?;

    match parsed {
        GenerateResponse::Single(generated) => Ok(generated.generated_text),
        GenerateResponse::Batch(batch) => batch
            .into_iter()
            .next()
            .map(|generated| generated.generated_text)
            .ok_or_else(|| ProviderError::decode("generation response was empty")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ProviderErrorKind;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    type Routes = Vec<(&'static str, u16, &'static str)>;

    /// Minimal HTTP/1.1 server on loopback. Unknown paths get a 404 with
    /// body `nf`. Every raw request is recorded.
    async fn serve(routes: Routes) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let routes = routes.clone();
                let seen = Arc::clone(&seen);
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 4096];
                    let header_end = loop {
                        let n = socket.read(&mut chunk).await.unwrap_or(0);
                        if n == 0 {
                            return;
                        }
                        buf.extend_from_slice(&chunk[..n]);
                        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                            break pos + 4;
                        }
                    };

                    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
                    let content_length = head
                        .lines()
                        .filter_map(|line| line.split_once(':'))
                        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    while buf.len() < header_end + content_length {
                        let n = socket.read(&mut chunk).await.unwrap_or(0);
                        if n == 0 {
                            break;
                        }
                        buf.extend_from_slice(&chunk[..n]);
                    }
                    seen.lock().unwrap().push(String::from_utf8_lossy(&buf).to_string());

                    let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let (status, body) = routes
                        .iter()
                        .find(|(route, _, _)| *route == path)
                        .map(|(_, status, body)| (*status, *body))
                        .unwrap_or((404, "nf"));
                    let response = format!(
                        "HTTP/1.1 {status} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        (format!("http://{addr}"), requests)
    }

    fn local_provider(base: &str) -> HttpProvider {
        HttpProvider {
            client: reqwest::Client::builder().no_proxy().build().unwrap(),
            hub_url: base.to_string(),
            inference_url: format!("{base}/infer/{{model}}"),
            api_key: Some("secret".to_string()),
        }
    }

    fn metadata_routes() -> Routes {
        vec![
            ("/m/resolve/main/config.json", 200, r#"{"model_type": "gpt2"}"#),
            ("/m/resolve/main/tokenizer_config.json", 200, "{}"),
            ("/m/resolve/main/generation_config.json", 200, r#"{"pad_token_id": 50256}"#),
        ]
    }

    async fn load(
        provider: &HttpProvider,
    ) -> (Result<ModelHandle, ProviderError>, Vec<LoadProgress>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = provider.load("m", &LoadOptions::default(), tx).await;
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (result, events)
    }

    fn provider() -> HttpProvider {
        let config = ProviderConfig {
            hub_url: "https://hub.example/".to_string(),
            inference_url: "https://infer.example/models/{model}".to_string(),
            api_key: Some("secret".to_string()),
            api_key_env: None,
        };
        HttpProvider::new(&config).unwrap()
    }

    #[test]
    fn builds_hub_and_endpoint_urls() {
        let provider = provider();
        assert_eq!(
            provider.file_url("Xenova/distilgpt2", "main", "config.json"),
            "https://hub.example/Xenova/distilgpt2/resolve/main/config.json"
        );
        assert_eq!(
            provider.endpoint_for("Xenova/distilgpt2"),
            "https://infer.example/models/Xenova/distilgpt2"
        );
    }

    #[test]
    fn request_payload_carries_all_params() {
        let params = GenerationParams::default();
        let value = serde_json::to_value(build_request("User: Hi\nAssistant:", &params)).unwrap();

        assert_eq!(value["inputs"], "User: Hi\nAssistant:");
        let parameters = &value["parameters"];
        assert_eq!(parameters["max_new_tokens"], 50);
        assert_eq!(parameters["do_sample"], true);
        assert_eq!(parameters["pad_token_id"], 50256);
        assert_eq!(parameters["return_full_text"], true);
        assert!(parameters["temperature"].is_number());
        assert!(parameters["repetition_penalty"].is_number());
    }

    #[test]
    fn parses_batch_and_single_responses() {
        let batch = br#"[{"generated_text": "User: Hi\nAssistant: Hello."}]"#;
        assert_eq!(parse_generated_text(batch).unwrap(), "User: Hi\nAssistant: Hello.");

        let single = br#"{"generated_text": "full"}"#;
        assert_eq!(parse_generated_text(single).unwrap(), "full");
    }

    #[test]
    fn rejects_empty_or_malformed_responses() {
        assert_eq!(
            parse_generated_text(b"[]").unwrap_err().kind,
            ProviderErrorKind::Decode
        );
        assert_eq!(
            parse_generated_text(br#"{"error": "loading"}"#).unwrap_err().kind,
            ProviderErrorKind::Decode
        );
    }

    #[tokio::test]
    async fn load_fetches_every_file_and_reports_progress() {
        let (base, requests) = serve(metadata_routes()).await;
        let provider = local_provider(&base);

        let (result, events) = load(&provider).await;
        let handle = result.unwrap();
        assert_eq!(handle.model_id(), "m");
        assert_eq!(
            handle.downcast::<HttpModel>().unwrap().model_type.as_deref(),
            Some("gpt2")
        );

        assert!(events.windows(2).all(|pair| pair[0].progress <= pair[1].progress));
        let last = events.last().unwrap();
        assert_eq!(last.status, LoadStatus::Ready);
        assert_eq!(last.progress, 1.0);
        assert_eq!(
            events.iter().filter(|e| e.status == LoadStatus::Done).count(),
            3
        );

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        for file in ["config.json", "tokenizer_config.json", "generation_config.json"] {
            let line = format!("GET /m/resolve/main/{file} HTTP/1.1");
            assert!(requests.iter().any(|r| r.starts_with(&line)), "missing {line}");
        }
        assert!(requests
            .iter()
            .all(|r| r.to_lowercase().contains("authorization: bearer secret")));
    }

    #[tokio::test]
    async fn missing_file_is_an_http_error() {
        let (base, _requests) = serve(Vec::new()).await;
        let (result, events) = load(&local_provider(&base)).await;

        let error = result.unwrap_err();
        assert_eq!(error.kind, ProviderErrorKind::Http);
        assert!(error.message.contains("404"));
        assert!(error.message.contains("config.json"));
        assert!(events.iter().all(|e| e.status != LoadStatus::Ready));
    }

    #[tokio::test]
    async fn non_json_metadata_is_a_decode_error() {
        let (base, _requests) = serve(vec![(
            "/m/resolve/main/config.json",
            200,
            "<html>not json</html>",
        )])
        .await;
        let (result, _events) = load(&local_provider(&base)).await;

        assert_eq!(result.unwrap_err().kind, ProviderErrorKind::Decode);
    }

    #[tokio::test]
    async fn generate_posts_prompt_and_returns_full_text() {
        let mut routes = metadata_routes();
        routes.push((
            "/infer/m",
            200,
            r#"[{"generated_text": "User: Hi\nAssistant: Hey. x"}]"#,
        ));
        let (base, requests) = serve(routes).await;
        let provider = local_provider(&base);
        let handle = load(&provider).await.0.unwrap();

        let text = provider
            .generate(&handle, "User: Hi\nAssistant:", &GenerationParams::default())
            .await
            .unwrap();
        assert_eq!(text, "User: Hi\nAssistant: Hey. x");

        let requests = requests.lock().unwrap();
        let post = requests
            .iter()
            .find(|r| r.starts_with("POST /infer/m HTTP/1.1"))
            .unwrap();
        let body = &post[post.find("\r\n\r\n").unwrap() + 4..];
        let payload: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(payload["inputs"], "User: Hi\nAssistant:");
        assert_eq!(payload["parameters"]["return_full_text"], true);
        assert_eq!(payload["parameters"]["max_new_tokens"], 50);
    }

    #[tokio::test]
    async fn generate_failure_status_is_an_http_error() {
        let mut routes = metadata_routes();
        routes.push(("/infer/m", 503, r#"{"error": "Model is loading"}"#));
        let (base, _requests) = serve(routes).await;
        let provider = local_provider(&base);
        let handle = load(&provider).await.0.unwrap();

        let error = provider
            .generate(&handle, "User: Hi\nAssistant:", &GenerationParams::default())
            .await
            .unwrap_err();
        assert_eq!(error.kind, ProviderErrorKind::Http);
        assert!(error.message.contains("503"));
    }
}
