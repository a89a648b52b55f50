//! EimRunner - Edge Impulse `.eim` model runner client
//!
//! ## Responsibilities
//!
//! - Spawn the model executable with a Unix socket path
//! - Speak its JSON protocol (`hello`, `classify`), replies end with `\0`
//! - Expose the model as a `Classifier`
//! - Stop the process and clean up the socket

mod types;

pub use types::{ClassifyResponse, ClassifyResult, HelloResponse, ModelParameters, ProjectInfo};

use crate::error::{Error, Result};
use crate::frame_capture::InputSpec;
use crate::inference_source::Classifier;
use crate::models::LabelScores;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use types::Envelope;

/// How long the runner gets to create its socket
const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(100);
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Protocol client over any byte stream
pub struct EimClient<S> {
    stream: BufReader<S>,
    next_id: u64,
}

impl<S> EimClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            next_id: 1,
        }
    }

    /// Handshake; returns project and model parameters
    pub async fn hello(&mut self) -> Result<HelloResponse> {
        self.request(json!({ "hello": 1 })).await
    }

    /// Classify one feature vector
    pub async fn classify(&mut self, features: &[f32]) -> Result<ClassifyResponse> {
        self.request(json!({ "classify": features })).await
    }

    async fn request<T: DeserializeOwned>(&mut self, mut body: Value) -> Result<T> {
        body["id"] = json!(self.next_id);
        self.next_id += 1;

        let bytes = serde_json::to_vec(&body)?;
        self.stream
            .get_mut()
            .write_all(&bytes)
            .await
            .map_err(|e| Error::Runner(format!("write to runner failed: {}", e)))?;

        let mut reply = Vec::new();
        let read = self
            .stream
            .read_until(0, &mut reply)
            .await
            .map_err(|e| Error::Runner(format!("read from runner failed: {}", e)))?;
        if read == 0 || reply.last() != Some(&0) {
            return Err(Error::Runner("runner closed the socket".to_string()));
        }
        reply.pop();

        let value: Value = serde_json::from_slice(&reply)
            .map_err(|e| Error::Runner(format!("malformed reply: {}", e)))?;
        let envelope: Envelope = serde_json::from_value(value.clone())
            .map_err(|e| Error::Runner(format!("reply without status: {}", e)))?;
        if !envelope.success {
            return Err(Error::Classifier(
                envelope.error.unwrap_or_else(|| "unknown runner error".to_string()),
            ));
        }

        serde_json::from_value(value).map_err(|e| Error::Runner(format!("unexpected reply: {}", e)))
    }
}

/// Running `.eim` model process
pub struct EimRunner {
    child: Child,
    client: EimClient<UnixStream>,
    socket_path: PathBuf,
    model_name: String,
    input: InputSpec,
    stopped: bool,
}

impl EimRunner {
    /// Spawn the model and complete the `hello` handshake
    pub async fn start(model_path: &Path) -> Result<Self> {
        let socket_path = std::env::temp_dir().join(format!(
            "eim-runner-{}-{}.sock",
            std::process::id(),
            chrono::Utc::now().timestamp_millis()
        ));
        let _ = std::fs::remove_file(&socket_path);

        // Own process group so SIGINT from the terminal reaches only us;
        // the runner is stopped explicitly during teardown.
        let mut child = Command::new(model_path)
            .arg(&socket_path)
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Runner(format!("failed to start {}: {}", model_path.display(), e))
            })?;

        match Self::handshake(&mut child, &socket_path).await {
            Ok((client, hello)) => {
                let params = hello.model_parameters;
                let model_name = hello
                    .project
                    .name
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| "unknown".to_string());

                tracing::info!(
                    model = %model_name,
                    labels = ?params.labels,
                    width = params.image_input_width,
                    height = params.image_input_height,
                    channels = params.image_channel_count,
                    "Model runner ready"
                );

                Ok(Self {
                    child,
                    client,
                    socket_path,
                    model_name,
                    input: InputSpec {
                        width: params.image_input_width,
                        height: params.image_input_height,
                        channels: params.image_channel_count,
                    },
                    stopped: false,
                })
            }
            Err(e) => {
                let _ = child.kill().await;
                let _ = std::fs::remove_file(&socket_path);
                Err(e)
            }
        }
    }

    async fn handshake(
        child: &mut Child,
        socket_path: &Path,
    ) -> Result<(EimClient<UnixStream>, HelloResponse)> {
        let stream = wait_for_socket(child, socket_path).await?;
        let mut client = EimClient::new(stream);
        let hello = client.hello().await?;

        let params = &hello.model_parameters;
        if params.image_input_width == 0
            || params.image_input_height == 0
            || !matches!(params.image_channel_count, 1 | 3)
        {
            return Err(Error::Runner(
                "model is not an image classification model".to_string(),
            ));
        }

        Ok((client, hello))
    }
}

async fn wait_for_socket(child: &mut Child, socket_path: &Path) -> Result<UnixStream> {
    let deadline = tokio::time::Instant::now() + SOCKET_WAIT_TIMEOUT;
    loop {
        if let Some(status) = child.try_wait()? {
            return Err(Error::Runner(format!("runner exited early ({})", status)));
        }
        if let Ok(stream) = UnixStream::connect(socket_path).await {
            return Ok(stream);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::Runner(format!(
                "runner socket {} did not appear within {}s",
                socket_path.display(),
                SOCKET_WAIT_TIMEOUT.as_secs()
            )));
        }
        tokio::time::sleep(SOCKET_POLL_INTERVAL).await;
    }
}

#[async_trait]
impl Classifier for EimRunner {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn input_spec(&self) -> InputSpec {
        self.input
    }

    async fn classify(&mut self, features: &[f32]) -> Result<LabelScores> {
        if self.stopped {
            return Err(Error::Runner("runner stopped".to_string()));
        }
        let response = self.client.classify(features).await?;
        Ok(response.result.classification)
    }

    async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        let _ = self.child.start_kill();
        if tokio::time::timeout(STOP_TIMEOUT, self.child.wait()).await.is_err() {
            tracing::warn!("Model runner did not exit in time");
        }
        let _ = std::fs::remove_file(&self.socket_path);
        tracing::info!(model = %self.model_name, "Model runner stopped");
    }
}

impl Drop for EimRunner {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}
