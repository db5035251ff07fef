use log::{debug, info};
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};

use crate::error::{Error, Result};
use crate::request::InferenceRequest;
use crate::response::InferenceResponse;
use crate::tensorflow::serving::prediction_service_client::PredictionServiceClient;

/// Default limit on encoded request and response size.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Builder pattern used to build the client.
///
/// This struct is created by calling `TensorflowServing::new()`. It represents a partially
/// configured client. Use the builder pattern to construct a client gradually. Then call the
/// `build` method to construct a concrete `TensorflowServing` instance.
///
/// Required parameters are:
///
/// * hostname
/// * port
///
/// Either set both directly or pass a `host:port` string to `address`.
/// `timeout` is optional and unset by default; `max_message_size` defaults to
/// 64 MiB in both directions.
///
#[derive(Default)]
pub struct TensorflowServingBuilder {
    hostname: Option<String>,
    port: Option<u16>,
    timeout: Option<Duration>,
    max_message_size: Option<usize>,
}

impl TensorflowServingBuilder {
    /// Set the hostname for the client
    ///
    pub fn hostname<S: Into<String>>(&mut self, hostname: S) -> &mut Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Set the port for the client
    ///
    pub fn port(&mut self, port: u16) -> &mut Self {
        self.port = Some(port);
        self
    }

    /// Set hostname and port from a `host:port` address. A leading
    /// `http://` is accepted and ignored.
    pub fn address(&mut self, address: &str) -> Result<&mut Self> {
        let trimmed = address.strip_prefix("http://").unwrap_or(address);
        let (hostname, port) = trimmed
            .rsplit_once(':')
            .ok_or_else(|| Error::Config(format!("address `{}` has no port", address)))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| Error::Config(format!("address `{}`: invalid port: {}", address, e)))?;
        if hostname.is_empty() {
            return Err(Error::Config(format!("address `{}` has no host", address)));
        }

        Ok(self.hostname(hostname).port(port))
    }

    /// Per-request deadline
    ///
    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_message_size(&mut self, bytes: usize) -> &mut Self {
        self.max_message_size = Some(bytes);
        self
    }

    /// Build a `TensorflowServing` client.
    ///
    pub async fn build(&mut self) -> Result<TensorflowServing> {
        let hostname = self
            .hostname
            .take()
            .ok_or_else(|| Error::Config("hostname not provided".to_string()))?;
        let port = self
            .port
            .ok_or_else(|| Error::Config("port not provided".to_string()))?;

        let uri = format!("http://{}:{}", hostname, port);
        let mut endpoint = Endpoint::from_shared(uri.clone())?;
        if let Some(timeout) = self.timeout {
            endpoint = endpoint.timeout(timeout);
        }

        debug!("connecting to {}", uri);
        let channel = endpoint.connect().await?;
        info!("connected to tensorflow serving at {}", uri);

        let limit = self.max_message_size.unwrap_or(DEFAULT_MAX_MESSAGE_SIZE);
        let prediction_client = PredictionServiceClient::new(channel)
            .max_decoding_message_size(limit)
            .max_encoding_message_size(limit);

        Ok(TensorflowServing { prediction_client })
    }
}

/// Tensorflow Serving client
///
/// Used to talk to a Tensorflow Serving server. Cloning is cheap and the
/// clones share one connection.
///
#[derive(Clone)]
pub struct TensorflowServing {
    prediction_client: PredictionServiceClient<Channel>,
}

impl TensorflowServing {
    /// Construct a new `TensorflowServing` builder struct.
    ///
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> TensorflowServingBuilder {
        TensorflowServingBuilder::default()
    }

    /// Send one prediction request and wait for the reply.
    ///
    /// A non-OK gRPC status is returned as [`Error::TransportFailure`]; the
    /// call is not retried.
    pub async fn predict(&mut self, request: InferenceRequest) -> Result<InferenceResponse> {
        debug!(
            "predict {} signature {} version {:?}",
            request.model_name, request.signature_name, request.model_version
        );
        let resp = self.prediction_client.predict(request.into_proto()).await?;
        let response = InferenceResponse::from(resp.into_inner());
        debug!("response outputs: {:?}", response.output_names());
        Ok(response)
    }
}
