#![allow(clippy::large_enum_variant)]
#![allow(clippy::result_large_err)]
//! Client for DeepLab segmentation and SSD detection models hosted by
//! TensorFlow Serving.
//!
//! The crate is layered:
//!
//! * [`TensorBuffer`] converts typed tensors to and from `TensorProto`.
//! * [`RequestBuilder`] assembles a prediction request.
//! * [`response::decode`] validates response tensors against declared
//!   [`OutputSpec`]s.
//! * [`ModelKind`] and the [`ModelAdapter`] implementations turn a response
//!   into a [`SegmentationResult`] or a [`DetectionResult`].
//!
//! [`TensorflowServing`] carries requests over gRPC and [`render`] writes
//! the output artifacts.
//!
//! ```no_run
//! # use tfserving_vision::{Image, ModelKind, Prediction, RgbPixels, TensorflowServing};
//! # async fn run() -> tfserving_vision::Result<()> {
//! let img = "cat.jpg".to_image()?;
//! let model: ModelKind = "ssd".parse()?;
//! let request = model.build_request(&RgbPixels::from_image(&img))?;
//!
//! let mut serving = TensorflowServing::new().address("localhost:8500")?.build().await?;
//! let response = serving.predict(request).await?;
//! if let Prediction::Detection(result) = model.adapt(&response)? {
//!     println!("{} detections", result.detections.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod client;
pub mod error;
pub mod image_source;
pub mod render;
pub mod request;
pub mod response;
pub mod tensor;

/// Generated protocol buffer types.
pub mod tensorflow {
    tonic::include_proto!("tensorflow");

    pub mod serving {
        tonic::include_proto!("tensorflow.serving");
    }
}

pub use adapter::{
    BoundingBox, Detection, DetectionAdapter, DetectionResult, ModelAdapter, ModelKind,
    Prediction, SegmentationAdapter, SegmentationResult,
};
pub use client::{TensorflowServing, TensorflowServingBuilder};
pub use error::{Error, Result};
pub use image_source::{Image, RgbPixels};
pub use request::{InferenceRequest, RequestBuilder};
pub use response::{DecodedOutputs, InferenceResponse, OutputSpec};
pub use tensor::{DataType, TensorBuffer, TensorData};
