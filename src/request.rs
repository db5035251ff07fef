use log::debug;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::image_source::RgbPixels;
use crate::tensor::TensorBuffer;
use crate::tensorflow::serving::{model_spec::VersionChoice, ModelSpec, PredictRequest};

/// Signature used when none is given.
pub const DEFAULT_SIGNATURE: &str = "serving_default";

/// A prediction request before it is put on the wire.
///
/// Each input is stored under its own tensor name.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub model_name: String,
    pub signature_name: String,
    pub model_version: Option<i64>,
    pub inputs: HashMap<String, TensorBuffer>,
}

impl InferenceRequest {
    /// Convert into a `PredictRequest`, moving the tensor values.
    pub fn into_proto(self) -> PredictRequest {
        let inputs = self
            .inputs
            .into_iter()
            .map(|(name, tensor)| (name, tensor.into_proto()))
            .collect();

        PredictRequest {
            model_spec: Some(ModelSpec {
                name: self.model_name,
                version_choice: self.model_version.map(VersionChoice::Version),
                signature_name: self.signature_name,
            }),
            inputs,
            output_filter: Vec::new(),
        }
    }
}

/// Builder for an [`InferenceRequest`].
///
/// `signature_name` defaults to "serving_default" and the version is left
/// for the server to choose unless one is set. Building never touches the
/// network.
///
/// ```rust
/// # use tfserving_vision::{RequestBuilder, TensorBuffer};
/// let request = RequestBuilder::new("deeplab_v3")
///     .signature_name("predict_images")
///     .version(1)
///     .input(TensorBuffer::scalar_i32("height", 10))
///     .build();
/// assert_eq!(request.inputs.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    model_name: String,
    signature_name: Option<String>,
    version: Option<i64>,
    inputs: HashMap<String, TensorBuffer>,
}

impl RequestBuilder {
    pub fn new<S: Into<String>>(model_name: S) -> Self {
        RequestBuilder {
            model_name: model_name.into(),
            signature_name: None,
            version: None,
            inputs: HashMap::new(),
        }
    }

    /// Set the signature name
    ///
    pub fn signature_name<S: Into<String>>(&mut self, signature_name: S) -> &mut Self {
        self.signature_name = Some(signature_name.into());
        self
    }

    /// Pin a model version
    ///
    pub fn version(&mut self, version: i64) -> &mut Self {
        self.version = Some(version);
        self
    }

    /// Add an input tensor. A later tensor with the same name replaces an
    /// earlier one.
    pub fn input(&mut self, tensor: TensorBuffer) -> &mut Self {
        self.inputs.insert(tensor.name().to_string(), tensor);
        self
    }

    pub fn inputs<I>(&mut self, tensors: I) -> &mut Self
    where
        I: IntoIterator<Item = TensorBuffer>,
    {
        for tensor in tensors {
            self.input(tensor);
        }
        self
    }

    pub fn build(&self) -> InferenceRequest {
        let request = InferenceRequest {
            model_name: self.model_name.clone(),
            signature_name: self
                .signature_name
                .clone()
                .unwrap_or_else(|| DEFAULT_SIGNATURE.to_string()),
            model_version: self.version,
            inputs: self.inputs.clone(),
        };

        debug!(
            "built request for {}:{} (version {:?}) with inputs {:?}",
            request.model_name,
            request.signature_name,
            request.model_version,
            request.inputs.keys().collect::<Vec<_>>()
        );
        request
    }
}

fn image_shape(pixels: &RgbPixels) -> Vec<i64> {
    vec![1, i64::from(pixels.height()), i64::from(pixels.width()), 3]
}

/// Inputs for the DeepLab signature: `height`, `width` and a FLOAT32
/// `images` batch of one holding raw 0-255 channel values.
pub fn segmentation_inputs(pixels: &RgbPixels) -> Result<Vec<TensorBuffer>> {
    let dim = |name: &str, size: u32| {
        i32::try_from(size).map_err(|_| {
            Error::shape(name, format!("{} does not fit in an INT32 scalar", size))
        })
    };
    let height = dim("height", pixels.height())?;
    let width = dim("width", pixels.width())?;
    let images: Vec<f32> = pixels.data().iter().map(|v| f32::from(*v)).collect();

    Ok(vec![
        TensorBuffer::scalar_i32("height", height),
        TensorBuffer::scalar_i32("width", width),
        TensorBuffer::new("images", image_shape(pixels), images)?,
    ])
}

/// Inputs for the SSD signature: a UINT8 `inputs` batch of one.
pub fn detection_inputs(pixels: &RgbPixels) -> Result<Vec<TensorBuffer>> {
    Ok(vec![TensorBuffer::new(
        "inputs",
        image_shape(pixels),
        pixels.data().to_vec(),
    )?])
}
