use log::debug;
use serde::Serialize;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::tensor::{DataType, TensorBuffer};
use crate::tensorflow::serving::{ModelSpec, PredictResponse};
use crate::tensorflow::TensorProto;

/// A prediction response as received from the server.
///
/// Outputs are kept in wire form and only decoded on demand, so outputs
/// nobody asks for are never inspected.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InferenceResponse {
    pub model_spec: Option<ModelSpec>,
    pub outputs: HashMap<String, TensorProto>,
}

impl From<PredictResponse> for InferenceResponse {
    fn from(resp: PredictResponse) -> Self {
        InferenceResponse {
            model_spec: resp.model_spec,
            outputs: resp.outputs,
        }
    }
}

impl InferenceResponse {
    pub fn output_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.outputs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// One output a model adapter needs: its name, element type and the lowest
/// rank it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSpec {
    pub name: &'static str,
    pub dtype: DataType,
    pub min_rank: usize,
}

impl OutputSpec {
    pub const fn new(name: &'static str, dtype: DataType, min_rank: usize) -> Self {
        OutputSpec {
            name,
            dtype,
            min_rank,
        }
    }
}

/// Outputs of the DeepLab signature.
pub const SEGMENTATION_OUTPUTS: &[OutputSpec] =
    &[OutputSpec::new("segmentation_map", DataType::Int64, 3)];

/// Outputs of the SSD signature. The first three are co-indexed by slot.
pub const DETECTION_OUTPUTS: &[OutputSpec] = &[
    OutputSpec::new("detection_classes", DataType::Float32, 2),
    OutputSpec::new("num_detections", DataType::Float32, 1),
    OutputSpec::new("detection_boxes", DataType::Float32, 3),
    OutputSpec::new("detection_scores", DataType::Float32, 2),
];

/// Tensors extracted by [`decode`], keyed by output name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedOutputs {
    tensors: HashMap<String, TensorBuffer>,
}

impl DecodedOutputs {
    pub fn get(&self, name: &str) -> Result<&TensorBuffer> {
        self.tensors
            .get(name)
            .ok_or_else(|| Error::MissingOutput(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn into_inner(self) -> HashMap<String, TensorBuffer> {
        self.tensors
    }
}

/// Validate and extract the outputs named in `required`.
///
/// Fails on the first output that is missing, has another dtype, or has a
/// bad shape. Outputs not listed in `required` are ignored.
pub fn decode(response: &InferenceResponse, required: &[OutputSpec]) -> Result<DecodedOutputs> {
    let mut tensors = HashMap::with_capacity(required.len());

    for spec in required {
        let proto = response
            .outputs
            .get(spec.name)
            .ok_or_else(|| Error::MissingOutput(spec.name.to_string()))?;
        let tensor = TensorBuffer::decode(spec.name, proto, spec.dtype, spec.min_rank)?;
        debug!(
            "decoded output {} {} {:?}",
            spec.name,
            tensor.dtype(),
            tensor.shape()
        );
        tensors.insert(spec.name.to_string(), tensor);
    }

    Ok(DecodedOutputs { tensors })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with(outputs: Vec<TensorBuffer>) -> InferenceResponse {
        InferenceResponse {
            model_spec: None,
            outputs: outputs
                .into_iter()
                .map(|t| (t.name().to_string(), t.into_proto()))
                .collect(),
        }
    }

    #[test]
    fn decodes_required_and_ignores_extra_outputs() {
        let mut response = response_with(vec![TensorBuffer::new(
            "segmentation_map",
            vec![1, 2, 2],
            vec![0i64, 1, 2, 3],
        )
        .unwrap()]);
        // An extra output with a dtype this client cannot even represent.
        response.outputs.insert(
            "raw_strings".to_string(),
            TensorProto {
                dtype: crate::tensorflow::DataType::DtString as i32,
                string_val: vec![b"x".to_vec()],
                ..Default::default()
            },
        );

        let decoded = decode(&response, SEGMENTATION_OUTPUTS).unwrap();
        assert_eq!(decoded.len(), 1);
        let map = decoded.get("segmentation_map").unwrap();
        assert_eq!(map.as_i64().unwrap(), &[0, 1, 2, 3]);
        assert!(matches!(
            decoded.get("raw_strings"),
            Err(Error::MissingOutput(_))
        ));
    }

    #[test]
    fn missing_output_is_reported_by_name() {
        let response = response_with(vec![
            TensorBuffer::new("detection_classes", vec![1, 1], vec![1.0f32]).unwrap(),
            TensorBuffer::new("num_detections", vec![1], vec![1.0f32]).unwrap(),
            TensorBuffer::new("detection_scores", vec![1, 1], vec![0.5f32]).unwrap(),
        ]);

        match decode(&response, DETECTION_OUTPUTS) {
            Err(Error::MissingOutput(name)) => assert_eq!(name, "detection_boxes"),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn empty_response_fails_with_missing_output() {
        let err = decode(&InferenceResponse::default(), SEGMENTATION_OUTPUTS).unwrap_err();
        assert!(matches!(err, Error::MissingOutput(_)));
    }

    #[test]
    fn dtype_mismatch_even_when_reinterpretable() {
        // INT32 values would fit into INT64, but no coercion happens.
        let response = response_with(vec![TensorBuffer::new(
            "segmentation_map",
            vec![1, 1, 2],
            vec![3i32, 4],
        )
        .unwrap()]);

        let err = decode(&response, SEGMENTATION_OUTPUTS).unwrap_err();
        assert!(matches!(err, Error::DtypeMismatch { .. }));
    }

    #[test]
    fn rank_below_minimum_is_a_shape_mismatch() {
        let response = response_with(vec![TensorBuffer::new(
            "segmentation_map",
            vec![2, 2],
            vec![0i64; 4],
        )
        .unwrap()]);

        let err = decode(&response, SEGMENTATION_OUTPUTS).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn output_names_are_sorted() {
        let response = response_with(vec![
            TensorBuffer::scalar_i32("b", 1),
            TensorBuffer::scalar_i32("a", 1),
        ]);
        assert_eq!(response.output_names(), vec!["a", "b"]);
    }
}
