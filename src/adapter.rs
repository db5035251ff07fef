//! Model adapters turn a decoded response into a domain result.
//!
//! Which adapter runs is decided once, when a [`ModelKind`] is parsed from
//! the model selector; nothing downstream compares model names again.

use log::warn;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::image_source::RgbPixels;
use crate::request::{self, InferenceRequest, RequestBuilder};
use crate::response::{
    decode, InferenceResponse, OutputSpec, DETECTION_OUTPUTS, SEGMENTATION_OUTPUTS,
};

/// Converts a response into a model-specific result.
pub trait ModelAdapter {
    type Output;

    /// Outputs the adapter reads from the response.
    fn required_outputs(&self) -> &'static [OutputSpec];

    fn adapt(&self, response: &InferenceResponse) -> Result<Self::Output>;
}

/// Per-pixel class ids for a single image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentationResult {
    pub height: usize,
    pub width: usize,
    /// Row-major, `height * width` entries.
    pub class_map: Vec<i64>,
}

impl SegmentationResult {
    pub fn class_at(&self, x: usize, y: usize) -> Option<i64> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.class_map.get(y * self.width + x).copied()
    }
}

/// Box corners as fractions of the image height and width.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub y0: f32,
    pub x0: f32,
    pub y1: f32,
    pub x1: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Detection {
    /// Position of this detection in the model's output slots.
    pub slot: usize,
    pub class_id: i64,
    pub score: f32,
    pub bbox: BoundingBox,
}

/// Detections in the order the model emitted them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    pub total_slots: usize,
    pub num_detections: f32,
    pub detections: Vec<Detection>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Prediction {
    Segmentation(SegmentationResult),
    Detection(DetectionResult),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentationAdapter;

impl ModelAdapter for SegmentationAdapter {
    type Output = SegmentationResult;

    fn required_outputs(&self) -> &'static [OutputSpec] {
        SEGMENTATION_OUTPUTS
    }

    fn adapt(&self, response: &InferenceResponse) -> Result<SegmentationResult> {
        let outputs = decode(response, self.required_outputs())?;
        let map = outputs.get("segmentation_map")?;
        let shape = map.shape();

        if shape[0] != 1 {
            warn!(
                "segmentation_map has batch size {}, using the first image",
                shape[0]
            );
        }

        let height = shape[1] as usize;
        let width = shape[2] as usize;
        let values = map.as_i64()?;
        let pixels = height
            .checked_mul(width)
            .filter(|pixels| *pixels <= values.len())
            .ok_or_else(|| {
                Error::shape(
                    map.name(),
                    format!("shape {:?} holds fewer than {}x{} class ids", shape, height, width),
                )
            })?;
        let class_map = values[..pixels].to_vec();

        Ok(SegmentationResult {
            height,
            width,
            class_map,
        })
    }
}

/// Reads the SSD outputs.
///
/// Every slot of the fixed-size output is visited and kept when its score
/// is strictly positive; `num_detections` is reported but does not bound the
/// loop unless `bound_by_num_detections` is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectionAdapter {
    pub bound_by_num_detections: bool,
}

impl ModelAdapter for DetectionAdapter {
    type Output = DetectionResult;

    fn required_outputs(&self) -> &'static [OutputSpec] {
        DETECTION_OUTPUTS
    }

    fn adapt(&self, response: &InferenceResponse) -> Result<DetectionResult> {
        let outputs = decode(response, self.required_outputs())?;
        let classes_t = outputs.get("detection_classes")?;
        let num_t = outputs.get("num_detections")?;
        let boxes_t = outputs.get("detection_boxes")?;
        let scores_t = outputs.get("detection_scores")?;

        let total_slots = classes_t.shape()[1] as usize;
        let classes = classes_t.as_f32()?;
        let scores = scores_t.as_f32()?;
        let boxes = boxes_t.as_f32()?;
        let num_detections = num_t.as_f32()?.first().copied().unwrap_or(0.0);

        if classes.len() < total_slots {
            return Err(Error::shape(
                classes_t.name(),
                format!("{} values for {} slots", classes.len(), total_slots),
            ));
        }
        if scores.len() < total_slots {
            return Err(Error::shape(
                scores_t.name(),
                format!("{} scores for {} slots", scores.len(), total_slots),
            ));
        }
        let box_values = total_slots.checked_mul(4).unwrap_or(usize::MAX);
        if boxes_t.shape()[2] != 4 || boxes.len() < box_values {
            return Err(Error::shape(
                boxes_t.name(),
                format!(
                    "shape {:?} does not hold 4 coordinates for each of {} slots",
                    boxes_t.shape(),
                    total_slots
                ),
            ));
        }

        let slots = if self.bound_by_num_detections {
            let reported = num_detections.max(0.0) as usize;
            if reported > total_slots {
                warn!(
                    "num_detections {} exceeds {} output slots",
                    num_detections, total_slots
                );
            }
            reported.min(total_slots)
        } else {
            total_slots
        };

        let detections = (0..slots)
            .filter(|i| scores[*i] > 0.0)
            .map(|i| Detection {
                slot: i,
                class_id: classes[i] as i64,
                score: scores[i],
                bbox: BoundingBox {
                    y0: boxes[i * 4],
                    x0: boxes[i * 4 + 1],
                    y1: boxes[i * 4 + 2],
                    x1: boxes[i * 4 + 3],
                },
            })
            .collect();

        Ok(DetectionResult {
            total_slots,
            num_detections,
            detections,
        })
    }
}

/// The models this client knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    /// DeepLab v3 semantic segmentation.
    Segmentation,
    /// SSD MobileNet v2 trained on COCO.
    Detection,
}

impl FromStr for ModelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "deeplab" | "deeplab_v3" | "segmentation" => Ok(ModelKind::Segmentation),
            "ssd" | "ssd_mobilenet_v2_coco" | "detection" => Ok(ModelKind::Detection),
            _ => Err(Error::UnknownModel(s.to_string())),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.model_name())
    }
}

impl ModelKind {
    /// Name the model is served under.
    pub fn model_name(self) -> &'static str {
        match self {
            ModelKind::Segmentation => "deeplab_v3",
            ModelKind::Detection => "ssd_mobilenet_v2_coco",
        }
    }

    pub fn signature_name(self) -> &'static str {
        match self {
            ModelKind::Segmentation => "predict_images",
            ModelKind::Detection => request::DEFAULT_SIGNATURE,
        }
    }

    pub fn default_version(self) -> i64 {
        1
    }

    /// A builder preloaded with this model's name, signature, version and
    /// the inputs for `pixels`.
    pub fn request_builder(self, pixels: &RgbPixels) -> Result<RequestBuilder> {
        let inputs = match self {
            ModelKind::Segmentation => request::segmentation_inputs(pixels)?,
            ModelKind::Detection => request::detection_inputs(pixels)?,
        };

        let mut builder = RequestBuilder::new(self.model_name());
        builder
            .signature_name(self.signature_name())
            .version(self.default_version())
            .inputs(inputs);
        Ok(builder)
    }

    pub fn build_request(self, pixels: &RgbPixels) -> Result<InferenceRequest> {
        Ok(self.request_builder(pixels)?.build())
    }

    pub fn required_outputs(self) -> &'static [OutputSpec] {
        match self {
            ModelKind::Segmentation => SEGMENTATION_OUTPUTS,
            ModelKind::Detection => DETECTION_OUTPUTS,
        }
    }

    /// Run the default adapter for this model.
    pub fn adapt(self, response: &InferenceResponse) -> Result<Prediction> {
        self.adapt_with(response, DetectionAdapter::default())
    }

    /// Like [`ModelKind::adapt`], with explicit detection settings.
    pub fn adapt_with(
        self,
        response: &InferenceResponse,
        detection: DetectionAdapter,
    ) -> Result<Prediction> {
        match self {
            ModelKind::Segmentation => SegmentationAdapter
                .adapt(response)
                .map(Prediction::Segmentation),
            ModelKind::Detection => detection.adapt(response).map(Prediction::Detection),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TensorBuffer;

    fn response_with(outputs: Vec<TensorBuffer>) -> InferenceResponse {
        InferenceResponse {
            model_spec: None,
            outputs: outputs
                .into_iter()
                .map(|t| (t.name().to_string(), t.into_proto()))
                .collect(),
        }
    }

    const SLOTS: usize = 100;

    fn ssd_response(scores: &[(usize, f32, f32)], num: f32) -> InferenceResponse {
        let mut score_vals = vec![0f32; SLOTS];
        let mut class_vals = vec![0f32; SLOTS];
        let mut box_vals = vec![0f32; SLOTS * 4];
        for (slot, score, class) in scores {
            score_vals[*slot] = *score;
            class_vals[*slot] = *class;
            let base = *slot as f32 / 8.0;
            box_vals[slot * 4..slot * 4 + 4]
                .copy_from_slice(&[base, base + 0.125, base + 0.25, base + 0.375]);
        }

        response_with(vec![
            TensorBuffer::new("detection_classes", vec![1, SLOTS as i64], class_vals).unwrap(),
            TensorBuffer::new("num_detections", vec![1], vec![num]).unwrap(),
            TensorBuffer::new("detection_boxes", vec![1, SLOTS as i64, 4], box_vals).unwrap(),
            TensorBuffer::new("detection_scores", vec![1, SLOTS as i64], score_vals).unwrap(),
        ])
    }

    #[test]
    fn segmentation_drops_batch_and_keeps_row_major_order() {
        let values: Vec<i64> = (0..20).collect();
        let response = response_with(vec![TensorBuffer::new(
            "segmentation_map",
            vec![1, 4, 5],
            values.clone(),
        )
        .unwrap()]);

        let result = SegmentationAdapter.adapt(&response).unwrap();
        assert_eq!(result.height, 4);
        assert_eq!(result.width, 5);
        assert_eq!(result.class_map, values);
        assert_eq!(result.class_at(1, 2), Some(11));
        assert_eq!(result.class_at(5, 0), None);
    }

    #[test]
    fn segmentation_class_ids_are_not_scaled() {
        let response = response_with(vec![TensorBuffer::new(
            "segmentation_map",
            vec![1, 1, 2],
            vec![15i64, 300],
        )
        .unwrap()]);

        let result = SegmentationAdapter.adapt(&response).unwrap();
        assert_eq!(result.class_map, vec![15, 300]);
    }

    #[test]
    fn segmentation_takes_first_image_of_larger_batch() {
        let response = response_with(vec![TensorBuffer::new(
            "segmentation_map",
            vec![2, 1, 2],
            vec![1i64, 2, 3, 4],
        )
        .unwrap()]);

        let result = SegmentationAdapter.adapt(&response).unwrap();
        assert_eq!(result.class_map, vec![1, 2]);
    }

    #[test]
    fn segmentation_rejects_empty_batch_with_huge_image() {
        // Batch 0 keeps the value count at zero whatever the other dims say.
        let mut response = response_with(vec![]);
        let mut map = TensorBuffer::new("segmentation_map", vec![1, 1, 1], vec![0i64])
            .unwrap()
            .into_proto();
        if let Some(shape) = map.tensor_shape.as_mut() {
            shape.dim[0].size = 0;
            shape.dim[1].size = 1 << 62;
            shape.dim[2].size = 4;
        }
        map.int64_val.clear();
        response.outputs.insert("segmentation_map".to_string(), map);

        let err = SegmentationAdapter.adapt(&response).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn segmentation_rejects_overflowing_shape() {
        let mut response = response_with(vec![]);
        let mut map = TensorBuffer::new("segmentation_map", vec![1, 1, 1], vec![0i64])
            .unwrap()
            .into_proto();
        if let Some(shape) = map.tensor_shape.as_mut() {
            shape.dim[1].size = 1 << 62;
            shape.dim[2].size = 4;
        }
        map.int64_val.clear();
        response.outputs.insert("segmentation_map".to_string(), map);

        let err = SegmentationAdapter.adapt(&response).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn detection_keeps_positive_scores_in_slot_order() {
        let response = ssd_response(&[(0, 0.9, 18.0), (2, 0.5, 1.7)], 2.0);

        let result = DetectionAdapter::default().adapt(&response).unwrap();
        assert_eq!(result.total_slots, SLOTS);
        assert_eq!(result.num_detections, 2.0);
        assert_eq!(result.detections.len(), 2);

        let first = &result.detections[0];
        assert_eq!(first.slot, 0);
        assert_eq!(first.class_id, 18);
        assert_eq!(first.score, 0.9);

        let second = &result.detections[1];
        assert_eq!(second.slot, 2);
        // Truncated, not rounded.
        assert_eq!(second.class_id, 1);
        assert_eq!(
            second.bbox,
            BoundingBox {
                y0: 0.25,
                x0: 0.375,
                y1: 0.5,
                x1: 0.625,
            }
        );
    }

    #[test]
    fn detection_ignores_num_detections_by_default() {
        // The model reports one detection but slot 50 still scores.
        let response = ssd_response(&[(0, 0.8, 3.0), (50, 0.4, 4.0)], 1.0);

        let result = DetectionAdapter::default().adapt(&response).unwrap();
        assert_eq!(result.detections.len(), 2);

        let bounded = DetectionAdapter {
            bound_by_num_detections: true,
        }
        .adapt(&response)
        .unwrap();
        assert_eq!(bounded.detections.len(), 1);
        assert_eq!(bounded.detections[0].slot, 0);
    }

    #[test]
    fn detection_skips_zero_and_negative_scores() {
        let response = ssd_response(&[(1, 0.0, 5.0), (3, -0.1, 6.0), (4, 0.01, 7.0)], 3.0);

        let result = DetectionAdapter::default().adapt(&response).unwrap();
        let slots: Vec<usize> = result.detections.iter().map(|d| d.slot).collect();
        assert_eq!(slots, vec![4]);
    }

    #[test]
    fn detection_requires_four_box_coordinates() {
        let response = response_with(vec![
            TensorBuffer::new("detection_classes", vec![1, 2], vec![1f32, 2.0]).unwrap(),
            TensorBuffer::new("num_detections", vec![1], vec![2f32]).unwrap(),
            TensorBuffer::new("detection_boxes", vec![1, 2, 3], vec![0f32; 6]).unwrap(),
            TensorBuffer::new("detection_scores", vec![1, 2], vec![0.5f32, 0.5]).unwrap(),
        ]);

        let err = DetectionAdapter::default().adapt(&response).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn detection_requires_scores_for_every_slot() {
        let response = response_with(vec![
            TensorBuffer::new("detection_classes", vec![1, 3], vec![1f32, 2.0, 3.0]).unwrap(),
            TensorBuffer::new("num_detections", vec![1], vec![2f32]).unwrap(),
            TensorBuffer::new("detection_boxes", vec![1, 3, 4], vec![0f32; 12]).unwrap(),
            TensorBuffer::new("detection_scores", vec![1, 2], vec![0.5f32, 0.5]).unwrap(),
        ]);

        let err = DetectionAdapter::default().adapt(&response).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn no_partial_result_when_any_output_is_bad() {
        let mut response = ssd_response(&[(0, 0.9, 1.0)], 1.0);
        response.outputs.remove("num_detections");

        let err = DetectionAdapter::default().adapt(&response).unwrap_err();
        assert!(matches!(err, Error::MissingOutput(ref name) if name == "num_detections"));
    }

    #[test]
    fn model_selector_parsing() {
        assert_eq!("deeplab".parse::<ModelKind>().unwrap(), ModelKind::Segmentation);
        assert_eq!("DeepLab_V3".parse::<ModelKind>().unwrap(), ModelKind::Segmentation);
        assert_eq!("ssd".parse::<ModelKind>().unwrap(), ModelKind::Detection);
        assert_eq!(
            "ssd_mobilenet_v2_coco".parse::<ModelKind>().unwrap(),
            ModelKind::Detection
        );

        match "yolo".parse::<ModelKind>() {
            Err(Error::UnknownModel(name)) => assert_eq!(name, "yolo"),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(matches!("".parse::<ModelKind>(), Err(Error::UnknownModel(_))));
    }

    #[test]
    fn model_profiles_match_the_served_signatures() {
        let pixels = RgbPixels::new(20, 10, vec![7; 600]).unwrap();

        let seg = ModelKind::Segmentation.build_request(&pixels).unwrap();
        assert_eq!(seg.model_name, "deeplab_v3");
        assert_eq!(seg.signature_name, "predict_images");
        assert_eq!(seg.model_version, Some(1));
        assert_eq!(seg.inputs["images"].shape(), &[1, 10, 20, 3]);
        assert_eq!(seg.inputs.len(), 3);

        let det = ModelKind::Detection.build_request(&pixels).unwrap();
        assert_eq!(det.model_name, "ssd_mobilenet_v2_coco");
        assert_eq!(det.signature_name, "serving_default");
        assert_eq!(det.inputs.len(), 1);
        assert!(det.inputs.contains_key("inputs"));
    }

    #[test]
    fn dispatch_runs_the_matching_adapter() {
        let response = ssd_response(&[(7, 0.6, 2.0)], 1.0);
        match ModelKind::Detection.adapt(&response).unwrap() {
            Prediction::Detection(result) => assert_eq!(result.detections.len(), 1),
            other => panic!("unexpected prediction {:?}", other),
        }

        // The SSD outputs do not satisfy the DeepLab schema.
        let err = ModelKind::Segmentation.adapt(&response).unwrap_err();
        assert!(matches!(err, Error::MissingOutput(_)));
    }
}
