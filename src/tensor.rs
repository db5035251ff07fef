//! Typed, shape-aware tensors and their conversion to and from the
//! TensorFlow `TensorProto` wire message.

use serde::Serialize;
use std::fmt;

use crate::error::{Error, Result};
use crate::tensorflow::{
    tensor_shape_proto, DataType as WireDataType, TensorProto, TensorShapeProto,
};

/// Element types understood by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DataType {
    Int32,
    Uint8,
    Float32,
    Int64,
}

impl DataType {
    /// The TensorFlow `DataType` code for this element type.
    pub fn to_wire(self) -> WireDataType {
        match self {
            DataType::Int32 => WireDataType::DtInt32,
            DataType::Uint8 => WireDataType::DtUint8,
            DataType::Float32 => WireDataType::DtFloat,
            DataType::Int64 => WireDataType::DtInt64,
        }
    }

    /// Map a raw wire code back to a supported element type.
    ///
    /// Returns `None` for codes outside the supported set, including codes
    /// this build does not know about at all.
    pub fn from_wire(code: i32) -> Option<Self> {
        match WireDataType::try_from(code).ok()? {
            WireDataType::DtInt32 => Some(DataType::Int32),
            WireDataType::DtUint8 => Some(DataType::Uint8),
            WireDataType::DtFloat => Some(DataType::Float32),
            WireDataType::DtInt64 => Some(DataType::Int64),
            _ => None,
        }
    }

    /// Width in bytes of one element inside `tensor_content`.
    pub fn size_of(self) -> usize {
        match self {
            DataType::Uint8 => 1,
            DataType::Int32 | DataType::Float32 => 4,
            DataType::Int64 => 8,
        }
    }

    // Name of the repeated field that carries values of this type.
    fn value_field(self) -> &'static str {
        match self {
            DataType::Float32 => "float_val",
            DataType::Int32 | DataType::Uint8 => "int_val",
            DataType::Int64 => "int64_val",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Int32 => "INT32",
            DataType::Uint8 => "UINT8",
            DataType::Float32 => "FLOAT32",
            DataType::Int64 => "INT64",
        };
        f.write_str(name)
    }
}

fn describe_wire(code: i32) -> String {
    WireDataType::try_from(code)
        .map(|dtype| dtype.as_str_name().to_string())
        .unwrap_or_else(|_| format!("unknown dtype code {}", code))
}

/// Tensor values; the variant is the element type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TensorData {
    Int32(Vec<i32>),
    Uint8(Vec<u8>),
    Float32(Vec<f32>),
    Int64(Vec<i64>),
}

impl TensorData {
    pub fn dtype(&self) -> DataType {
        match self {
            TensorData::Int32(_) => DataType::Int32,
            TensorData::Uint8(_) => DataType::Uint8,
            TensorData::Float32(_) => DataType::Float32,
            TensorData::Int64(_) => DataType::Int64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::Int32(v) => v.len(),
            TensorData::Uint8(v) => v.len(),
            TensorData::Float32(v) => v.len(),
            TensorData::Int64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<i32>> for TensorData {
    fn from(v: Vec<i32>) -> Self {
        TensorData::Int32(v)
    }
}

impl From<Vec<u8>> for TensorData {
    fn from(v: Vec<u8>) -> Self {
        TensorData::Uint8(v)
    }
}

impl From<Vec<f32>> for TensorData {
    fn from(v: Vec<f32>) -> Self {
        TensorData::Float32(v)
    }
}

impl From<Vec<i64>> for TensorData {
    fn from(v: Vec<i64>) -> Self {
        TensorData::Int64(v)
    }
}

/// A named tensor with a shape and a single typed value array.
///
/// In a request a dimension may be `-1`, meaning the server resolves it.
/// Once every dimension is known, the number of values always equals the
/// product of the shape (a scalar has an empty shape and one value).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TensorBuffer {
    name: String,
    shape: Vec<i64>,
    data: TensorData,
}

impl TensorBuffer {
    /// Build a tensor from values and an explicit shape.
    pub fn new<S, D>(name: S, shape: Vec<i64>, data: D) -> Result<Self>
    where
        S: Into<String>,
        D: Into<TensorData>,
    {
        let name = name.into();
        let data = data.into();

        if let Some(bad) = shape.iter().find(|size| **size < -1) {
            return Err(Error::shape(
                name,
                format!("invalid dimension {} in shape {:?}", bad, shape),
            ));
        }

        if shape.iter().all(|size| *size >= 0) {
            let count = element_count(&name, &shape)?;
            if count != data.len() {
                return Err(Error::shape(
                    name,
                    format!(
                        "shape {:?} holds {} elements but {} values were supplied",
                        shape,
                        count,
                        data.len()
                    ),
                ));
            }
        }

        Ok(TensorBuffer { name, shape, data })
    }

    /// A rank-0 INT32 tensor.
    pub fn scalar_i32<S: Into<String>>(name: S, value: i32) -> Self {
        TensorBuffer {
            name: name.into(),
            shape: Vec::new(),
            data: TensorData::Int32(vec![value]),
        }
    }

    /// Read a tensor out of a wire message.
    ///
    /// The declared dtype must equal `expected` and the values must sit in
    /// the field belonging to that dtype (or in `tensor_content`). The rank
    /// must be at least `min_rank` and every dimension must be resolved.
    pub fn decode<S: Into<String>>(
        name: S,
        proto: &TensorProto,
        expected: DataType,
        min_rank: usize,
    ) -> Result<Self> {
        let name = name.into();

        let declared = DataType::from_wire(proto.dtype)
            .ok_or_else(|| Error::dtype(name.as_str(), expected, describe_wire(proto.dtype)))?;
        if declared != expected {
            return Err(Error::dtype(name, expected, declared));
        }

        let shape = decode_shape(&name, proto.tensor_shape.as_ref())?;
        if shape.len() < min_rank {
            return Err(Error::shape(
                name,
                format!(
                    "rank {} (shape {:?}) is below the required rank {}",
                    shape.len(),
                    shape,
                    min_rank
                ),
            ));
        }

        let count = element_count(&name, &shape)?;
        let data = decode_values(&name, declared, proto)?;
        if data.len() != count {
            return Err(Error::shape(
                name,
                format!(
                    "shape {:?} holds {} elements but {} values were received",
                    shape,
                    count,
                    data.len()
                ),
            ));
        }

        Ok(TensorBuffer { name, shape, data })
    }

    /// Convert into the wire message, moving the values.
    ///
    /// Values are written to the typed repeated field, never to
    /// `tensor_content`. Scalars carry no shape at all.
    pub fn into_proto(self) -> TensorProto {
        let tensor_shape = if self.shape.is_empty() {
            None
        } else {
            let dim = self
                .shape
                .iter()
                .map(|size| tensor_shape_proto::Dim {
                    size: *size,
                    name: String::new(),
                })
                .collect();
            Some(TensorShapeProto {
                dim,
                unknown_rank: false,
            })
        };

        let mut proto = TensorProto {
            dtype: self.data.dtype().to_wire() as i32,
            tensor_shape,
            ..Default::default()
        };

        match self.data {
            TensorData::Int32(v) => proto.int_val = v,
            TensorData::Uint8(v) => proto.int_val = v.into_iter().map(i32::from).collect(),
            TensorData::Float32(v) => proto.float_val = v,
            TensorData::Int64(v) => proto.int64_val = v,
        }

        proto
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> DataType {
        self.data.dtype()
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Size of dimension `axis`, if the tensor has that many dimensions.
    pub fn dim(&self, axis: usize) -> Option<i64> {
        self.shape.get(axis).copied()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_f32(&self) -> Result<&[f32]> {
        match &self.data {
            TensorData::Float32(v) => Ok(v),
            other => Err(Error::dtype(self.name.as_str(), DataType::Float32, other.dtype())),
        }
    }

    pub fn as_i64(&self) -> Result<&[i64]> {
        match &self.data {
            TensorData::Int64(v) => Ok(v),
            other => Err(Error::dtype(self.name.as_str(), DataType::Int64, other.dtype())),
        }
    }

    pub fn as_i32(&self) -> Result<&[i32]> {
        match &self.data {
            TensorData::Int32(v) => Ok(v),
            other => Err(Error::dtype(self.name.as_str(), DataType::Int32, other.dtype())),
        }
    }

    pub fn as_u8(&self) -> Result<&[u8]> {
        match &self.data {
            TensorData::Uint8(v) => Ok(v),
            other => Err(Error::dtype(self.name.as_str(), DataType::Uint8, other.dtype())),
        }
    }
}

// Number of elements in a fully resolved shape.
fn element_count(name: &str, shape: &[i64]) -> Result<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, size| acc.checked_mul(usize::try_from(*size).ok()?))
        .ok_or_else(|| {
            Error::shape(
                name,
                format!("shape {:?} does not have a representable element count", shape),
            )
        })
}

fn decode_shape(name: &str, shape: Option<&TensorShapeProto>) -> Result<Vec<i64>> {
    let shape = match shape {
        Some(shape) => shape,
        None => return Ok(Vec::new()),
    };

    if shape.unknown_rank {
        return Err(Error::shape(name, "rank is unknown"));
    }

    let dims: Vec<i64> = shape.dim.iter().map(|d| d.size).collect();
    if let Some(axis) = dims.iter().position(|size| *size < 0) {
        return Err(Error::shape(
            name,
            format!("dimension {} is unresolved in shape {:?}", axis, dims),
        ));
    }

    Ok(dims)
}

fn populated_fields(proto: &TensorProto) -> impl Iterator<Item = &'static str> {
    [
        ("float_val", !proto.float_val.is_empty()),
        ("double_val", !proto.double_val.is_empty()),
        ("int_val", !proto.int_val.is_empty()),
        ("int64_val", !proto.int64_val.is_empty()),
        ("half_val", !proto.half_val.is_empty()),
        ("string_val", !proto.string_val.is_empty()),
        ("bool_val", !proto.bool_val.is_empty()),
        ("scomplex_val", !proto.scomplex_val.is_empty()),
        ("dcomplex_val", !proto.dcomplex_val.is_empty()),
        ("uint32_val", !proto.uint32_val.is_empty()),
        ("uint64_val", !proto.uint64_val.is_empty()),
    ]
    .into_iter()
    .filter_map(|(field, set)| if set { Some(field) } else { None })
}

fn decode_values(name: &str, dtype: DataType, proto: &TensorProto) -> Result<TensorData> {
    let own_field = dtype.value_field();
    if let Some(field) = populated_fields(proto).find(|field| *field != own_field) {
        return Err(Error::dtype(
            name,
            dtype,
            format!("values stored in `{}`", field),
        ));
    }

    let typed_values_present = populated_fields(proto).next().is_some();
    if !proto.tensor_content.is_empty() {
        if typed_values_present {
            return Err(Error::shape(
                name,
                format!("values stored in both `{}` and `tensor_content`", own_field),
            ));
        }
        return decode_tensor_content(name, dtype, &proto.tensor_content);
    }

    Ok(match dtype {
        DataType::Float32 => TensorData::Float32(proto.float_val.clone()),
        DataType::Int32 => TensorData::Int32(proto.int_val.clone()),
        DataType::Int64 => TensorData::Int64(proto.int64_val.clone()),
        DataType::Uint8 => TensorData::Uint8(narrow_to_u8(name, &proto.int_val)?),
    })
}

fn narrow_to_u8(name: &str, values: &[i32]) -> Result<Vec<u8>> {
    values
        .iter()
        .map(|v| {
            u8::try_from(*v).map_err(|_| {
                Error::dtype(name, DataType::Uint8, format!("out of range value {}", v))
            })
        })
        .collect()
}

fn le_array<const N: usize>(chunk: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(chunk);
    out
}

fn decode_tensor_content(name: &str, dtype: DataType, bytes: &[u8]) -> Result<TensorData> {
    let width = dtype.size_of();
    if bytes.len() % width != 0 {
        return Err(Error::shape(
            name,
            format!(
                "tensor_content of {} bytes is not a whole number of {} elements",
                bytes.len(),
                dtype
            ),
        ));
    }

    Ok(match dtype {
        DataType::Uint8 => TensorData::Uint8(bytes.to_vec()),
        DataType::Int32 => TensorData::Int32(
            bytes
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes(le_array(c)))
                .collect(),
        ),
        DataType::Float32 => TensorData::Float32(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes(le_array(c)))
                .collect(),
        ),
        DataType::Int64 => TensorData::Int64(
            bytes
                .chunks_exact(8)
                .map(|c| i64::from_le_bytes(le_array(c)))
                .collect(),
        ),
    })
}
