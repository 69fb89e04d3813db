//! Typed, fixed-shape numeric buffers used as leaf values

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DataModelError, Result};

/// Element type of an [`NdArray`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Uint8,
    Uint16,
    Uint32,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl DataType {
    /// Name used in the container tree and in schemas
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Uint8 => "uint8",
            DataType::Uint16 => "uint16",
            DataType::Uint32 => "uint32",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        }
    }

    /// Size of one element in bytes
    pub fn item_size(&self) -> usize {
        match self {
            DataType::Uint8 => 1,
            DataType::Uint16 => 2,
            DataType::Uint32 | DataType::Int32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::Float64 => 8,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Byte order of an encoded array block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

/// Flat element storage, one variant per [`DataType`]
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Uint8(Vec<u8>),
    Uint16(Vec<u16>),
    Uint32(Vec<u32>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

macro_rules! array_data_dispatch {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            ArrayData::Uint8($v) => $body,
            ArrayData::Uint16($v) => $body,
            ArrayData::Uint32($v) => $body,
            ArrayData::Int32($v) => $body,
            ArrayData::Int64($v) => $body,
            ArrayData::Float32($v) => $body,
            ArrayData::Float64($v) => $body,
        }
    };
}

fn decode<T, const N: usize>(
    bytes: &[u8],
    order: ByteOrder,
    le: fn([u8; N]) -> T,
    be: fn([u8; N]) -> T,
) -> Vec<T> {
    bytes
        .chunks_exact(N)
        .map(|chunk| {
            let mut raw = [0u8; N];
            raw.copy_from_slice(chunk);
            match order {
                ByteOrder::Little => le(raw),
                ByteOrder::Big => be(raw),
            }
        })
        .collect()
}

impl ArrayData {
    pub fn dtype(&self) -> DataType {
        match self {
            ArrayData::Uint8(_) => DataType::Uint8,
            ArrayData::Uint16(_) => DataType::Uint16,
            ArrayData::Uint32(_) => DataType::Uint32,
            ArrayData::Int32(_) => DataType::Int32,
            ArrayData::Int64(_) => DataType::Int64,
            ArrayData::Float32(_) => DataType::Float32,
            ArrayData::Float64(_) => DataType::Float64,
        }
    }

    pub fn len(&self) -> usize {
        array_data_dispatch!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn zeros(dtype: DataType, count: usize) -> Self {
        match dtype {
            DataType::Uint8 => ArrayData::Uint8(vec![0; count]),
            DataType::Uint16 => ArrayData::Uint16(vec![0; count]),
            DataType::Uint32 => ArrayData::Uint32(vec![0; count]),
            DataType::Int32 => ArrayData::Int32(vec![0; count]),
            DataType::Int64 => ArrayData::Int64(vec![0; count]),
            DataType::Float32 => ArrayData::Float32(vec![0.0; count]),
            DataType::Float64 => ArrayData::Float64(vec![0.0; count]),
        }
    }

    fn to_le_bytes(&self) -> Vec<u8> {
        array_data_dispatch!(self, v => v.iter().flat_map(|x| x.to_le_bytes()).collect())
    }

    fn from_bytes(dtype: DataType, bytes: &[u8], order: ByteOrder) -> Self {
        match dtype {
            DataType::Uint8 => ArrayData::Uint8(bytes.to_vec()),
            DataType::Uint16 => {
                ArrayData::Uint16(decode(bytes, order, u16::from_le_bytes, u16::from_be_bytes))
            }
            DataType::Uint32 => {
                ArrayData::Uint32(decode(bytes, order, u32::from_le_bytes, u32::from_be_bytes))
            }
            DataType::Int32 => {
                ArrayData::Int32(decode(bytes, order, i32::from_le_bytes, i32::from_be_bytes))
            }
            DataType::Int64 => {
                ArrayData::Int64(decode(bytes, order, i64::from_le_bytes, i64::from_be_bytes))
            }
            DataType::Float32 => {
                ArrayData::Float32(decode(bytes, order, f32::from_le_bytes, f32::from_be_bytes))
            }
            DataType::Float64 => {
                ArrayData::Float64(decode(bytes, order, f64::from_le_bytes, f64::from_be_bytes))
            }
        }
    }
}

/// A fixed-shape, fixed-dtype numeric buffer in row-major order
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    shape: Vec<usize>,
    data: ArrayData,
}

impl NdArray {
    /// Build an array, checking the element count against the shape
    pub fn new(shape: impl Into<Vec<usize>>, data: ArrayData) -> Result<Self> {
        let shape = shape.into();
        let expected = element_count(&shape)?;
        if expected != data.len() {
            return Err(DataModelError::ShapeMismatch {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Zero-filled array.
    ///
    /// Panics if the element count overflows `usize`, like `vec![0; n]`.
    /// Shapes read from files go through [`NdArray::from_bytes`] instead.
    pub fn zeros(dtype: DataType, shape: impl Into<Vec<usize>>) -> Self {
        let shape = shape.into();
        let count = shape.iter().product();
        Self {
            data: ArrayData::zeros(dtype, count),
            shape,
        }
    }

    pub fn from_f32(shape: impl Into<Vec<usize>>, values: Vec<f32>) -> Result<Self> {
        Self::new(shape, ArrayData::Float32(values))
    }

    pub fn from_u32(shape: impl Into<Vec<usize>>, values: Vec<u32>) -> Result<Self> {
        Self::new(shape, ArrayData::Uint32(values))
    }

    pub fn dtype(&self) -> DataType {
        self.data.dtype()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            ArrayData::Float32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<&[u32]> {
        match &self.data {
            ArrayData::Uint32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f32_mut(&mut self) -> Option<&mut [f32]> {
        match &mut self.data {
            ArrayData::Float32(v) => Some(v),
            _ => None,
        }
    }

    /// Encoded size in bytes
    pub fn nbytes(&self) -> usize {
        self.len() * self.dtype().item_size()
    }

    /// Little-endian encoding of every element
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.data.to_le_bytes()
    }

    /// Decode an array from a raw block
    pub fn from_bytes(
        dtype: DataType,
        shape: impl Into<Vec<usize>>,
        bytes: &[u8],
        order: ByteOrder,
    ) -> Result<Self> {
        let shape = shape.into();
        let expected = element_count(&shape)?;
        let needed = expected
            .checked_mul(dtype.item_size())
            .ok_or_else(|| overflow(&shape))?;
        if bytes.len() != needed {
            return Err(DataModelError::ShapeMismatch {
                shape,
                expected,
                actual: bytes.len() / dtype.item_size(),
            });
        }
        Ok(Self {
            data: ArrayData::from_bytes(dtype, bytes, order),
            shape,
        })
    }
}

/// Product of the dimensions, or an error if it overflows `usize`
fn element_count(shape: &[usize]) -> Result<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, d| acc.checked_mul(*d))
        .ok_or_else(|| overflow(shape))
}

fn overflow(shape: &[usize]) -> DataModelError {
    DataModelError::Format(format!("shape {:?} overflows the element count", shape))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros() {
        let arr = NdArray::zeros(DataType::Float32, vec![3, 4]);
        assert_eq!(arr.dtype(), DataType::Float32);
        assert_eq!(arr.shape(), &[3, 4]);
        assert_eq!(arr.ndim(), 2);
        assert_eq!(arr.len(), 12);
        assert_eq!(arr.nbytes(), 48);
        assert!(arr.as_f32().unwrap().iter().all(|v| *v == 0.0));
        assert!(arr.as_u32().is_none());
    }

    #[test]
    fn test_shape_mismatch() {
        let err = NdArray::from_u32(vec![2, 2], vec![1, 2, 3]).unwrap_err();
        assert!(matches!(err, DataModelError::ShapeMismatch { expected: 4, actual: 3, .. }));
    }

    #[test]
    fn test_big_endian_decode() {
        let bytes = [0x3f, 0x80, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00];
        let arr = NdArray::from_bytes(DataType::Float32, vec![2], &bytes, ByteOrder::Big).unwrap();
        assert_eq!(arr.as_f32().unwrap(), &[1.0, 2.0]);
    }

    #[test]
    fn test_le_bytes_decode_back() {
        let arr = NdArray::from_u32(vec![2, 2], vec![1, 2, 3, u32::MAX]).unwrap();
        let bytes = arr.to_le_bytes();
        assert_eq!(&bytes[..4], &[1, 0, 0, 0]);
        let back =
            NdArray::from_bytes(DataType::Uint32, vec![2, 2], &bytes, ByteOrder::Little).unwrap();
        assert_eq!(back, arr);
    }

    #[test]
    fn test_truncated_bytes_rejected() {
        assert!(NdArray::from_bytes(DataType::Float64, vec![2], &[0u8; 12], ByteOrder::Little)
            .is_err());
    }

    #[test]
    fn test_dtype_serde_names() {
        let json = serde_json::to_string(&DataType::Float32).unwrap();
        assert_eq!(json, "\"float32\"");
        let back: DataType = serde_json::from_str("\"uint32\"").unwrap();
        assert_eq!(back, DataType::Uint32);
    }

    #[test]
    fn test_overflowing_shape_is_an_error() {
        let huge = vec![4_294_967_296_000, 4_294_967_296_000];
        let err = NdArray::from_bytes(DataType::Float32, huge.clone(), &[0u8; 16], ByteOrder::Little)
            .unwrap_err();
        assert!(matches!(err, DataModelError::Format(_)));
        let err = NdArray::new(huge, ArrayData::Uint8(vec![0; 4])).unwrap_err();
        assert!(err.to_string().contains("overflows"));
    }

    #[test]
    fn test_byte_count_overflow_is_an_error() {
        let shape = vec![usize::MAX / 2];
        let err = NdArray::from_bytes(DataType::Float64, shape, &[0u8; 8], ByteOrder::Little)
            .unwrap_err();
        assert!(matches!(err, DataModelError::Format(_)));
    }
}
