//! Reads the inswapper embedding map straight out of the ONNX file.
//!
//! The swap model expects its source latent already projected through a
//! 512×512 matrix that ships as the last initializer of the graph, so the
//! ONNX protobuf has to be walked to get at it. Only the handful of fields
//! on the path ModelProto.graph → GraphProto.initializer → TensorProto are
//! decoded; everything else is skipped by wire type.

use ndarray::Array2;
use std::path::Path;
use thiserror::Error;

// ModelProto
const MODEL_GRAPH: u32 = 7;
// GraphProto
const GRAPH_INITIALIZER: u32 = 5;
// TensorProto
const TENSOR_DIMS: u32 = 1;
const TENSOR_DATA_TYPE: u32 = 2;
const TENSOR_FLOAT_DATA: u32 = 4;
const TENSOR_INT32_DATA: u32 = 5;
const TENSOR_NAME: u32 = 8;
const TENSOR_RAW_DATA: u32 = 9;

// TensorProto.DataType
const DTYPE_FLOAT: u64 = 1;
const DTYPE_FLOAT16: u64 = 10;

#[derive(Error, Debug)]
pub enum EmapError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed protobuf: {0}")]
    Malformed(&'static str),
    #[error("model graph has no initializers")]
    NoInitializer,
    #[error("unsupported tensor data type {0}")]
    UnsupportedType(u64),
    #[error("emap has shape {0:?}, expected square matrix")]
    BadShape(Vec<usize>),
}

enum Field<'a> {
    Varint(u64),
    Fixed64,
    Bytes(&'a [u8]),
    Fixed32(u32),
}

struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn varint(&mut self) -> Result<u64, EmapError> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or(EmapError::Malformed("truncated varint"))?;
            self.pos += 1;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(EmapError::Malformed("varint overflow"))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], EmapError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or(EmapError::Malformed("field runs past end of buffer"))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Next (field number, value), or `None` at end of buffer.
    fn next_field(&mut self) -> Result<Option<(u32, Field<'a>)>, EmapError> {
        if self.pos >= self.buf.len() {
            return Ok(None);
        }
        let key = self.varint()?;
        let number = (key >> 3) as u32;
        let field = match key & 0x7 {
            0 => Field::Varint(self.varint()?),
            1 => {
                self.take(8)?;
                Field::Fixed64
            }
            2 => {
                let len = self.varint()? as usize;
                Field::Bytes(self.take(len)?)
            }
            5 => {
                let b = self.take(4)?;
                Field::Fixed32(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            }
            _ => return Err(EmapError::Malformed("unsupported wire type")),
        };
        Ok(Some((number, field)))
    }
}

/// The subset of a TensorProto needed to rebuild a float matrix.
#[derive(Default)]
struct TensorProto<'a> {
    name: String,
    dims: Vec<usize>,
    data_type: u64,
    raw_data: Option<&'a [u8]>,
    float_data: Vec<f32>,
    int32_data: Vec<u32>,
}

impl<'a> TensorProto<'a> {
    fn parse(buf: &'a [u8]) -> Result<Self, EmapError> {
        let mut tensor = TensorProto::default();
        let mut reader = WireReader::new(buf);
        while let Some((number, field)) = reader.next_field()? {
            match (number, field) {
                (TENSOR_DIMS, Field::Varint(v)) => tensor.dims.push(v as usize),
                (TENSOR_DIMS, Field::Bytes(packed)) => {
                    let mut r = WireReader::new(packed);
                    while r.pos < packed.len() {
                        tensor.dims.push(r.varint()? as usize);
                    }
                }
                (TENSOR_DATA_TYPE, Field::Varint(v)) => tensor.data_type = v,
                (TENSOR_FLOAT_DATA, Field::Fixed32(bits)) => tensor.float_data.push(f32::from_bits(bits)),
                (TENSOR_FLOAT_DATA, Field::Bytes(packed)) => {
                    tensor.float_data.extend(
                        packed
                            .chunks_exact(4)
                            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
                    );
                }
                (TENSOR_INT32_DATA, Field::Varint(v)) => tensor.int32_data.push(v as u32),
                (TENSOR_INT32_DATA, Field::Bytes(packed)) => {
                    let mut r = WireReader::new(packed);
                    while r.pos < packed.len() {
                        tensor.int32_data.push(r.varint()? as u32);
                    }
                }
                (TENSOR_NAME, Field::Bytes(name)) => {
                    tensor.name = String::from_utf8_lossy(name).into_owned();
                }
                (TENSOR_RAW_DATA, Field::Bytes(raw)) => tensor.raw_data = Some(raw),
                _ => {}
            }
        }
        Ok(tensor)
    }

    fn to_f32(&self) -> Result<Vec<f32>, EmapError> {
        match (self.data_type, self.raw_data) {
            (DTYPE_FLOAT, Some(raw)) => Ok(raw
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect()),
            (DTYPE_FLOAT, None) => Ok(self.float_data.clone()),
            (DTYPE_FLOAT16, Some(raw)) => Ok(raw
                .chunks_exact(2)
                .map(|b| f16_to_f32(u16::from_le_bytes([b[0], b[1]])))
                .collect()),
            // float16 payloads in int32_data carry the bit pattern in the low 16 bits
            (DTYPE_FLOAT16, None) => Ok(self.int32_data.iter().map(|&v| f16_to_f32(v as u16)).collect()),
            (other, _) => Err(EmapError::UnsupportedType(other)),
        }
    }
}

/// Decode an IEEE 754 half-precision bit pattern.
fn f16_to_f32(bits: u16) -> f32 {
    let sign = u32::from(bits >> 15) << 31;
    let exponent = u32::from((bits >> 10) & 0x1f);
    let mantissa = u32::from(bits & 0x3ff);

    let magnitude = match (exponent, mantissa) {
        (0, 0) => 0,
        (0, m) => {
            // Subnormal: m * 2^-24, exact in f32.
            let value = m as f32 * 2f32.powi(-24);
            return if sign != 0 { -value } else { value };
        }
        (0x1f, 0) => 0xff << 23,
        (0x1f, m) => (0xff << 23) | (m << 13),
        (e, m) => ((e + 112) << 23) | (m << 13),
    };
    f32::from_bits(sign | magnitude)
}

/// Extract the last graph initializer of an ONNX model as a square matrix.
pub fn read_emap(model_bytes: &[u8]) -> Result<Array2<f32>, EmapError> {
    let mut graph = None;
    let mut reader = WireReader::new(model_bytes);
    while let Some((number, field)) = reader.next_field()? {
        if let (MODEL_GRAPH, Field::Bytes(bytes)) = (number, field) {
            graph = Some(bytes);
        }
    }
    let graph = graph.ok_or(EmapError::Malformed("model has no graph"))?;

    let mut last = None;
    let mut reader = WireReader::new(graph);
    while let Some((number, field)) = reader.next_field()? {
        if let (GRAPH_INITIALIZER, Field::Bytes(bytes)) = (number, field) {
            last = Some(bytes);
        }
    }
    let tensor = TensorProto::parse(last.ok_or(EmapError::NoInitializer)?)?;

    let [rows, cols] = tensor.dims[..] else {
        return Err(EmapError::BadShape(tensor.dims));
    };
    if rows != cols {
        return Err(EmapError::BadShape(tensor.dims));
    }

    let values = tensor.to_f32()?;
    tracing::debug!(name = %tensor.name, rows, cols, dtype = tensor.data_type, "read emap initializer");
    Array2::from_shape_vec((rows, cols), values).map_err(|_| EmapError::BadShape(tensor.dims.clone()))
}

/// Read the model file at `path` and extract its embedding map.
pub fn load_emap(path: &Path) -> Result<Array2<f32>, EmapError> {
    let bytes = std::fs::read(path)?;
    read_emap(&bytes)
}
