//! The subset of the ONNX protobuf schema needed to describe a feed-forward
//! convolutional graph, encoded straight to the protobuf wire format.
//!
//! Field numbers follow `onnx.proto`. Repeated scalars are written unpacked,
//! which every protobuf reader accepts.

pub const IR_VERSION: i64 = 5;
pub const TENSOR_FLOAT: i32 = 1;

const WIRE_VARINT: u8 = 0;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

const ATTR_FLOAT: i64 = 1;
const ATTR_INT: i64 = 2;
const ATTR_INTS: i64 = 7;

#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn varint(&mut self, mut v: u64) {
        while v >= 0x80 {
            self.buf.push((v as u8) | 0x80);
            v >>= 7;
        }
        self.buf.push(v as u8);
    }

    fn key(&mut self, field: u32, wire: u8) {
        self.varint(((field as u64) << 3) | wire as u64);
    }

    fn int(&mut self, field: u32, v: i64) {
        self.key(field, WIRE_VARINT);
        self.varint(v as u64);
    }

    fn float(&mut self, field: u32, v: f32) {
        self.key(field, WIRE_FIXED32);
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn bytes(&mut self, field: u32, v: &[u8]) {
        self.key(field, WIRE_LEN);
        self.varint(v.len() as u64);
        self.buf.extend_from_slice(v);
    }

    fn string(&mut self, field: u32, v: &str) {
        self.bytes(field, v.as_bytes());
    }

    fn message<M: Encode + ?Sized>(&mut self, field: u32, msg: &M) {
        self.bytes(field, &msg.to_bytes());
    }
}

pub trait Encode {
    fn encode_to(&self, w: &mut Vec<u8>);

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_to(&mut buf);
        buf
    }
}

fn with_writer(out: &mut Vec<u8>, f: impl FnOnce(&mut Writer)) {
    let mut w = Writer {
        buf: std::mem::take(out),
    };
    f(&mut w);
    *out = w.buf;
}

#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    Float(f32),
    Int(i64),
    Ints(Vec<i64>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: AttributeValue,
}

impl Attribute {
    pub fn float(name: &str, v: f32) -> Self {
        Self {
            name: name.to_string(),
            value: AttributeValue::Float(v),
        }
    }

    pub fn int(name: &str, v: i64) -> Self {
        Self {
            name: name.to_string(),
            value: AttributeValue::Int(v),
        }
    }

    pub fn ints(name: &str, v: &[i64]) -> Self {
        Self {
            name: name.to_string(),
            value: AttributeValue::Ints(v.to_vec()),
        }
    }
}

impl Encode for Attribute {
    fn encode_to(&self, out: &mut Vec<u8>) {
        with_writer(out, |w| {
            w.string(1, &self.name);
            match &self.value {
                AttributeValue::Float(v) => {
                    w.float(2, *v);
                    w.int(20, ATTR_FLOAT);
                }
                AttributeValue::Int(v) => {
                    w.int(3, *v);
                    w.int(20, ATTR_INT);
                }
                AttributeValue::Ints(vs) => {
                    for v in vs {
                        w.int(8, *v);
                    }
                    w.int(20, ATTR_INTS);
                }
            }
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub name: String,
    pub op_type: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub attributes: Vec<Attribute>,
}

impl Encode for Node {
    fn encode_to(&self, out: &mut Vec<u8>) {
        with_writer(out, |w| {
            for input in &self.inputs {
                w.string(1, input);
            }
            for output in &self.outputs {
                w.string(2, output);
            }
            w.string(3, &self.name);
            w.string(4, &self.op_type);
            for attr in &self.attributes {
                w.message(5, attr);
            }
        })
    }
}

/// Float tensor with its data stored as little-endian `raw_data`.
#[derive(Clone, Debug, PartialEq)]
pub struct Initializer {
    pub name: String,
    pub dims: Vec<i64>,
    pub data: Vec<f32>,
}

impl Encode for Initializer {
    fn encode_to(&self, out: &mut Vec<u8>) {
        with_writer(out, |w| {
            for d in &self.dims {
                w.int(1, *d);
            }
            w.int(2, TENSOR_FLOAT as i64);
            w.string(8, &self.name);
            let raw = self
                .data
                .iter()
                .flat_map(|v| v.to_le_bytes())
                .collect::<Vec<u8>>();
            w.bytes(9, &raw);
        })
    }
}

/// Graph input or output of type float tensor with a fixed shape.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueInfo {
    pub name: String,
    pub dims: Vec<i64>,
}

struct Dimension(i64);

impl Encode for Dimension {
    fn encode_to(&self, out: &mut Vec<u8>) {
        with_writer(out, |w| w.int(1, self.0))
    }
}

struct Shape<'a>(&'a [i64]);

impl Encode for Shape<'_> {
    fn encode_to(&self, out: &mut Vec<u8>) {
        with_writer(out, |w| {
            for d in self.0 {
                w.message(1, &Dimension(*d));
            }
        })
    }
}

struct TensorType<'a>(&'a [i64]);

impl Encode for TensorType<'_> {
    fn encode_to(&self, out: &mut Vec<u8>) {
        with_writer(out, |w| {
            w.int(1, TENSOR_FLOAT as i64);
            w.message(2, &Shape(self.0));
        })
    }
}

struct TypeProto<'a>(&'a [i64]);

impl Encode for TypeProto<'_> {
    fn encode_to(&self, out: &mut Vec<u8>) {
        with_writer(out, |w| w.message(1, &TensorType(self.0)))
    }
}

impl Encode for ValueInfo {
    fn encode_to(&self, out: &mut Vec<u8>) {
        with_writer(out, |w| {
            w.string(1, &self.name);
            w.message(2, &TypeProto(&self.dims));
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Graph {
    pub name: String,
    pub nodes: Vec<Node>,
    pub initializers: Vec<Initializer>,
    pub inputs: Vec<ValueInfo>,
    pub outputs: Vec<ValueInfo>,
}

impl Encode for Graph {
    fn encode_to(&self, out: &mut Vec<u8>) {
        with_writer(out, |w| {
            for node in &self.nodes {
                w.message(1, node);
            }
            w.string(2, &self.name);
            for init in &self.initializers {
                w.message(5, init);
            }
            for input in &self.inputs {
                w.message(11, input);
            }
            for output in &self.outputs {
                w.message(12, output);
            }
        })
    }
}

struct OpsetId(i64);

impl Encode for OpsetId {
    fn encode_to(&self, out: &mut Vec<u8>) {
        with_writer(out, |w| {
            w.string(1, "");
            w.int(2, self.0);
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Model {
    pub producer_name: String,
    pub producer_version: String,
    pub opset_version: i64,
    pub graph: Graph,
}

impl Encode for Model {
    fn encode_to(&self, out: &mut Vec<u8>) {
        with_writer(out, |w| {
            w.int(1, IR_VERSION);
            w.string(2, &self.producer_name);
            w.string(3, &self.producer_version);
            w.message(7, &self.graph);
            w.message(8, &OpsetId(self.opset_version));
        })
    }
}

#[cfg(test)]
pub(crate) mod wire {
    //! Just enough of a protobuf reader to inspect what the writer produced.

    #[derive(Debug, Clone, PartialEq)]
    pub enum Value<'a> {
        Varint(u64),
        Fixed32([u8; 4]),
        Bytes(&'a [u8]),
    }

    fn varint(buf: &[u8], pos: &mut usize) -> u64 {
        let mut v = 0u64;
        let mut shift = 0;
        loop {
            let b = buf[*pos];
            *pos += 1;
            v |= ((b & 0x7f) as u64) << shift;
            if b < 0x80 {
                return v;
            }
            shift += 7;
        }
    }

    pub fn fields(buf: &[u8]) -> Vec<(u32, Value<'_>)> {
        let mut pos = 0;
        let mut out = Vec::new();
        while pos < buf.len() {
            let key = varint(buf, &mut pos);
            let field = (key >> 3) as u32;
            let value = match key & 7 {
                0 => Value::Varint(varint(buf, &mut pos)),
                2 => {
                    let len = varint(buf, &mut pos) as usize;
                    let v = &buf[pos..pos + len];
                    pos += len;
                    Value::Bytes(v)
                }
                5 => {
                    let v = [buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]];
                    pos += 4;
                    Value::Fixed32(v)
                }
                w => panic!("unexpected wire type {w}"),
            };
            out.push((field, value));
        }
        out
    }

    pub fn bytes_of<'a>(fields: &[(u32, Value<'a>)], field: u32) -> Vec<&'a [u8]> {
        fields
            .iter()
            .filter(|(f, _)| *f == field)
            .filter_map(|(_, v)| match v {
                Value::Bytes(b) => Some(*b),
                _ => None,
            })
            .collect()
    }

    pub fn varints_of(fields: &[(u32, Value<'_>)], field: u32) -> Vec<u64> {
        fields
            .iter()
            .filter(|(f, _)| *f == field)
            .filter_map(|(_, v)| match v {
                Value::Varint(x) => Some(*x),
                _ => None,
            })
            .collect()
    }
}
