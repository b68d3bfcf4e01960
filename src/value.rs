use std::mem;

use crate::{MemEditError, MemEditResult};

/// Width and interpretation of a single scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
    /// A pointer of the host's width.
    Pointer,
}

impl ScalarKind {
    pub fn size(self) -> usize {
        match self {
            ScalarKind::U8 | ScalarKind::I8 => 1,
            ScalarKind::U16 | ScalarKind::I16 => 2,
            ScalarKind::U32 | ScalarKind::I32 | ScalarKind::F32 => 4,
            ScalarKind::U64 | ScalarKind::I64 | ScalarKind::F64 => 8,
            ScalarKind::Pointer => mem::size_of::<usize>(),
        }
    }

    fn decode(self, bytes: &[u8]) -> Value {
        match self {
            ScalarKind::U8 => Value::U8(u8::from_bytes(bytes)),
            ScalarKind::I8 => Value::I8(i8::from_bytes(bytes)),
            ScalarKind::U16 => Value::U16(u16::from_bytes(bytes)),
            ScalarKind::I16 => Value::I16(i16::from_bytes(bytes)),
            ScalarKind::U32 => Value::U32(u32::from_bytes(bytes)),
            ScalarKind::I32 => Value::I32(i32::from_bytes(bytes)),
            ScalarKind::U64 => Value::U64(u64::from_bytes(bytes)),
            ScalarKind::I64 => Value::I64(i64::from_bytes(bytes)),
            ScalarKind::F32 => Value::F32(f32::from_bytes(bytes)),
            ScalarKind::F64 => Value::F64(f64::from_bytes(bytes)),
            ScalarKind::Pointer => Value::Pointer(usize::from_bytes(bytes)),
        }
    }
}

/// Rust primitives which can be stored in a [`Buffer`].
pub trait Scalar: Copy {
    const KIND: ScalarKind;

    /// Native-endian representation.
    fn to_bytes(self) -> Vec<u8>;

    /// Decodes a value from the first `KIND.size()` bytes of `bytes`.
    fn from_bytes(bytes: &[u8]) -> Self;
}

fn head<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut raw = [0; N];
    raw.copy_from_slice(&bytes[..N]);
    raw
}

macro_rules! impl_scalar {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl Scalar for $ty {
                const KIND: ScalarKind = ScalarKind::$kind;

                fn to_bytes(self) -> Vec<u8> {
                    self.to_ne_bytes().to_vec()
                }

                fn from_bytes(bytes: &[u8]) -> Self {
                    <$ty>::from_ne_bytes(head(bytes))
                }
            }
        )*
    };
}

impl_scalar!(
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    u64 => U64,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    usize => Pointer,
);

/// A decoded value.
///
/// Equality is by value: floats compare numerically and record padding is never looked at.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    Pointer(usize),
    Array(Vec<Value>),
    Record(Vec<(String, Value)>),
}

/// Layout of the bytes held by a [`Buffer`].
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Scalar(ScalarKind),
    /// `count` consecutive elements.
    Array(Box<Shape>, usize),
    Record(Record),
}

impl Shape {
    pub fn scalar<T: Scalar>() -> Shape {
        Shape::Scalar(T::KIND)
    }

    pub fn array(element: Shape, count: usize) -> Shape {
        Shape::Array(Box::new(element), count)
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        match self {
            Shape::Scalar(kind) => kind.size(),
            Shape::Array(element, count) => element.size() * count,
            Shape::Record(record) => record.size,
        }
    }

    /// Natural alignment, as a C compiler would lay the shape out.
    pub fn align(&self) -> usize {
        match self {
            Shape::Scalar(kind) => kind.size(),
            Shape::Array(element, _) => element.align(),
            Shape::Record(record) => record
                .fields
                .iter()
                .map(|field| field.shape.align())
                .max()
                .unwrap_or(1),
        }
    }

    /// Interprets `bytes` according to this shape. `bytes` must hold at least `self.size()` bytes.
    pub fn decode(&self, bytes: &[u8]) -> Value {
        match self {
            Shape::Scalar(kind) => kind.decode(bytes),
            Shape::Array(element, count) => {
                let stride = element.size();
                Value::Array(
                    (0..*count)
                        .map(|i| element.decode(&bytes[i * stride..]))
                        .collect(),
                )
            }
            Shape::Record(record) => Value::Record(
                record
                    .fields
                    .iter()
                    .map(|field| {
                        (
                            field.name.clone(),
                            field.shape.decode(&bytes[field.offset..]),
                        )
                    })
                    .collect(),
            ),
        }
    }
}

/// A named member of a [`Record`].
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub offset: usize,
    pub shape: Shape,
}

/// A structure of named fields. Bytes not covered by any field are padding.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    size: usize,
    fields: Vec<Field>,
}

impl Record {
    /// Builds a record with explicit field offsets.
    /// Fails if a field does not fit within `size` bytes.
    pub fn new(size: usize, fields: Vec<Field>) -> MemEditResult<Record> {
        for field in &fields {
            if field.offset + field.shape.size() > size {
                return Err(MemEditError::Shape(format!(
                    "field `{}` at offset {:#x} overflows a record of {} bytes",
                    field.name, field.offset, size
                )));
            }
        }
        Ok(Record { size, fields })
    }

    /// Lays out `fields` in order with C alignment rules, including trailing padding.
    pub fn c_layout<S: Into<String>>(fields: Vec<(S, Shape)>) -> Record {
        let mut offset = 0;
        let mut align = 1;
        let fields = fields
            .into_iter()
            .map(|(name, shape)| {
                let field_align = shape.align();
                align = align.max(field_align);
                offset = round_up(offset, field_align);
                let field = Field {
                    name: name.into(),
                    offset,
                    shape,
                };
                offset += field.shape.size();
                field
            })
            .collect();

        Record {
            size: round_up(offset, align),
            fields,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }
}

fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

/// A fixed-size block of bytes tagged with a [`Shape`].
///
/// The same buffer serves as a read destination, a write source and a search needle.
/// Its size never changes after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    shape: Shape,
    bytes: Box<[u8]>,
}

impl Buffer {
    /// A buffer of the given shape with every byte set to zero.
    pub fn zeroed(shape: Shape) -> Buffer {
        let bytes = vec![0; shape.size()].into_boxed_slice();
        Buffer { shape, bytes }
    }

    /// Wraps existing bytes; `bytes` must be exactly `shape.size()` long.
    pub fn from_bytes(shape: Shape, bytes: &[u8]) -> MemEditResult<Buffer> {
        if bytes.len() != shape.size() {
            return Err(MemEditError::Shape(format!(
                "expected {} bytes, got {}",
                shape.size(),
                bytes.len()
            )));
        }
        Ok(Buffer {
            shape,
            bytes: bytes.into(),
        })
    }

    pub fn from_value<T: Scalar>(value: T) -> Buffer {
        Buffer {
            shape: Shape::scalar::<T>(),
            bytes: value.to_bytes().into_boxed_slice(),
        }
    }

    pub fn from_array<T: Scalar>(values: &[T]) -> Buffer {
        Buffer {
            shape: Shape::array(Shape::scalar::<T>(), values.len()),
            bytes: values
                .iter()
                .flat_map(|value| value.to_bytes())
                .collect::<Vec<_>>()
                .into_boxed_slice(),
        }
    }

    /// A plain byte array.
    pub fn raw(bytes: &[u8]) -> Buffer {
        Buffer {
            shape: Shape::array(Shape::scalar::<u8>(), bytes.len()),
            bytes: bytes.into(),
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn value(&self) -> Value {
        self.shape.decode(&self.bytes)
    }

    /// Reads the buffer as a scalar of type `T`.
    pub fn get<T: Scalar>(&self) -> MemEditResult<T> {
        self.expect_scalar::<T>()?;
        Ok(T::from_bytes(&self.bytes))
    }

    /// Overwrites the buffer with a scalar of type `T`.
    pub fn set<T: Scalar>(&mut self, value: T) -> MemEditResult<()> {
        self.expect_scalar::<T>()?;
        self.bytes.copy_from_slice(&value.to_bytes());
        Ok(())
    }

    /// Compares decoded values rather than bytes, so differing padding is ignored.
    pub fn structurally_eq(&self, other: &Buffer) -> bool {
        self.shape == other.shape && self.value() == other.value()
    }

    fn expect_scalar<T: Scalar>(&self) -> MemEditResult<()> {
        if self.shape != Shape::Scalar(T::KIND) {
            return Err(MemEditError::Shape(format!(
                "buffer holds {:?}, not {:?}",
                self.shape,
                T::KIND
            )));
        }
        Ok(())
    }
}
