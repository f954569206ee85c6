use serde::Serialize;

use crate::constant_pool::{
    ConstantPool, CONSTANT_DOUBLE, CONSTANT_FLOAT, CONSTANT_INTEGER, CONSTANT_LONG,
};
use crate::reader::{ClassfileReader, FormatError};

/// One decoded annotation: the annotation class name (dot-separated, with
/// the `L...;` descriptor wrapping stripped) plus any explicit parameter
/// values.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct AnnotationInfo {
    pub(crate) class_name: String,
    pub(crate) param_values: Vec<AnnotationParamValue>,
}

/// A named annotation parameter value. Also used for `AnnotationDefault`
/// entries, keyed by the declaring method name.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct AnnotationParamValue {
    pub(crate) name: String,
    pub(crate) value: AnnotationValue,
}

/// Decoded `element_value` union from the annotation wire format. Field
/// `ConstantValue` initializers reuse the constant subset of this type.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) enum AnnotationValue {
    Byte(i8),
    /// Stored as the raw UTF-16 code unit; Java permits lone surrogates in
    /// char constants.
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Boolean(bool),
    String(String),
    EnumRef {
        class_name: String,
        const_name: String,
    },
    ClassRef {
        type_descriptor: String,
    },
    Annotation(Box<AnnotationInfo>),
    Array(Vec<AnnotationValue>),
}

/// Decode one `annotation` structure at the reader's cursor.
pub(crate) fn read_annotation(
    reader: &mut ClassfileReader<'_>,
    pool: &ConstantPool,
) -> Result<AnnotationInfo, FormatError> {
    let type_idx = reader.read_u16()? as usize;
    let class_name = pool
        .class_descriptor(reader, type_idx)?
        .ok_or_else(|| FormatError::new("annotation class descriptor is null"))?;
    let pair_count = reader.read_u16()?;
    let mut param_values = Vec::with_capacity(pair_count as usize);
    for _ in 0..pair_count {
        let name_idx = reader.read_u16()? as usize;
        let name = pool
            .string(reader, name_idx)?
            .ok_or_else(|| FormatError::new("annotation element name is null"))?;
        let value = read_element_value(reader, pool)?;
        param_values.push(AnnotationParamValue { name, value });
    }
    Ok(AnnotationInfo {
        class_name,
        param_values,
    })
}

/// Decode one `element_value` at the reader's cursor. Recurses for nested
/// annotations and arrays.
pub(crate) fn read_element_value(
    reader: &mut ClassfileReader<'_>,
    pool: &ConstantPool,
) -> Result<AnnotationValue, FormatError> {
    let tag = reader.read_u8()?;
    let value = match tag {
        b'B' => AnnotationValue::Byte(const_i32(reader, pool, CONSTANT_INTEGER)? as i8),
        b'C' => AnnotationValue::Char(const_i32(reader, pool, CONSTANT_INTEGER)? as u16),
        b'S' => AnnotationValue::Short(const_i32(reader, pool, CONSTANT_INTEGER)? as i16),
        b'I' => AnnotationValue::Int(const_i32(reader, pool, CONSTANT_INTEGER)?),
        b'Z' => AnnotationValue::Boolean(const_i32(reader, pool, CONSTANT_INTEGER)? != 0),
        b'J' => AnnotationValue::Long(const_i64(reader, pool, CONSTANT_LONG)?),
        b'F' => {
            AnnotationValue::Float(f32::from_bits(const_i32(reader, pool, CONSTANT_FLOAT)? as u32))
        }
        b'D' => {
            AnnotationValue::Double(f64::from_bits(const_i64(reader, pool, CONSTANT_DOUBLE)? as u64))
        }
        b's' => {
            let idx = reader.read_u16()? as usize;
            AnnotationValue::String(
                pool.string(reader, idx)?
                    .ok_or_else(|| FormatError::new("annotation string value is null"))?,
            )
        }
        b'e' => {
            let type_idx = reader.read_u16()? as usize;
            let class_name = pool
                .class_descriptor(reader, type_idx)?
                .ok_or_else(|| FormatError::new("enum value class descriptor is null"))?;
            let const_idx = reader.read_u16()? as usize;
            let const_name = pool
                .string(reader, const_idx)?
                .ok_or_else(|| FormatError::new("enum value constant name is null"))?;
            AnnotationValue::EnumRef {
                class_name,
                const_name,
            }
        }
        b'c' => {
            let idx = reader.read_u16()? as usize;
            AnnotationValue::ClassRef {
                type_descriptor: pool
                    .string(reader, idx)?
                    .ok_or_else(|| FormatError::new("class value descriptor is null"))?,
            }
        }
        b'@' => AnnotationValue::Annotation(Box::new(read_annotation(reader, pool)?)),
        b'[' => {
            let count = reader.read_u16()?;
            let mut values = Vec::with_capacity(count as usize);
            for _ in 0..count {
                values.push(read_element_value(reader, pool)?);
            }
            AnnotationValue::Array(values)
        }
        other => {
            return Err(FormatError::new(format!(
                "unknown annotation element value tag '{}'",
                other as char
            )));
        }
    };
    Ok(value)
}

/// Read a u2 constant pool index and the 4-byte constant it points at.
fn const_i32(
    reader: &mut ClassfileReader<'_>,
    pool: &ConstantPool,
    expected_tag: u8,
) -> Result<i32, FormatError> {
    let idx = reader.read_u16()? as usize;
    expect_tag(pool, idx, expected_tag)?;
    reader.i32_at(pool.entry_offset(idx)? as usize)
}

/// Read a u2 constant pool index and the 8-byte constant it points at.
fn const_i64(
    reader: &mut ClassfileReader<'_>,
    pool: &ConstantPool,
    expected_tag: u8,
) -> Result<i64, FormatError> {
    let idx = reader.read_u16()? as usize;
    expect_tag(pool, idx, expected_tag)?;
    reader.i64_at(pool.entry_offset(idx)? as usize)
}

fn expect_tag(pool: &ConstantPool, idx: usize, expected: u8) -> Result<(), FormatError> {
    let tag = pool.tag(idx)?;
    if tag != expected {
        return Err(FormatError::new(format!(
            "constant pool index {idx} has tag {tag}, expected {expected}"
        )));
    }
    Ok(())
}
