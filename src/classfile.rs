use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::annotations::{
    read_annotation, read_element_value, AnnotationInfo, AnnotationParamValue, AnnotationValue,
};
use crate::classpath::ClasspathElement;
use crate::config::ScanConfig;
use crate::constant_pool::{
    ConstantPool, CONSTANT_CLASS, CONSTANT_DOUBLE, CONSTANT_FLOAT, CONSTANT_INTEGER, CONSTANT_LONG,
    CONSTANT_STRING, CONSTANT_UTF8,
};
use crate::ir::{ClassfileRecord, ContainmentEntry, FieldRecord, MethodRecord};
use crate::reader::{ClassfileReader, FormatError};
use crate::signature::{MethodTypeSignature, TypeSignature};

pub(crate) const ACC_PUBLIC: u16 = 0x0001;
pub(crate) const ACC_STATIC: u16 = 0x0008;
pub(crate) const ACC_FINAL: u16 = 0x0010;
pub(crate) const ACC_INTERFACE: u16 = 0x0200;
pub(crate) const ACC_ANNOTATION: u16 = 0x2000;
pub(crate) const ACC_MODULE: u16 = 0x8000;

/// Fatal format failure for a single classfile. Aborts that classfile only;
/// the scan continues.
#[derive(Debug, Error)]
#[error("{relative_path}: {message}")]
pub(crate) struct ClassfileError {
    pub(crate) relative_path: String,
    pub(crate) message: String,
}

/// Result of parsing one classfile: either a record or a deliberate skip.
#[derive(Debug, PartialEq)]
pub(crate) enum ParseOutcome {
    Parsed(Box<ClassfileRecord>),
    Skipped(SkipReason),
}

/// Why a classfile was deliberately left out of the scan.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum SkipReason {
    /// `java.lang.Object` has a null superclass and is never scanned
    /// directly; it stays reachable as an external class.
    JavaLangObject,
    NonPublic,
    PathMismatch {
        relative_path: String,
        class_name: String,
    },
    NotAClassfile,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::JavaLangObject => write!(f, "java.lang.Object is never scanned"),
            SkipReason::NonPublic => write!(f, "class is not public"),
            SkipReason::PathMismatch {
                relative_path,
                class_name,
            } => write!(
                f,
                "relative path {relative_path} does not match class name {class_name}"
            ),
            SkipReason::NotAClassfile => write!(f, "path does not end in .class"),
        }
    }
}

/// Classfile binary-format parser.
///
/// One instance per worker: the constant pool arrays inside are grown once
/// and reused across every classfile that worker parses.
pub(crate) struct ClassfileParser {
    pool: ConstantPool,
}

impl ClassfileParser {
    pub(crate) fn new() -> Self {
        Self {
            pool: ConstantPool::new(),
        }
    }

    /// Parse one classfile held in `data`. `relative_path` is the
    /// slash-separated resource path and must agree with the declared class
    /// name. The `Module` attribute writes through to `element`.
    pub(crate) fn parse(
        &mut self,
        data: &[u8],
        relative_path: &str,
        element: &ClasspathElement,
        config: &ScanConfig,
        is_external: bool,
    ) -> Result<ParseOutcome, ClassfileError> {
        self.parse_inner(data, relative_path, element, config, is_external)
            .map_err(|err| ClassfileError {
                relative_path: relative_path.to_string(),
                message: err.message().to_string(),
            })
    }

    fn parse_inner(
        &mut self,
        data: &[u8],
        relative_path: &str,
        element: &ClasspathElement,
        config: &ScanConfig,
        is_external: bool,
    ) -> Result<ParseOutcome, FormatError> {
        let mut reader = ClassfileReader::new(data);
        if reader.read_u32()? != 0xCAFE_BABE {
            return Err(FormatError::new("bad classfile magic number"));
        }
        reader.read_u16()?; // minor version
        reader.read_u16()?; // major version

        let deps = config.enable_inter_class_dependencies;
        self.pool.read(&mut reader, deps)?;
        let pool = &self.pool;
        let mut referenced = BTreeSet::new();
        if deps {
            collect_constant_pool_refs(&reader, pool, &mut referenced)?;
        }

        // Basic class info.
        let modifiers = reader.read_u16()?;
        let is_interface = modifiers & ACC_INTERFACE != 0;
        let is_annotation = modifiers & ACC_ANNOTATION != 0;
        let is_module = modifiers & ACC_MODULE != 0;
        let is_package = relative_path.rsplit('/').next() == Some("package-info.class");

        let class_name_idx = reader.read_u16()? as usize;
        let class_name_path = pool
            .string(&reader, class_name_idx)?
            .ok_or_else(|| FormatError::new("class name is null"))?;
        let class_name = class_name_path.replace('/', ".");
        if class_name == "java.lang.Object" {
            return Ok(ParseOutcome::Skipped(SkipReason::JavaLangObject));
        }
        if !config.ignore_class_visibility
            && modifiers & ACC_PUBLIC == 0
            && !is_module
            && !is_package
        {
            return Ok(ParseOutcome::Skipped(SkipReason::NonPublic));
        }
        if !relative_path.ends_with(".class") {
            return Ok(ParseOutcome::Skipped(SkipReason::NotAClassfile));
        }
        if relative_path != format!("{class_name_path}.class") {
            return Ok(ParseOutcome::Skipped(SkipReason::PathMismatch {
                relative_path: relative_path.to_string(),
                class_name: class_name.clone(),
            }));
        }

        let superclass_idx = reader.read_u16()? as usize;
        let superclass_name = if superclass_idx > 0 {
            pool.class_name(&reader, superclass_idx)?
        } else {
            None
        };

        // Interfaces.
        let interface_count = reader.read_u16()?;
        let mut implemented_interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            let idx = reader.read_u16()? as usize;
            if let Some(name) = pool.class_name(&reader, idx)? {
                implemented_interfaces.push(name);
            }
        }

        let fields = read_fields(&mut reader, pool, config, deps, &mut referenced)?;
        let mut annotation_default_values = Vec::new();
        let methods = read_methods(
            &mut reader,
            pool,
            config,
            is_annotation,
            deps,
            &mut referenced,
            &mut annotation_default_values,
        )?;
        let class_attributes = read_class_attributes(
            &mut reader,
            pool,
            config,
            element,
            &class_name,
            deps,
            &mut referenced,
        )?;

        let record = ClassfileRecord {
            class_name,
            modifiers,
            is_interface,
            is_annotation,
            is_external,
            superclass_name,
            implemented_interfaces,
            class_annotations: class_attributes.annotations,
            type_signature: class_attributes.type_signature,
            defining_method_name: class_attributes.defining_method_name,
            class_containment: class_attributes.containment,
            annotation_default_values,
            fields,
            methods,
            referenced_class_names: referenced,
        };
        debug!(
            class = %record.class_name,
            kind = if record.is_annotation {
                "annotation"
            } else if record.is_interface {
                "interface"
            } else {
                "class"
            },
            superclass = record.superclass_name.as_deref().unwrap_or(""),
            interfaces = record.implemented_interfaces.len(),
            "parsed classfile"
        );
        Ok(ParseOutcome::Parsed(Box::new(record)))
    }
}

/// Attribute predicate for `RuntimeVisibleAnnotations` /
/// `RuntimeInvisibleAnnotations` under the current configuration.
fn is_annotations_attribute(
    reader: &ClassfileReader<'_>,
    pool: &ConstantPool,
    config: &ScanConfig,
    name_idx: usize,
) -> Result<bool, FormatError> {
    Ok(config.enable_annotation_info
        && (pool.string_equals(reader, name_idx, "RuntimeVisibleAnnotations")?
            || (!config.disable_runtime_invisible_annotations
                && pool.string_equals(reader, name_idx, "RuntimeInvisibleAnnotations")?)))
}

fn is_parameter_annotations_attribute(
    reader: &ClassfileReader<'_>,
    pool: &ConstantPool,
    config: &ScanConfig,
    name_idx: usize,
) -> Result<bool, FormatError> {
    Ok(config.enable_annotation_info
        && (pool.string_equals(reader, name_idx, "RuntimeVisibleParameterAnnotations")?
            || (!config.disable_runtime_invisible_annotations
                && pool.string_equals(reader, name_idx, "RuntimeInvisibleParameterAnnotations")?)))
}

/// Skip `count` length-prefixed attributes, advancing by exactly the
/// declared length of each.
fn skip_attributes(reader: &mut ClassfileReader<'_>, count: u16) -> Result<(), FormatError> {
    for _ in 0..count {
        reader.read_u16()?; // attribute_name_index
        let length = reader.read_u32()? as usize;
        reader.skip(length)?;
    }
    Ok(())
}

fn read_fields(
    reader: &mut ClassfileReader<'_>,
    pool: &ConstantPool,
    config: &ScanConfig,
    deps: bool,
    referenced: &mut BTreeSet<String>,
) -> Result<Vec<FieldRecord>, FormatError> {
    let field_count = reader.read_u16()?;
    let mut fields = Vec::new();
    for _ in 0..field_count {
        let modifiers = reader.read_u16()?;
        let is_public = modifiers & ACC_PUBLIC != 0;
        let is_static_final =
            modifiers & (ACC_STATIC | ACC_FINAL) == (ACC_STATIC | ACC_FINAL);
        let visible = is_public || config.ignore_field_visibility;
        let capture_constant = config.enable_static_final_field_constant_initializer_values
            && is_static_final
            && visible;

        let name_idx = reader.read_u16()? as usize;
        let descriptor_idx = reader.read_u16()? as usize;
        if deps {
            if let Some(descriptor) = pool.string(reader, descriptor_idx)? {
                collect_descriptor_refs(&descriptor, referenced)?;
            }
        }
        let attributes_count = reader.read_u16()?;

        if !visible || (!config.enable_field_info && !capture_constant) {
            skip_attributes(reader, attributes_count)?;
            continue;
        }

        let name = pool
            .string(reader, name_idx)?
            .ok_or_else(|| FormatError::new("field name is null"))?;
        let descriptor_first_byte = pool.first_string_byte(reader, descriptor_idx)?;
        let type_descriptor = pool
            .string(reader, descriptor_idx)?
            .ok_or_else(|| FormatError::new("field type descriptor is null"))?;

        let mut constant_value = None;
        let mut type_signature = None;
        let mut annotations = Vec::new();
        for _ in 0..attributes_count {
            let attr_name_idx = reader.read_u16()? as usize;
            let attr_length = reader.read_u32()? as usize;
            if capture_constant && pool.string_equals(reader, attr_name_idx, "ConstantValue")? {
                let idx = reader.read_u16()? as usize;
                constant_value = Some(field_constant_value(
                    reader,
                    pool,
                    idx,
                    descriptor_first_byte,
                )?);
            } else if pool.string_equals(reader, attr_name_idx, "Signature")? {
                let idx = reader.read_u16()? as usize;
                type_signature = pool.string(reader, idx)?;
            } else if is_annotations_attribute(reader, pool, config, attr_name_idx)? {
                let count = reader.read_u16()?;
                for _ in 0..count {
                    let annotation = read_annotation(reader, pool)?;
                    if deps {
                        referenced.insert(annotation.class_name.clone());
                    }
                    annotations.push(annotation);
                }
            } else {
                reader.skip(attr_length)?;
            }
        }

        if config.enable_field_info || constant_value.is_some() {
            fields.push(FieldRecord {
                name,
                modifiers,
                type_descriptor,
                type_signature,
                constant_value,
                annotations,
            });
        }
    }
    Ok(fields)
}

fn read_methods(
    reader: &mut ClassfileReader<'_>,
    pool: &ConstantPool,
    config: &ScanConfig,
    is_annotation: bool,
    deps: bool,
    referenced: &mut BTreeSet<String>,
    annotation_default_values: &mut Vec<AnnotationParamValue>,
) -> Result<Vec<MethodRecord>, FormatError> {
    // Annotations keep their element defaults in method_info, so method
    // parsing is always on for annotation classes.
    let enable_method_info = config.enable_method_info || is_annotation;
    let method_count = reader.read_u16()?;
    let mut methods = Vec::new();
    for _ in 0..method_count {
        let modifiers = reader.read_u16()?;
        let is_public = modifiers & ACC_PUBLIC != 0;
        let visible = is_public || config.ignore_method_visibility;

        let name_idx = reader.read_u16()? as usize;
        let descriptor_idx = reader.read_u16()? as usize;
        if deps {
            if let Some(descriptor) = pool.string(reader, descriptor_idx)? {
                collect_descriptor_refs(&descriptor, referenced)?;
            }
        }
        let attributes_count = reader.read_u16()?;

        if !visible || !enable_method_info {
            skip_attributes(reader, attributes_count)?;
            continue;
        }

        let name = pool
            .string(reader, name_idx)?
            .ok_or_else(|| FormatError::new("method name is null"))?;
        let type_descriptor = pool
            .string(reader, descriptor_idx)?
            .ok_or_else(|| FormatError::new("method type descriptor is null"))?;

        let mut type_signature = None;
        let mut parameter_names = None;
        let mut parameter_modifiers = None;
        let mut parameter_annotations = None;
        let mut annotations = Vec::new();
        let mut has_body = false;
        for _ in 0..attributes_count {
            let attr_name_idx = reader.read_u16()? as usize;
            let attr_length = reader.read_u32()? as usize;
            if is_annotations_attribute(reader, pool, config, attr_name_idx)? {
                let count = reader.read_u16()?;
                for _ in 0..count {
                    let annotation = read_annotation(reader, pool)?;
                    if deps {
                        referenced.insert(annotation.class_name.clone());
                    }
                    annotations.push(annotation);
                }
            } else if is_parameter_annotations_attribute(reader, pool, config, attr_name_idx)? {
                let parameter_count = reader.read_u8()? as usize;
                let mut matrix = Vec::with_capacity(parameter_count);
                for _ in 0..parameter_count {
                    let count = reader.read_u16()?;
                    let mut list = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        let annotation = read_annotation(reader, pool)?;
                        if deps {
                            referenced.insert(annotation.class_name.clone());
                        }
                        list.push(annotation);
                    }
                    matrix.push(list);
                }
                parameter_annotations = Some(matrix);
            } else if pool.string_equals(reader, attr_name_idx, "MethodParameters")? {
                let parameter_count = reader.read_u8()? as usize;
                let mut names = Vec::with_capacity(parameter_count);
                let mut mods = Vec::with_capacity(parameter_count);
                for _ in 0..parameter_count {
                    let idx = reader.read_u16()? as usize;
                    // Index 0 marks an unnamed parameter.
                    names.push(if idx == 0 {
                        None
                    } else {
                        pool.string(reader, idx)?
                    });
                    mods.push(reader.read_u16()?);
                }
                parameter_names = Some(names);
                parameter_modifiers = Some(mods);
            } else if pool.string_equals(reader, attr_name_idx, "Signature")? {
                let idx = reader.read_u16()? as usize;
                type_signature = pool.string(reader, idx)?;
            } else if pool.string_equals(reader, attr_name_idx, "AnnotationDefault")? {
                annotation_default_values.push(AnnotationParamValue {
                    name: name.clone(),
                    value: read_element_value(reader, pool)?,
                });
            } else if pool.string_equals(reader, attr_name_idx, "Code")? {
                has_body = true;
                reader.skip(attr_length)?;
            } else {
                reader.skip(attr_length)?;
            }
        }

        methods.push(MethodRecord {
            name,
            modifiers,
            type_descriptor,
            type_signature,
            parameter_names,
            parameter_modifiers,
            parameter_annotations,
            annotations,
            has_body,
        });
    }
    Ok(methods)
}

struct ClassAttributes {
    annotations: Vec<AnnotationInfo>,
    type_signature: Option<String>,
    containment: Vec<ContainmentEntry>,
    defining_method_name: Option<String>,
}

fn read_class_attributes(
    reader: &mut ClassfileReader<'_>,
    pool: &ConstantPool,
    config: &ScanConfig,
    element: &ClasspathElement,
    class_name: &str,
    deps: bool,
    referenced: &mut BTreeSet<String>,
) -> Result<ClassAttributes, FormatError> {
    let mut annotations = Vec::new();
    let mut type_signature = None;
    let mut containment = Vec::new();
    let mut defining_method_name = None;

    let attributes_count = reader.read_u16()?;
    for _ in 0..attributes_count {
        let attr_name_idx = reader.read_u16()? as usize;
        let attr_length = reader.read_u32()? as usize;
        if is_annotations_attribute(reader, pool, config, attr_name_idx)? {
            let count = reader.read_u16()?;
            for _ in 0..count {
                let annotation = read_annotation(reader, pool)?;
                if deps {
                    referenced.insert(annotation.class_name.clone());
                }
                annotations.push(annotation);
            }
        } else if pool.string_equals(reader, attr_name_idx, "InnerClasses")? {
            let count = reader.read_u16()?;
            for _ in 0..count {
                let inner_idx = reader.read_u16()? as usize;
                let outer_idx = reader.read_u16()? as usize;
                if inner_idx != 0 && outer_idx != 0 {
                    let inner = pool.class_name(reader, inner_idx)?;
                    let outer = pool.class_name(reader, outer_idx)?;
                    if let (Some(inner), Some(outer)) = (inner, outer) {
                        containment.push(ContainmentEntry { inner, outer });
                    }
                }
                reader.skip(2)?; // inner_name_index
                reader.skip(2)?; // inner_class_access_flags
            }
        } else if pool.string_equals(reader, attr_name_idx, "Signature")? {
            let idx = reader.read_u16()? as usize;
            type_signature = pool.string(reader, idx)?;
        } else if pool.string_equals(reader, attr_name_idx, "EnclosingMethod")? {
            let enclosing_idx = reader.read_u16()? as usize;
            let method_idx = reader.read_u16()? as usize;
            let enclosing_class = pool
                .class_name(reader, enclosing_idx)?
                .ok_or_else(|| FormatError::new("enclosing class name is null"))?;
            // Method index 0 marks anonymous classes declared in class
            // initializer code.
            let method_name = if method_idx == 0 {
                "<clinit>".to_string()
            } else {
                pool.sub_string(reader, method_idx, 0)?
                    .ok_or_else(|| FormatError::new("enclosing method name is null"))?
            };
            containment.push(ContainmentEntry {
                inner: class_name.to_string(),
                outer: enclosing_class.clone(),
            });
            defining_method_name = Some(format!("{enclosing_class}.{method_name}"));
        } else if pool.string_equals(reader, attr_name_idx, "Module")? {
            let module_name_idx = reader.read_u16()? as usize;
            let module_name = pool.string(reader, module_name_idx)?.unwrap_or_default();
            element.set_module_name(module_name);
            // Only the module name is extracted; the rest of the module
            // descriptor is skipped.
            let rest = attr_length.checked_sub(2).ok_or_else(|| {
                FormatError::new("Module attribute shorter than its name index")
            })?;
            reader.skip(rest)?;
        } else {
            reader.skip(attr_length)?;
        }
    }

    Ok(ClassAttributes {
        annotations,
        type_signature,
        containment,
        defining_method_name,
    })
}

/// Decode a `ConstantValue` for a field whose type descriptor starts with
/// `descriptor_first_byte`.
fn field_constant_value(
    reader: &ClassfileReader<'_>,
    pool: &ConstantPool,
    idx: usize,
    descriptor_first_byte: u8,
) -> Result<AnnotationValue, FormatError> {
    let tag = pool.tag(idx)?;
    let offset = pool.entry_offset(idx)? as usize;
    let value = match tag {
        CONSTANT_UTF8 | CONSTANT_CLASS | CONSTANT_STRING => AnnotationValue::String(
            pool.string(reader, idx)?
                .ok_or_else(|| FormatError::new("string constant initializer is null"))?,
        ),
        CONSTANT_INTEGER => {
            let raw = reader.i32_at(offset)?;
            match descriptor_first_byte {
                b'I' => AnnotationValue::Int(raw),
                b'S' => AnnotationValue::Short(raw as i16),
                b'C' => AnnotationValue::Char(raw as u16),
                b'B' => AnnotationValue::Byte(raw as i8),
                b'Z' => AnnotationValue::Boolean(raw != 0),
                other => {
                    return Err(FormatError::new(format!(
                        "integer constant initializer for field descriptor starting with '{}'",
                        other as char
                    )));
                }
            }
        }
        CONSTANT_FLOAT => AnnotationValue::Float(f32::from_bits(reader.i32_at(offset)? as u32)),
        CONSTANT_LONG => AnnotationValue::Long(reader.i64_at(offset)?),
        CONSTANT_DOUBLE => AnnotationValue::Double(f64::from_bits(reader.i64_at(offset)? as u64)),
        other => {
            return Err(FormatError::new(format!(
                "unexpected constant pool tag {other} for a constant initializer"
            )));
        }
    };
    Ok(value)
}

/// Resolve the class references and NameAndType type descriptors recorded
/// during constant pool parsing into referenced class names.
fn collect_constant_pool_refs(
    reader: &ClassfileReader<'_>,
    pool: &ConstantPool,
    referenced: &mut BTreeSet<String>,
) -> Result<(), FormatError> {
    for &idx in pool.class_name_indexes() {
        if let Some(name) = pool.class_name(reader, idx as usize)? {
            if name.starts_with('[') {
                // Array class references are type signatures, e.g.
                // "[Ljava.lang.String;" after slash replacement.
                let signature = TypeSignature::parse(&name.replace('.', "/")).map_err(|err| {
                    FormatError::new(format!("could not parse class name {name:?}: {err}"))
                })?;
                signature.find_referenced_class_names(referenced);
            } else {
                referenced.insert(name);
            }
        }
    }
    for &idx in pool.type_descriptor_indexes() {
        if let Some(descriptor) = pool.string(reader, idx as usize)? {
            collect_descriptor_refs(&descriptor, referenced)?;
        }
    }
    Ok(())
}

/// Classify a descriptor as a method or field type signature and collect
/// the class names inside it. Failures on constant-pool descriptors are
/// fatal for the classfile.
fn collect_descriptor_refs(
    descriptor: &str,
    referenced: &mut BTreeSet<String>,
) -> Result<(), FormatError> {
    if descriptor.contains('(') || descriptor == "<init>" {
        MethodTypeSignature::parse(descriptor)
            .map_err(|err| {
                FormatError::new(format!("could not parse type signature {descriptor:?}: {err}"))
            })?
            .find_referenced_class_names(referenced);
    } else {
        TypeSignature::parse(descriptor)
            .map_err(|err| {
                FormatError::new(format!("could not parse type signature {descriptor:?}: {err}"))
            })?
            .find_referenced_class_names(referenced);
    }
    Ok(())
}
