use std::collections::BTreeSet;

use serde::Serialize;

use crate::annotations::{AnnotationInfo, AnnotationParamValue, AnnotationValue};

/// Structural metadata parsed out of one classfile. Owned exclusively by
/// the parser until handed to the linker, then consumed.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub(crate) struct ClassfileRecord {
    /// Fully qualified, dot-separated class name.
    pub(crate) class_name: String,
    pub(crate) modifiers: u16,
    pub(crate) is_interface: bool,
    pub(crate) is_annotation: bool,
    /// True when this class was only reached by extending scanning upwards.
    pub(crate) is_external: bool,
    pub(crate) superclass_name: Option<String>,
    pub(crate) implemented_interfaces: Vec<String>,
    pub(crate) class_annotations: Vec<AnnotationInfo>,
    /// Raw class type signature from the `Signature` attribute.
    pub(crate) type_signature: Option<String>,
    /// Fully qualified `Enclosing.method` name for local and anonymous
    /// classes.
    pub(crate) defining_method_name: Option<String>,
    pub(crate) class_containment: Vec<ContainmentEntry>,
    /// `AnnotationDefault` values, keyed by the declaring method name.
    pub(crate) annotation_default_values: Vec<AnnotationParamValue>,
    pub(crate) fields: Vec<FieldRecord>,
    pub(crate) methods: Vec<MethodRecord>,
    pub(crate) referenced_class_names: BTreeSet<String>,
}

/// An (inner, outer) containment edge contributed by an `InnerClasses` or
/// `EnclosingMethod` attribute.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct ContainmentEntry {
    pub(crate) inner: String,
    pub(crate) outer: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct FieldRecord {
    pub(crate) name: String,
    pub(crate) modifiers: u16,
    pub(crate) type_descriptor: String,
    pub(crate) type_signature: Option<String>,
    /// `ConstantValue` initializer, captured only for visible static final
    /// fields when requested.
    pub(crate) constant_value: Option<AnnotationValue>,
    pub(crate) annotations: Vec<AnnotationInfo>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct MethodRecord {
    pub(crate) name: String,
    pub(crate) modifiers: u16,
    pub(crate) type_descriptor: String,
    pub(crate) type_signature: Option<String>,
    /// From `MethodParameters`; an entry is `None` for unnamed parameters.
    pub(crate) parameter_names: Option<Vec<Option<String>>>,
    pub(crate) parameter_modifiers: Option<Vec<u16>>,
    /// Per-parameter annotation lists; inner lists may be empty.
    pub(crate) parameter_annotations: Option<Vec<Vec<AnnotationInfo>>>,
    pub(crate) annotations: Vec<AnnotationInfo>,
    /// True when the method carries a `Code` attribute.
    pub(crate) has_body: bool,
}
