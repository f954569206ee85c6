/// Per-scan feature and visibility switches.
///
/// Everything defaults to off: by default only public classes are scanned
/// and only the class-level structure (name, superclass, interfaces) is
/// retained.
#[derive(Clone, Debug, Default)]
pub(crate) struct ScanConfig {
    /// Scan classes regardless of their visibility modifiers.
    pub(crate) ignore_class_visibility: bool,
    /// Record fields regardless of their visibility modifiers.
    pub(crate) ignore_field_visibility: bool,
    /// Record methods regardless of their visibility modifiers.
    pub(crate) ignore_method_visibility: bool,
    /// Record per-field metadata.
    pub(crate) enable_field_info: bool,
    /// Record per-method metadata.
    pub(crate) enable_method_info: bool,
    /// Decode class, field, method, and parameter annotations.
    pub(crate) enable_annotation_info: bool,
    /// Only decode `RuntimeVisible*` annotation attributes.
    pub(crate) disable_runtime_invisible_annotations: bool,
    /// Capture `ConstantValue` initializers of static final fields.
    pub(crate) enable_static_final_field_constant_initializer_values: bool,
    /// Collect the set of class names each classfile references.
    pub(crate) enable_inter_class_dependencies: bool,
    /// Follow superclass/interface/annotation references into classes outside
    /// the scanned elements and schedule them for scanning.
    pub(crate) extend_scanning_upwards_to_external_classes: bool,
}

#[cfg(test)]
impl ScanConfig {
    /// Every feature on, every visibility filter off.
    pub(crate) fn exhaustive() -> Self {
        Self {
            ignore_class_visibility: true,
            ignore_field_visibility: true,
            ignore_method_visibility: true,
            enable_field_info: true,
            enable_method_info: true,
            enable_annotation_info: true,
            disable_runtime_invisible_annotations: false,
            enable_static_final_field_constant_initializer_values: true,
            enable_inter_class_dependencies: true,
            extend_scanning_upwards_to_external_classes: true,
        }
    }
}
