use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::annotations::{AnnotationInfo, AnnotationParamValue};
use crate::classpath::ClasspathElement;
use crate::ir::{FieldRecord, MethodRecord};
use crate::scan::ParsedClassfile;

/// The linked class/package/module graph. Keyed by fully qualified name;
/// `BTreeMap`s keep report output deterministic.
///
/// Linking is single-writer: records are folded in one at a time after (or
/// between) parse phases, never concurrently with them.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub(crate) struct ClassGraph {
    pub(crate) classes: BTreeMap<String, ClassInfo>,
    pub(crate) packages: BTreeMap<String, PackageInfo>,
    pub(crate) modules: BTreeMap<String, ModuleInfo>,
}

/// Aggregated view of one class, merged from its own classfile and from
/// edges contributed by every classfile that references it.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub(crate) struct ClassInfo {
    pub(crate) name: String,
    pub(crate) modifiers: u16,
    pub(crate) is_interface: bool,
    pub(crate) is_annotation: bool,
    /// True until the class's own classfile arrives from a scan-target
    /// element; the demotion to false is monotonic.
    pub(crate) is_external: bool,
    pub(crate) superclass: Option<String>,
    pub(crate) subclasses: BTreeSet<String>,
    pub(crate) interfaces: Vec<String>,
    pub(crate) implementing_classes: BTreeSet<String>,
    pub(crate) annotations: Vec<AnnotationInfo>,
    /// Classes annotated with this class, when it is an annotation type.
    pub(crate) annotated_classes: BTreeSet<String>,
    pub(crate) inner_classes: BTreeSet<String>,
    pub(crate) outer_classes: BTreeSet<String>,
    pub(crate) defining_method_name: Option<String>,
    pub(crate) annotation_default_values: Vec<AnnotationParamValue>,
    pub(crate) fields: Vec<FieldRecord>,
    pub(crate) methods: Vec<MethodRecord>,
    pub(crate) type_signature: Option<String>,
    pub(crate) referenced_class_names: BTreeSet<String>,
}

impl ClassInfo {
    /// Placeholder for a class that has been referenced but not scanned.
    fn placeholder(name: &str) -> Self {
        Self {
            name: name.to_string(),
            is_external: true,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub(crate) struct PackageInfo {
    pub(crate) name: String,
    pub(crate) annotations: Vec<AnnotationInfo>,
    pub(crate) classes: BTreeSet<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub(crate) struct ModuleInfo {
    pub(crate) name: String,
    pub(crate) annotations: Vec<AnnotationInfo>,
    pub(crate) classes: BTreeSet<String>,
    pub(crate) packages: BTreeSet<String>,
}

impl ClassGraph {
    /// Fold one parsed record into the graph. Handles the three classfile
    /// shapes: module descriptors, package descriptors, and regular
    /// classes. Re-linking an identical record is a no-op.
    pub(crate) fn link(&mut self, record: crate::ir::ClassfileRecord, element: &ClasspathElement) {
        if record.class_name == "module-info" {
            if let Some(module_name) = element.module_name().filter(|name| !name.is_empty()) {
                let module = self
                    .modules
                    .entry(module_name.clone())
                    .or_insert_with(|| ModuleInfo {
                        name: module_name,
                        ..ModuleInfo::default()
                    });
                add_unique_annotations(&mut module.annotations, &record.class_annotations);
            }
            return;
        }

        if record.class_name == "package-info" || record.class_name.ends_with(".package-info") {
            let package_name = parent_package_name(&record.class_name).to_string();
            let package = get_or_create_package(&mut self.packages, &package_name);
            add_unique_annotations(&mut package.annotations, &record.class_annotations);
            return;
        }

        let name = record.class_name.clone();
        let superclass = record.superclass_name.clone();
        let interfaces = record.implemented_interfaces.clone();
        let annotation_names: Vec<String> = record
            .class_annotations
            .iter()
            .map(|annotation| annotation.class_name.clone())
            .collect();
        let containment = record.class_containment.clone();

        let info = self
            .classes
            .entry(name.clone())
            .or_insert_with(|| ClassInfo::placeholder(&name));
        // Once seen as non-external, a class stays non-external.
        info.is_external = info.is_external && record.is_external;
        info.modifiers = record.modifiers;
        info.is_interface = record.is_interface;
        info.is_annotation = record.is_annotation;
        info.superclass = record.superclass_name;
        info.interfaces = record.implemented_interfaces;
        info.annotations = record.class_annotations;
        info.defining_method_name = record.defining_method_name;
        info.annotation_default_values = record.annotation_default_values;
        info.fields = record.fields;
        info.methods = record.methods;
        info.type_signature = record.type_signature;
        info.referenced_class_names = record.referenced_class_names;

        // Wire up edges by name, creating placeholder ClassInfos for
        // referenced classes that have not been scanned (yet).
        if let Some(superclass) = &superclass {
            self.get_or_create_class(superclass)
                .subclasses
                .insert(name.clone());
        }
        for interface in &interfaces {
            self.get_or_create_class(interface)
                .implementing_classes
                .insert(name.clone());
        }
        for annotation in &annotation_names {
            self.get_or_create_class(annotation)
                .annotated_classes
                .insert(name.clone());
        }
        for entry in &containment {
            self.get_or_create_class(&entry.inner)
                .outer_classes
                .insert(entry.outer.clone());
            self.get_or_create_class(&entry.outer)
                .inner_classes
                .insert(entry.inner.clone());
        }

        let package_name = parent_package_name(&name).to_string();
        let package = get_or_create_package(&mut self.packages, &package_name);
        package.classes.insert(name.clone());

        if let Some(module_name) = element.module_name().filter(|name| !name.is_empty()) {
            let module = self
                .modules
                .entry(module_name.clone())
                .or_insert_with(|| ModuleInfo {
                    name: module_name,
                    ..ModuleInfo::default()
                });
            module.classes.insert(name);
            module.packages.insert(package_name);
        }
    }

    fn get_or_create_class(&mut self, name: &str) -> &mut ClassInfo {
        self.classes
            .entry(name.to_string())
            .or_insert_with(|| ClassInfo::placeholder(name))
    }
}

/// Link every parsed record into a fresh graph, single-threaded.
pub(crate) fn link_all(records: Vec<ParsedClassfile>, elements: &[ClasspathElement]) -> ClassGraph {
    let mut graph = ClassGraph::default();
    for parsed in records {
        graph.link(parsed.record, &elements[parsed.element]);
    }
    graph
}

fn get_or_create_package<'a>(
    packages: &'a mut BTreeMap<String, PackageInfo>,
    name: &str,
) -> &'a mut PackageInfo {
    packages.entry(name.to_string()).or_insert_with(|| PackageInfo {
        name: name.to_string(),
        ..PackageInfo::default()
    })
}

/// Append annotations not already present by class name, so repeated
/// linking stays idempotent.
fn add_unique_annotations(existing: &mut Vec<AnnotationInfo>, new: &[AnnotationInfo]) {
    for annotation in new {
        if !existing
            .iter()
            .any(|present| present.class_name == annotation.class_name)
        {
            existing.push(annotation.clone());
        }
    }
}

/// Everything before the last `.` of a class name, or the empty string for
/// the default package.
pub(crate) fn parent_package_name(class_name: &str) -> &str {
    class_name
        .rfind('.')
        .map(|split| &class_name[..split])
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ClassfileRecord, ContainmentEntry};

    fn dir_element() -> (tempfile::TempDir, ClasspathElement) {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let element = ClasspathElement::open(temp_dir.path()).expect("open dir");
        (temp_dir, element)
    }

    fn record(name: &str) -> ClassfileRecord {
        ClassfileRecord {
            class_name: name.to_string(),
            ..ClassfileRecord::default()
        }
    }

    #[test]
    fn scanned_class_creates_external_placeholder_for_superclass() {
        let (_dir, element) = dir_element();
        let mut graph = ClassGraph::default();
        let mut foo = record("Foo");
        foo.superclass_name = Some("java.lang.Object".to_string());
        graph.link(foo, &element);

        let foo = graph.classes.get("Foo").expect("Foo linked");
        assert!(!foo.is_external);
        assert_eq!(foo.superclass.as_deref(), Some("java.lang.Object"));

        let object = graph.classes.get("java.lang.Object").expect("placeholder");
        assert!(object.is_external);
        assert!(object.subclasses.contains("Foo"));
    }

    #[test]
    fn external_demotion_is_monotonic_and_idempotent() {
        let (_dir, element) = dir_element();
        let mut graph = ClassGraph::default();

        let mut external = record("lib.Base");
        external.is_external = true;
        graph.link(external.clone(), &element);
        assert!(graph.classes["lib.Base"].is_external);

        let mut scanned = external.clone();
        scanned.is_external = false;
        graph.link(scanned.clone(), &element);
        assert!(!graph.classes["lib.Base"].is_external);

        // A later external sighting must not flip the flag back.
        graph.link(external, &element);
        assert!(!graph.classes["lib.Base"].is_external);
    }

    #[test]
    fn relinking_the_same_record_is_a_no_op() {
        let (_dir, element) = dir_element();
        let mut graph = ClassGraph::default();
        let mut rec = record("com.example.Foo");
        rec.superclass_name = Some("com.example.Base".to_string());
        rec.implemented_interfaces = vec!["com.example.Iface".to_string()];
        rec.class_containment = vec![ContainmentEntry {
            inner: "com.example.Foo$Inner".to_string(),
            outer: "com.example.Foo".to_string(),
        }];

        graph.link(rec.clone(), &element);
        let once = graph.clone();
        graph.link(rec, &element);
        assert_eq!(graph, once);
    }

    #[test]
    fn containment_entries_wire_both_directions() {
        let (_dir, element) = dir_element();
        let mut graph = ClassGraph::default();
        let mut outer = record("Outer");
        outer.class_containment = vec![ContainmentEntry {
            inner: "Outer$Inner".to_string(),
            outer: "Outer".to_string(),
        }];
        graph.link(outer, &element);

        assert!(graph.classes["Outer"].inner_classes.contains("Outer$Inner"));
        assert!(graph.classes["Outer$Inner"].outer_classes.contains("Outer"));
    }

    #[test]
    fn classes_register_into_their_package() {
        let (_dir, element) = dir_element();
        let mut graph = ClassGraph::default();
        graph.link(record("com.example.Foo"), &element);

        let package = graph.packages.get("com.example").expect("package");
        assert!(package.classes.contains("com.example.Foo"));
    }

    #[test]
    fn package_info_attaches_annotations_to_parent_package() {
        let (_dir, element) = dir_element();
        let mut graph = ClassGraph::default();
        let mut descriptor = record("com.example.package-info");
        descriptor.class_annotations = vec![crate::annotations::AnnotationInfo {
            class_name: "com.example.PackageDoc".to_string(),
            param_values: Vec::new(),
        }];
        graph.link(descriptor.clone(), &element);
        // Repeat links must not duplicate the annotation.
        graph.link(descriptor, &element);

        let package = graph.packages.get("com.example").expect("package");
        assert_eq!(package.annotations.len(), 1);
        assert_eq!(package.annotations[0].class_name, "com.example.PackageDoc");
        assert!(!graph.classes.contains_key("com.example.package-info"));
    }

    #[test]
    fn module_info_links_into_module() {
        let (_dir, element) = dir_element();
        element.set_module_name("com.example.mod".to_string());
        let mut graph = ClassGraph::default();

        let mut descriptor = record("module-info");
        descriptor.class_annotations = vec![crate::annotations::AnnotationInfo {
            class_name: "java.lang.Deprecated".to_string(),
            param_values: Vec::new(),
        }];
        graph.link(descriptor, &element);
        graph.link(record("com.example.Foo"), &element);

        let module = graph.modules.get("com.example.mod").expect("module");
        assert_eq!(module.annotations.len(), 1);
        assert!(module.classes.contains("com.example.Foo"));
        assert!(module.packages.contains("com.example"));
    }

    #[test]
    fn module_info_without_module_name_links_nothing() {
        let (_dir, element) = dir_element();
        let mut graph = ClassGraph::default();
        graph.link(record("module-info"), &element);
        assert!(graph.modules.is_empty());
        assert!(graph.classes.is_empty());
    }

    #[test]
    fn default_package_classes_use_the_empty_package_name() {
        assert_eq!(parent_package_name("Foo"), "");
        assert_eq!(parent_package_name("com.example.Foo"), "com.example");
    }
}
