//! Test-only builder for synthetic classfiles. Emits the classfile binary
//! layout directly (magic, constant pool, members, attributes) so parser
//! tests run without a JDK on the machine.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use zip::write::SimpleFileOptions;

/// Writer-side constant pool. Indexes are handed out in insertion order;
/// UTF-8 entries are deduplicated.
pub(crate) struct ConstPoolBuilder {
    entries: Vec<Vec<u8>>,
    next_index: u16,
    utf8_cache: HashMap<String, u16>,
}

impl ConstPoolBuilder {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_index: 1,
            utf8_cache: HashMap::new(),
        }
    }

    fn push(&mut self, entry: Vec<u8>, extra_slot: bool) -> u16 {
        let index = self.next_index;
        self.entries.push(entry);
        self.next_index += if extra_slot { 2 } else { 1 };
        index
    }

    pub(crate) fn utf8(&mut self, value: &str) -> u16 {
        if let Some(&index) = self.utf8_cache.get(value) {
            return index;
        }
        let encoded = cesu8::to_java_cesu8(value);
        let mut entry = vec![1];
        entry.extend_from_slice(&(encoded.len() as u16).to_be_bytes());
        entry.extend_from_slice(&encoded);
        let index = self.push(entry, false);
        self.utf8_cache.insert(value.to_string(), index);
        index
    }

    pub(crate) fn class(&mut self, internal_name: &str) -> u16 {
        let name_index = self.utf8(internal_name);
        let mut entry = vec![7];
        entry.extend_from_slice(&name_index.to_be_bytes());
        self.push(entry, false)
    }

    pub(crate) fn integer(&mut self, value: i32) -> u16 {
        let mut entry = vec![3];
        entry.extend_from_slice(&value.to_be_bytes());
        self.push(entry, false)
    }

    pub(crate) fn float(&mut self, value: f32) -> u16 {
        let mut entry = vec![4];
        entry.extend_from_slice(&value.to_bits().to_be_bytes());
        self.push(entry, false)
    }

    pub(crate) fn long(&mut self, value: i64) -> u16 {
        let mut entry = vec![5];
        entry.extend_from_slice(&value.to_be_bytes());
        self.push(entry, true)
    }

    pub(crate) fn double(&mut self, value: f64) -> u16 {
        let mut entry = vec![6];
        entry.extend_from_slice(&value.to_bits().to_be_bytes());
        self.push(entry, true)
    }

    pub(crate) fn string(&mut self, value: &str) -> u16 {
        let utf8_index = self.utf8(value);
        let mut entry = vec![8];
        entry.extend_from_slice(&utf8_index.to_be_bytes());
        self.push(entry, false)
    }

    pub(crate) fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        let mut entry = vec![12];
        entry.extend_from_slice(&name_index.to_be_bytes());
        entry.extend_from_slice(&descriptor_index.to_be_bytes());
        self.push(entry, false)
    }

    pub(crate) fn module(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        let mut entry = vec![19];
        entry.extend_from_slice(&name_index.to_be_bytes());
        self.push(entry, false)
    }

    fn count(&self) -> u16 {
        self.next_index
    }

    fn encode(&self, out: &mut Vec<u8>) {
        for entry in &self.entries {
            out.extend_from_slice(entry);
        }
    }
}

/// Builder for one synthetic classfile.
pub(crate) struct ClassfileBuilder {
    pub(crate) cp: ConstPoolBuilder,
    access: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<Vec<u8>>,
    methods: Vec<Vec<u8>>,
    attributes: Vec<Vec<u8>>,
}

impl ClassfileBuilder {
    /// New class with the given internal name (slash-separated), extending
    /// `java/lang/Object`.
    pub(crate) fn new(internal_name: &str, access: u16) -> Self {
        let mut cp = ConstPoolBuilder::new();
        let this_class = cp.class(internal_name);
        let super_class = cp.class("java/lang/Object");
        Self {
            cp,
            access,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        }
    }

    pub(crate) fn with_superclass(mut self, internal_name: &str) -> Self {
        self.super_class = self.cp.class(internal_name);
        self
    }

    /// Superclass index 0, as in `java/lang/Object` itself.
    pub(crate) fn without_superclass(mut self) -> Self {
        self.super_class = 0;
        self
    }

    pub(crate) fn implements(&mut self, internal_name: &str) {
        let index = self.cp.class(internal_name);
        self.interfaces.push(index);
    }

    pub(crate) fn class_attribute(&mut self, name: &str, payload: Vec<u8>) {
        let encoded = self.encode_attribute(name, payload);
        self.attributes.push(encoded);
    }

    pub(crate) fn field(&mut self, access: u16, name: &str, descriptor: &str, attributes: Vec<(String, Vec<u8>)>) {
        let member = self.encode_member(access, name, descriptor, attributes);
        self.fields.push(member);
    }

    pub(crate) fn method(
        &mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        attributes: Vec<(String, Vec<u8>)>,
    ) {
        let member = self.encode_member(access, name, descriptor, attributes);
        self.methods.push(member);
    }

    fn encode_member(
        &mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        attributes: Vec<(String, Vec<u8>)>,
    ) -> Vec<u8> {
        let name_index = self.cp.utf8(name);
        let descriptor_index = self.cp.utf8(descriptor);
        let mut out = Vec::new();
        put_u16(&mut out, access);
        put_u16(&mut out, name_index);
        put_u16(&mut out, descriptor_index);
        put_u16(&mut out, attributes.len() as u16);
        for (attr_name, payload) in attributes {
            let encoded = self.encode_attribute(&attr_name, payload);
            out.extend_from_slice(&encoded);
        }
        out
    }

    fn encode_attribute(&mut self, name: &str, payload: Vec<u8>) -> Vec<u8> {
        let name_index = self.cp.utf8(name);
        let mut out = Vec::new();
        put_u16(&mut out, name_index);
        put_u32(&mut out, payload.len() as u32);
        out.extend_from_slice(&payload);
        out
    }

    /// Encode one `annotation` structure for use inside annotation
    /// attributes and element values.
    pub(crate) fn annotation(
        &mut self,
        type_descriptor: &str,
        pairs: &[(&str, Vec<u8>)],
    ) -> Vec<u8> {
        let type_index = self.cp.utf8(type_descriptor);
        let mut out = Vec::new();
        put_u16(&mut out, type_index);
        put_u16(&mut out, pairs.len() as u16);
        for (name, value) in pairs {
            let name_index = self.cp.utf8(name);
            put_u16(&mut out, name_index);
            out.extend_from_slice(value);
        }
        out
    }

    /// `RuntimeVisibleAnnotations`-shaped payload: u2 count + annotations.
    pub(crate) fn annotations_payload(annotations: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        put_u16(&mut out, annotations.len() as u16);
        for annotation in annotations {
            out.extend_from_slice(annotation);
        }
        out
    }

    /// `RuntimeVisibleParameterAnnotations`-shaped payload.
    pub(crate) fn parameter_annotations_payload(parameters: &[Vec<Vec<u8>>]) -> Vec<u8> {
        let mut out = vec![parameters.len() as u8];
        for annotations in parameters {
            put_u16(&mut out, annotations.len() as u16);
            for annotation in annotations {
                out.extend_from_slice(annotation);
            }
        }
        out
    }

    pub(crate) fn ev_int(&mut self, value: i32) -> Vec<u8> {
        let index = self.cp.integer(value);
        element_value(b'I', index)
    }

    pub(crate) fn ev_byte(&mut self, value: i8) -> Vec<u8> {
        let index = self.cp.integer(i32::from(value));
        element_value(b'B', index)
    }

    pub(crate) fn ev_char(&mut self, value: u16) -> Vec<u8> {
        let index = self.cp.integer(i32::from(value));
        element_value(b'C', index)
    }

    pub(crate) fn ev_short(&mut self, value: i16) -> Vec<u8> {
        let index = self.cp.integer(i32::from(value));
        element_value(b'S', index)
    }

    pub(crate) fn ev_float(&mut self, value: f32) -> Vec<u8> {
        let index = self.cp.float(value);
        element_value(b'F', index)
    }

    pub(crate) fn ev_boolean(&mut self, value: bool) -> Vec<u8> {
        let index = self.cp.integer(i32::from(value));
        element_value(b'Z', index)
    }

    pub(crate) fn ev_long(&mut self, value: i64) -> Vec<u8> {
        let index = self.cp.long(value);
        element_value(b'J', index)
    }

    pub(crate) fn ev_double(&mut self, value: f64) -> Vec<u8> {
        let index = self.cp.double(value);
        element_value(b'D', index)
    }

    pub(crate) fn ev_string(&mut self, value: &str) -> Vec<u8> {
        let index = self.cp.utf8(value);
        element_value(b's', index)
    }

    pub(crate) fn ev_enum(&mut self, type_descriptor: &str, const_name: &str) -> Vec<u8> {
        let type_index = self.cp.utf8(type_descriptor);
        let const_index = self.cp.utf8(const_name);
        let mut out = vec![b'e'];
        put_u16(&mut out, type_index);
        put_u16(&mut out, const_index);
        out
    }

    pub(crate) fn ev_class(&mut self, type_descriptor: &str) -> Vec<u8> {
        let index = self.cp.utf8(type_descriptor);
        element_value(b'c', index)
    }

    pub(crate) fn ev_annotation(annotation: Vec<u8>) -> Vec<u8> {
        let mut out = vec![b'@'];
        out.extend_from_slice(&annotation);
        out
    }

    pub(crate) fn ev_array(values: &[Vec<u8>]) -> Vec<u8> {
        let mut out = vec![b'['];
        put_u16(&mut out, values.len() as u16);
        for value in values {
            out.extend_from_slice(value);
        }
        out
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let mut out = vec![0xCA, 0xFE, 0xBA, 0xBE];
        put_u16(&mut out, 0); // minor version
        put_u16(&mut out, 52); // major version (Java 8)
        put_u16(&mut out, self.cp.count());
        self.cp.encode(&mut out);
        put_u16(&mut out, self.access);
        put_u16(&mut out, self.this_class);
        put_u16(&mut out, self.super_class);
        put_u16(&mut out, self.interfaces.len() as u16);
        for &interface in &self.interfaces {
            put_u16(&mut out, interface);
        }
        put_u16(&mut out, self.fields.len() as u16);
        for field in &self.fields {
            out.extend_from_slice(field);
        }
        put_u16(&mut out, self.methods.len() as u16);
        for method in &self.methods {
            out.extend_from_slice(method);
        }
        put_u16(&mut out, self.attributes.len() as u16);
        for attribute in &self.attributes {
            out.extend_from_slice(attribute);
        }
        out
    }
}

fn element_value(tag: u8, index: u16) -> Vec<u8> {
    let mut out = vec![tag];
    put_u16(&mut out, index);
    out
}

pub(crate) fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write a classfile under `dir`, creating parent directories.
pub(crate) fn write_class(dir: &Path, relative_path: &str, bytes: &[u8]) {
    let path = dir.join(relative_path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create classfile parent dir");
    }
    fs::write(&path, bytes).expect("write classfile");
}

/// Write a jar with the given entries.
pub(crate) fn write_jar(path: &Path, entries: &[(&str, Vec<u8>)]) {
    let file = fs::File::create(path).expect("create jar");
    let mut writer = zip::ZipWriter::new(file);
    for (name, bytes) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("start jar entry");
        writer.write_all(bytes).expect("write jar entry");
    }
    writer.finish().expect("finish jar");
}
