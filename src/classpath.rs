use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use memmap2::Mmap;
use parking_lot::{Mutex, RwLock};
use zip::ZipArchive;

/// One source of classfiles: a directory tree or a jar archive.
///
/// Elements are shared read-only across parse workers; the only mutable
/// slot is the module name, written when a worker sees a `Module` attribute
/// in this element's `module-info.class`.
pub(crate) struct ClasspathElement {
    kind: ElementKind,
    module_name: RwLock<Option<String>>,
}

enum ElementKind {
    Dir(PathBuf),
    Jar {
        path: PathBuf,
        entries: BTreeSet<String>,
        archive: Mutex<ZipArchive<BufReader<File>>>,
    },
}

/// Bytes of one classfile resource: either a private memory map of the
/// backing file or a view into the worker's recycled scratch buffer.
pub(crate) enum ResourceBytes<'a> {
    Mapped(Mmap),
    Buffered(&'a [u8]),
}

impl ResourceBytes<'_> {
    pub(crate) fn bytes(&self) -> &[u8] {
        match self {
            ResourceBytes::Mapped(map) => map,
            ResourceBytes::Buffered(bytes) => bytes,
        }
    }
}

impl ClasspathElement {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let kind = if path.is_dir() {
            ElementKind::Dir(path.to_path_buf())
        } else if is_jar_path(path) {
            let file =
                File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
            let archive = ZipArchive::new(BufReader::new(file))
                .with_context(|| format!("failed to read {}", path.display()))?;
            let entries = archive
                .file_names()
                .filter(|name| !name.ends_with('/'))
                .map(str::to_owned)
                .collect();
            ElementKind::Jar {
                path: path.to_path_buf(),
                entries,
                archive: Mutex::new(archive),
            }
        } else {
            anyhow::bail!(
                "unsupported classpath element {} (expected a directory or a jar file)",
                path.display()
            );
        };
        Ok(Self {
            kind,
            module_name: RwLock::new(None),
        })
    }

    pub(crate) fn describe(&self) -> String {
        match &self.kind {
            ElementKind::Dir(path) => path.display().to_string(),
            ElementKind::Jar { path, .. } => path.display().to_string(),
        }
    }

    /// True when this element can supply the classfile at `relative_path`
    /// (slash-separated, e.g. `com/example/Foo.class`).
    pub(crate) fn has_resource(&self, relative_path: &str) -> bool {
        match &self.kind {
            ElementKind::Dir(root) => root.join(relative_path).is_file(),
            ElementKind::Jar { entries, .. } => entries.contains(relative_path),
        }
    }

    /// Relative paths of every `.class` resource in this element, sorted
    /// for deterministic scan ordering.
    pub(crate) fn class_resources(&self) -> Result<Vec<String>> {
        match &self.kind {
            ElementKind::Dir(root) => {
                let mut paths = Vec::new();
                walk_dir(root, root, &mut paths)?;
                paths.sort();
                Ok(paths)
            }
            ElementKind::Jar { entries, .. } => Ok(entries
                .iter()
                .filter(|name| name.ends_with(".class"))
                .cloned()
                .collect()),
        }
    }

    /// Read the bytes of `relative_path`. Directory files are memory-mapped;
    /// jar entries inflate into `scratch`, which is reused across classfiles
    /// on the same worker.
    pub(crate) fn read_class<'a>(
        &self,
        relative_path: &str,
        scratch: &'a mut Vec<u8>,
    ) -> Result<ResourceBytes<'a>> {
        match &self.kind {
            ElementKind::Dir(root) => {
                let path = root.join(relative_path);
                let file = File::open(&path)
                    .with_context(|| format!("failed to open {}", path.display()))?;
                let len = file
                    .metadata()
                    .with_context(|| format!("failed to stat {}", path.display()))?
                    .len();
                if len == 0 {
                    scratch.clear();
                    return Ok(ResourceBytes::Buffered(&scratch[..]));
                }
                let map = unsafe { Mmap::map(&file) }
                    .with_context(|| format!("failed to mmap {}", path.display()))?;
                Ok(ResourceBytes::Mapped(map))
            }
            ElementKind::Jar { path, archive, .. } => {
                let mut archive = archive.lock();
                let mut entry = archive.by_name(relative_path).with_context(|| {
                    format!("failed to read {}:{relative_path}", path.display())
                })?;
                scratch.clear();
                entry.read_to_end(scratch).with_context(|| {
                    format!("failed to read {}:{relative_path}", path.display())
                })?;
                Ok(ResourceBytes::Buffered(&scratch[..]))
            }
        }
    }

    /// Module name recorded from this element's `module-info.class`.
    pub(crate) fn module_name(&self) -> Option<String> {
        self.module_name.read().clone()
    }

    pub(crate) fn set_module_name(&self, name: String) {
        *self.module_name.write() = Some(name);
    }
}

fn walk_dir(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to read directory {}", dir.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to read entry under {}", dir.display()))?;
        let path = entry.path();
        if path.is_dir() {
            walk_dir(root, &path, out)?;
        } else if path.extension().and_then(|ext| ext.to_str()) == Some("class") {
            let relative = path
                .strip_prefix(root)
                .with_context(|| format!("path {} escapes {}", path.display(), root.display()))?;
            out.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

fn is_jar_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("jar"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::{write_class, write_jar};

    #[test]
    fn directory_element_enumerates_and_reads() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        write_class(temp_dir.path(), "com/example/Foo.class", &[0xCA, 0xFE]);
        write_class(temp_dir.path(), "com/example/Bar.class", &[0xBA, 0xBE]);
        fs::write(temp_dir.path().join("notes.txt"), b"not a classfile").expect("write");

        let element = ClasspathElement::open(temp_dir.path()).expect("open dir");
        assert_eq!(
            element.class_resources().expect("enumerate"),
            vec![
                "com/example/Bar.class".to_string(),
                "com/example/Foo.class".to_string(),
            ]
        );
        assert!(element.has_resource("com/example/Foo.class"));
        assert!(!element.has_resource("com/example/Baz.class"));

        let mut scratch = Vec::new();
        let bytes = element
            .read_class("com/example/Foo.class", &mut scratch)
            .expect("read");
        assert_eq!(bytes.bytes(), &[0xCA, 0xFE]);
    }

    #[test]
    fn jar_element_enumerates_and_reads() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let jar_path = temp_dir.path().join("sample.jar");
        write_jar(
            &jar_path,
            &[
                ("com/example/Foo.class", vec![0xCA, 0xFE]),
                ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n".to_vec()),
            ],
        );

        let element = ClasspathElement::open(&jar_path).expect("open jar");
        assert_eq!(
            element.class_resources().expect("enumerate"),
            vec!["com/example/Foo.class".to_string()]
        );
        assert!(element.has_resource("com/example/Foo.class"));
        assert!(!element.has_resource("META-INF/Missing.class"));

        let mut scratch = Vec::new();
        let bytes = element
            .read_class("com/example/Foo.class", &mut scratch)
            .expect("read");
        assert_eq!(bytes.bytes(), &[0xCA, 0xFE]);
    }

    #[test]
    fn module_name_round_trips() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let element = ClasspathElement::open(temp_dir.path()).expect("open dir");
        assert_eq!(element.module_name(), None);
        element.set_module_name("com.example.mod".to_string());
        assert_eq!(element.module_name(), Some("com.example.mod".to_string()));
    }

    #[test]
    fn rejects_non_jar_files() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("file.zip");
        fs::write(&path, b"PK").expect("write");
        assert!(ClasspathElement::open(&path).is_err());
    }
}
