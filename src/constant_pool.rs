use crate::reader::{ClassfileReader, FormatError};

pub(crate) const CONSTANT_UTF8: u8 = 1;
pub(crate) const CONSTANT_INTEGER: u8 = 3;
pub(crate) const CONSTANT_FLOAT: u8 = 4;
pub(crate) const CONSTANT_LONG: u8 = 5;
pub(crate) const CONSTANT_DOUBLE: u8 = 6;
pub(crate) const CONSTANT_CLASS: u8 = 7;
pub(crate) const CONSTANT_STRING: u8 = 8;
pub(crate) const CONSTANT_FIELD_REF: u8 = 9;
pub(crate) const CONSTANT_METHOD_REF: u8 = 10;
pub(crate) const CONSTANT_INTERFACE_METHOD_REF: u8 = 11;
pub(crate) const CONSTANT_NAME_AND_TYPE: u8 = 12;
pub(crate) const CONSTANT_METHOD_HANDLE: u8 = 15;
pub(crate) const CONSTANT_METHOD_TYPE: u8 = 16;
pub(crate) const CONSTANT_INVOKE_DYNAMIC: u8 = 18;
pub(crate) const CONSTANT_MODULE: u8 = 19;
pub(crate) const CONSTANT_PACKAGE: u8 = 20;

/// Sentinel for an indirection slot that was never written.
const UNSET: u32 = u32::MAX;

/// Parallel-array view of one classfile's constant pool.
///
/// Slot `i` maps to a tag, the byte offset of its payload, and for
/// Class/String/Module entries the `u16` index of the referenced UTF-8
/// entry; NameAndType entries pack `(name_index << 16) | type_index` into
/// the same cell. Slot 0 is reserved, and the slot after a Long or Double
/// is unusable (its tag is forced to 0).
///
/// The arrays are grown but never shrunk, so a pool instance can be reused
/// across many classfiles on the same worker without reallocating.
#[derive(Default)]
pub(crate) struct ConstantPool {
    tags: Vec<u8>,
    offsets: Vec<u32>,
    indirect: Vec<u32>,
    count: usize,
    class_name_indexes: Vec<u16>,
    type_descriptor_indexes: Vec<u16>,
}

impl ConstantPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Parse the constant pool at the reader's cursor. With
    /// `collect_dependencies` set, the UTF-8 indexes of every Class entry
    /// and the type half of every NameAndType entry are recorded for the
    /// reference collector.
    pub(crate) fn read(
        &mut self,
        reader: &mut ClassfileReader<'_>,
        collect_dependencies: bool,
    ) -> Result<(), FormatError> {
        let cp_count = reader.read_u16()? as usize;
        if self.tags.len() < cp_count {
            self.tags.resize(cp_count, 0);
            self.offsets.resize(cp_count, 0);
            self.indirect.resize(cp_count, UNSET);
        }
        self.count = cp_count;
        self.class_name_indexes.clear();
        self.type_descriptor_indexes.clear();
        self.indirect[..cp_count].fill(UNSET);
        if cp_count > 0 {
            self.tags[0] = 0;
        }

        let mut i = 1;
        while i < cp_count {
            let tag = reader.read_u8()?;
            self.tags[i] = tag;
            self.offsets[i] = reader.curr() as u32;
            match tag {
                0 => {
                    return Err(FormatError::new(
                        "constant pool tag 0 (possibly a truncated classfile)",
                    ));
                }
                CONSTANT_UTF8 => {
                    let len = reader.read_u16()? as usize;
                    reader.skip(len)?;
                }
                CONSTANT_INTEGER | CONSTANT_FLOAT => reader.skip(4)?,
                CONSTANT_LONG | CONSTANT_DOUBLE => {
                    reader.skip(8)?;
                    // 8-byte constants occupy two slots; the second one must
                    // never be dereferenced.
                    i += 1;
                    if i < cp_count {
                        self.tags[i] = 0;
                    }
                }
                CONSTANT_CLASS => {
                    let name_index = reader.read_u16()?;
                    self.indirect[i] = u32::from(name_index);
                    if collect_dependencies {
                        self.class_name_indexes.push(name_index);
                    }
                }
                CONSTANT_STRING => {
                    self.indirect[i] = u32::from(reader.read_u16()?);
                }
                CONSTANT_FIELD_REF
                | CONSTANT_METHOD_REF
                | CONSTANT_INTERFACE_METHOD_REF
                | CONSTANT_INVOKE_DYNAMIC => reader.skip(4)?,
                CONSTANT_NAME_AND_TYPE => {
                    let name_index = reader.read_u16()?;
                    let type_index = reader.read_u16()?;
                    self.indirect[i] = (u32::from(name_index) << 16) | u32::from(type_index);
                    if collect_dependencies {
                        self.type_descriptor_indexes.push(type_index);
                    }
                }
                CONSTANT_METHOD_HANDLE => reader.skip(3)?,
                CONSTANT_METHOD_TYPE | CONSTANT_PACKAGE => reader.skip(2)?,
                CONSTANT_MODULE => {
                    self.indirect[i] = u32::from(reader.read_u16()?);
                }
                other => {
                    return Err(FormatError::new(format!(
                        "unknown constant pool tag {other}"
                    )));
                }
            }
            i += 1;
        }
        Ok(())
    }

    pub(crate) fn tag(&self, idx: usize) -> Result<u8, FormatError> {
        if idx >= self.count {
            return Err(FormatError::new(format!(
                "constant pool index {idx} out of range (pool size {})",
                self.count
            )));
        }
        Ok(self.tags[idx])
    }

    pub(crate) fn entry_offset(&self, idx: usize) -> Result<u32, FormatError> {
        self.tag(idx)?;
        Ok(self.offsets[idx])
    }

    /// UTF-8 indexes recorded from Class entries, for dependency tracking.
    pub(crate) fn class_name_indexes(&self) -> &[u16] {
        &self.class_name_indexes
    }

    /// UTF-8 indexes of the type half of NameAndType entries.
    pub(crate) fn type_descriptor_indexes(&self) -> &[u16] {
        &self.type_descriptor_indexes
    }

    /// Resolve the buffer offset of the string behind constant pool slot
    /// `idx`, or 0 for a null string. `sub_field` must be 0 except for
    /// NameAndType entries, where 0 selects the name and 1 the type
    /// descriptor.
    fn string_offset(&self, idx: usize, sub_field: u8) -> Result<u32, FormatError> {
        let tag = self.tag(idx)?;
        if (tag != CONSTANT_NAME_AND_TYPE && sub_field != 0)
            || (tag == CONSTANT_NAME_AND_TYPE && sub_field > 1)
        {
            return Err(FormatError::new(format!(
                "bad sub-field index {sub_field} for constant pool tag {tag}"
            )));
        }
        let utf8_idx = match tag {
            // Unused slot; treat as a null string.
            0 => return Ok(0),
            CONSTANT_UTF8 => idx,
            CONSTANT_CLASS | CONSTANT_STRING | CONSTANT_MODULE => {
                let indirect = self.indirect[idx];
                if indirect == UNSET {
                    return Err(FormatError::new("bad string indirection index"));
                }
                if indirect == 0 {
                    return Ok(0);
                }
                indirect as usize
            }
            CONSTANT_NAME_AND_TYPE => {
                let packed = self.indirect[idx];
                if packed == UNSET {
                    return Err(FormatError::new("bad string indirection index"));
                }
                let indirect = if sub_field == 0 {
                    (packed >> 16) & 0xFFFF
                } else {
                    packed & 0xFFFF
                };
                if indirect == 0 {
                    return Err(FormatError::new("bad string indirection index"));
                }
                indirect as usize
            }
            other => {
                return Err(FormatError::new(format!(
                    "constant pool index {idx} has non-string tag {other}"
                )));
            }
        };
        if self.tag(utf8_idx)? != CONSTANT_UTF8 {
            return Err(FormatError::new(format!(
                "string indirection at constant pool index {idx} does not resolve to a UTF-8 entry"
            )));
        }
        Ok(self.offsets[utf8_idx])
    }

    fn string_with(
        &self,
        reader: &ClassfileReader<'_>,
        idx: usize,
        sub_field: u8,
        replace_slash_with_dot: bool,
        strip_l_semicolon: bool,
    ) -> Result<Option<String>, FormatError> {
        let offset = self.string_offset(idx, sub_field)?;
        if offset == 0 {
            return Ok(None);
        }
        reader
            .string_at(offset as usize, replace_slash_with_dot, strip_l_semicolon)
            .map(Some)
    }

    /// String behind slot `idx`, verbatim. `None` encodes a null string.
    pub(crate) fn string(
        &self,
        reader: &ClassfileReader<'_>,
        idx: usize,
    ) -> Result<Option<String>, FormatError> {
        self.string_with(reader, idx, 0, false, false)
    }

    /// Name (`sub_field` 0) or type descriptor (`sub_field` 1) of a
    /// NameAndType entry, verbatim.
    pub(crate) fn sub_string(
        &self,
        reader: &ClassfileReader<'_>,
        idx: usize,
        sub_field: u8,
    ) -> Result<Option<String>, FormatError> {
        self.string_with(reader, idx, sub_field, false, false)
    }

    /// String behind slot `idx` interpreted as a class name (`/` → `.`).
    pub(crate) fn class_name(
        &self,
        reader: &ClassfileReader<'_>,
        idx: usize,
    ) -> Result<Option<String>, FormatError> {
        self.string_with(reader, idx, 0, true, false)
    }

    /// String behind slot `idx` interpreted as a class descriptor
    /// (`Lcom/x/Y;` → `com.x.Y`).
    pub(crate) fn class_descriptor(
        &self,
        reader: &ClassfileReader<'_>,
        idx: usize,
    ) -> Result<Option<String>, FormatError> {
        self.string_with(reader, idx, 0, true, true)
    }

    /// First byte of the string behind slot `idx`, or 0 when the string is
    /// null or empty. Avoids decoding the whole string.
    pub(crate) fn first_string_byte(
        &self,
        reader: &ClassfileReader<'_>,
        idx: usize,
    ) -> Result<u8, FormatError> {
        let offset = self.string_offset(idx, 0)?;
        if offset == 0 {
            return Ok(0);
        }
        let len = reader.u16_at(offset as usize)?;
        if len == 0 {
            return Ok(0);
        }
        reader.byte_at(offset as usize + 2)
    }

    /// Compare the string behind slot `idx` with an ASCII literal without
    /// allocating. Attribute names are always ASCII, so a byte compare is
    /// exact.
    pub(crate) fn string_equals(
        &self,
        reader: &ClassfileReader<'_>,
        idx: usize,
        literal: &str,
    ) -> Result<bool, FormatError> {
        let offset = self.string_offset(idx, 0)?;
        if offset == 0 {
            return Ok(false);
        }
        let len = reader.u16_at(offset as usize)? as usize;
        if len != literal.len() {
            return Ok(false);
        }
        let bytes = reader.slice_at(offset as usize + 2, len)?;
        Ok(bytes == literal.as_bytes())
    }
}
