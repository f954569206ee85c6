use cesu8::from_java_cesu8;
use thiserror::Error;

/// Raised when a classfile's bytes do not conform to the JVM classfile
/// format. Carries the diagnostic message only; the parser attaches the
/// relative path when it surfaces the error.
#[derive(Debug, Error)]
#[error("{0}")]
pub(crate) struct FormatError(String);

impl FormatError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub(crate) fn message(&self) -> &str {
        &self.0
    }
}

/// Big-endian cursor over the raw bytes of one classfile.
///
/// Sequential reads advance the cursor; the `*_at` reads are positional and
/// do not. The buffer is borrowed for the duration of a single parse so the
/// backing storage can be recycled across classfiles on the same worker.
pub(crate) struct ClassfileReader<'a> {
    data: &'a [u8],
    curr: usize,
}

impl<'a> ClassfileReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, curr: 0 }
    }

    /// Current cursor position.
    pub(crate) fn curr(&self) -> usize {
        self.curr
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        let end = self
            .curr
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                FormatError::new(format!("unexpected end of classfile at offset {}", self.curr))
            })?;
        let slice = &self.data[self.curr..end];
        self.curr = end;
        Ok(slice)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, FormatError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, FormatError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    #[allow(dead_code)]
    pub(crate) fn read_u64(&mut self) -> Result<u64, FormatError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(raw))
    }

    pub(crate) fn skip(&mut self, n: usize) -> Result<(), FormatError> {
        self.take(n).map(|_| ())
    }

    pub(crate) fn slice_at(&self, offset: usize, n: usize) -> Result<&'a [u8], FormatError> {
        offset
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .map(|end| &self.data[offset..end])
            .ok_or_else(|| {
                FormatError::new(format!("unexpected end of classfile at offset {offset}"))
            })
    }

    pub(crate) fn byte_at(&self, offset: usize) -> Result<u8, FormatError> {
        Ok(self.slice_at(offset, 1)?[0])
    }

    pub(crate) fn u16_at(&self, offset: usize) -> Result<u16, FormatError> {
        let bytes = self.slice_at(offset, 2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn i32_at(&self, offset: usize) -> Result<i32, FormatError> {
        let bytes = self.slice_at(offset, 4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn i64_at(&self, offset: usize) -> Result<i64, FormatError> {
        let bytes = self.slice_at(offset, 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(i64::from_be_bytes(raw))
    }

    /// Read a length-prefixed modified-UTF-8 string at `offset` (two-byte
    /// big-endian length followed by that many bytes), optionally replacing
    /// `/` with `.` and/or stripping a leading `L` and trailing `;`.
    pub(crate) fn string_at(
        &self,
        offset: usize,
        replace_slash_with_dot: bool,
        strip_l_semicolon: bool,
    ) -> Result<String, FormatError> {
        let len = self.u16_at(offset)? as usize;
        let bytes = self.slice_at(offset + 2, len)?;
        let decoded = from_java_cesu8(bytes).map_err(|_| {
            FormatError::new(format!("malformed modified UTF-8 string at offset {offset}"))
        })?;
        let mut string = if strip_l_semicolon {
            decoded
                .strip_prefix('L')
                .and_then(|rest| rest.strip_suffix(';'))
                .map(str::to_owned)
                .ok_or_else(|| {
                    FormatError::new(format!(
                        "expected a class descriptor of the form L...;, got {decoded:?}"
                    ))
                })?
        } else {
            decoded.into_owned()
        };
        if replace_slash_with_dot {
            string = string.replace('/', ".");
        }
        Ok(string)
    }
}
