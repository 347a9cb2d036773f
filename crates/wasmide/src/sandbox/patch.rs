//! Import section rewriting
//!
//! Retargets import module names inside a compiled WebAssembly binary.
//! Everything else in a module refers to its imports by index, so renaming
//! an import only changes the name's own length prefix and the size prefix
//! of the import section. No other byte of the module moves relative to the
//! section it lives in.

use std::ops::Range;

use thiserror::Error;
use tracing::{debug, instrument};

const MAGIC: &[u8; 4] = b"\0asm";
const VERSION: &[u8; 4] = &[0x01, 0x00, 0x00, 0x00];
const HEADER_LEN: usize = 8;
const IMPORT_SECTION_ID: u8 = 2;

/// Errors raised for structurally corrupt modules
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("not a WebAssembly module: bad header")]
    BadHeader,

    #[error("module truncated at byte {offset}")]
    Truncated { offset: usize },

    #[error("malformed integer at byte {offset}")]
    BadInteger { offset: usize },

    #[error("unknown import kind 0x{tag:02x} at byte {offset}")]
    UnknownImportKind { tag: u8, offset: usize },

    #[error("unknown value type 0x{tag:02x} at byte {offset}")]
    UnknownValueType { tag: u8, offset: usize },

    #[error("invalid flags 0x{flags:02x} at byte {offset}")]
    BadFlags { flags: u8, offset: usize },

    #[error("import name at byte {offset} is not valid UTF-8")]
    BadName { offset: usize },

    #[error("import section length does not match its contents")]
    SectionLength,

    #[error("replacement name is too long")]
    NameTooLong,
}

/// Kind of an imported item, selected by the descriptor tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    Func,
    Table,
    Memory,
    Global,
    Tag,
}

impl ImportKind {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x00 => Some(ImportKind::Func),
            0x01 => Some(ImportKind::Table),
            0x02 => Some(ImportKind::Memory),
            0x03 => Some(ImportKind::Global),
            0x04 => Some(ImportKind::Tag),
            _ => None,
        }
    }
}

/// A decoded import section entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportEntry {
    /// Position in the import section
    pub index: usize,
    pub module: String,
    pub field: String,
    pub kind: ImportKind,
}

/// Retarget every import from module `old` to module `new`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSpec {
    pub old: String,
    pub new: String,
}

impl PatchSpec {
    pub fn new(old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            old: old.into(),
            new: new.into(),
        }
    }

    /// Apply this patch to a module, returning the patched bytes
    pub fn apply(&self, module: &[u8]) -> Result<Vec<u8>, PatchError> {
        replace_symbol(module, &self.old, &self.new)
    }
}

/// Replace the module name of every import whose module is `old` with `new`.
///
/// Returns the module unchanged when it has no import section or no import
/// from `old`. Import module names are not interned in the binary format, so
/// all matching entries are rewritten in one pass before returning.
#[instrument(skip(module), fields(len = module.len()))]
pub fn replace_symbol(module: &[u8], old: &str, new: &str) -> Result<Vec<u8>, PatchError> {
    check_header(module)?;

    let Some(section) = find_import_section(module)? else {
        return Ok(module.to_vec());
    };
    let imports = read_imports(module, &section)?;

    let matches: Vec<&Name<'_>> = imports
        .iter()
        .map(|import| &import.module)
        .filter(|name| name.text == old)
        .collect();
    if matches.is_empty() {
        return Ok(module.to_vec());
    }

    let new_len = u32::try_from(new.len()).map_err(|_| PatchError::NameTooLong)?;

    let mut payload = Vec::with_capacity(section.payload.len() + matches.len() * new.len());
    let mut cursor = section.payload.start;
    for name in &matches {
        payload.extend_from_slice(&module[cursor..name.start]);
        write_var_u32(&mut payload, new_len);
        payload.extend_from_slice(new.as_bytes());
        cursor = name.end;
    }
    payload.extend_from_slice(&module[cursor..section.payload.end]);

    let payload_len = u32::try_from(payload.len()).map_err(|_| PatchError::NameTooLong)?;

    let mut patched = Vec::with_capacity(module.len() + payload.len() - section.payload.len() + 5);
    patched.extend_from_slice(&module[..section.start]);
    patched.push(IMPORT_SECTION_ID);
    write_var_u32(&mut patched, payload_len);
    patched.extend_from_slice(&payload);
    patched.extend_from_slice(&module[section.payload.end..]);

    debug!(
        replaced = matches.len(),
        old_len = module.len(),
        new_len = patched.len(),
        "patched import module names"
    );

    Ok(patched)
}

/// Decode the import section of a module
pub fn scan_imports(module: &[u8]) -> Result<Vec<ImportEntry>, PatchError> {
    check_header(module)?;

    let Some(section) = find_import_section(module)? else {
        return Ok(Vec::new());
    };

    Ok(read_imports(module, &section)?
        .into_iter()
        .enumerate()
        .map(|(index, import)| ImportEntry {
            index,
            module: import.module.text.to_owned(),
            field: import.field.text.to_owned(),
            kind: import.kind,
        })
        .collect())
}

/// Byte range of a section: `start` is its id byte
struct Section {
    start: usize,
    payload: Range<usize>,
}

/// A name string and the byte range covering its length prefix and text
struct Name<'a> {
    start: usize,
    end: usize,
    text: &'a str,
}

struct RawImport<'a> {
    module: Name<'a>,
    field: Name<'a>,
    kind: ImportKind,
}

fn check_header(module: &[u8]) -> Result<(), PatchError> {
    if module.len() < HEADER_LEN || &module[..4] != MAGIC || &module[4..HEADER_LEN] != VERSION {
        return Err(PatchError::BadHeader);
    }
    Ok(())
}

fn find_import_section(module: &[u8]) -> Result<Option<Section>, PatchError> {
    let mut reader = Reader::new(module, HEADER_LEN);

    while !reader.is_empty() {
        let start = reader.position();
        let id = reader.read_u8()?;
        let size = reader.read_var_u32()? as usize;
        let payload_start = reader.position();
        let payload_end = payload_start
            .checked_add(size)
            .filter(|&end| end <= module.len())
            .ok_or(PatchError::Truncated {
                offset: module.len(),
            })?;

        if id == IMPORT_SECTION_ID {
            return Ok(Some(Section {
                start,
                payload: payload_start..payload_end,
            }));
        }
        reader.skip_to(payload_end);
    }

    Ok(None)
}

fn read_imports<'a>(module: &'a [u8], section: &Section) -> Result<Vec<RawImport<'a>>, PatchError> {
    let mut reader = Reader::new(&module[..section.payload.end], section.payload.start);

    let count = reader.read_var_u32()?;
    let mut imports = Vec::new();
    for _ in 0..count {
        let module = reader.read_name()?;
        let field = reader.read_name()?;
        let kind = skip_descriptor(&mut reader)?;
        imports.push(RawImport {
            module,
            field,
            kind,
        });
    }

    if !reader.is_empty() {
        return Err(PatchError::SectionLength);
    }
    Ok(imports)
}

fn skip_descriptor(reader: &mut Reader<'_>) -> Result<ImportKind, PatchError> {
    let offset = reader.position();
    let tag = reader.read_u8()?;
    let kind = ImportKind::from_tag(tag).ok_or(PatchError::UnknownImportKind { tag, offset })?;

    match kind {
        ImportKind::Func => {
            reader.read_var_u32()?;
        }
        ImportKind::Table => {
            skip_ref_type(reader)?;
            skip_limits(reader)?;
        }
        ImportKind::Memory => skip_limits(reader)?,
        ImportKind::Global => {
            skip_value_type(reader)?;
            let offset = reader.position();
            let flags = reader.read_u8()?;
            if flags > 0x01 {
                return Err(PatchError::BadFlags { flags, offset });
            }
        }
        ImportKind::Tag => {
            let offset = reader.position();
            let flags = reader.read_u8()?;
            if flags != 0x00 {
                return Err(PatchError::BadFlags { flags, offset });
            }
            reader.read_var_u32()?;
        }
    }

    Ok(kind)
}

fn skip_value_type(reader: &mut Reader<'_>) -> Result<(), PatchError> {
    let offset = reader.position();
    match reader.read_u8()? {
        // i32, i64, f32, f64, v128
        0x7B..=0x7F => Ok(()),
        tag => skip_heap_reference(reader, tag, offset),
    }
}

fn skip_ref_type(reader: &mut Reader<'_>) -> Result<(), PatchError> {
    let offset = reader.position();
    let tag = reader.read_u8()?;
    skip_heap_reference(reader, tag, offset)
}

fn skip_heap_reference(reader: &mut Reader<'_>, tag: u8, offset: usize) -> Result<(), PatchError> {
    match tag {
        // shorthands such as funcref and externref
        0x68..=0x75 => Ok(()),
        // (ref null ht) and (ref ht)
        0x63 | 0x64 => reader.skip_var_s33(),
        _ => Err(PatchError::UnknownValueType { tag, offset }),
    }
}

fn skip_limits(reader: &mut Reader<'_>) -> Result<(), PatchError> {
    const HAS_MAX: u8 = 0x01;
    const IS_64: u8 = 0x04;
    const PAGE_SIZE: u8 = 0x08;

    let offset = reader.position();
    let flags = reader.read_u8()?;
    if flags & !0x0F != 0 {
        return Err(PatchError::BadFlags { flags, offset });
    }

    let bits = if flags & IS_64 != 0 { 64 } else { 32 };
    reader.read_var(bits)?;
    if flags & HAS_MAX != 0 {
        reader.read_var(bits)?;
    }
    if flags & PAGE_SIZE != 0 {
        reader.read_var_u32()?;
    }
    Ok(())
}

fn write_var_u32(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Forward-only cursor over module bytes. Positions are absolute offsets
/// into the module.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn skip_to(&mut self, pos: usize) {
        self.pos = pos;
    }

    fn read_u8(&mut self) -> Result<u8, PatchError> {
        let byte = *self.bytes.get(self.pos).ok_or(PatchError::Truncated {
            offset: self.bytes.len(),
        })?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], PatchError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(PatchError::Truncated {
                offset: self.bytes.len(),
            })?;
        let bytes = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Unsigned LEB128 holding at most `bits` bits
    fn read_var(&mut self, bits: u32) -> Result<u64, PatchError> {
        let offset = self.pos;
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            let low = u64::from(byte & 0x7F);
            if shift >= bits || (bits - shift < 7 && low >> (bits - shift) != 0) {
                return Err(PatchError::BadInteger { offset });
            }
            result |= low << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    fn read_var_u32(&mut self) -> Result<u32, PatchError> {
        // read_var(32) never yields more than 32 bits
        Ok(self.read_var(32)? as u32)
    }

    fn skip_var_s33(&mut self) -> Result<(), PatchError> {
        let offset = self.pos;
        for _ in 0..5 {
            if self.read_u8()? & 0x80 == 0 {
                return Ok(());
            }
        }
        Err(PatchError::BadInteger { offset })
    }

    fn read_name(&mut self) -> Result<Name<'a>, PatchError> {
        let start = self.pos;
        let len = self.read_var_u32()? as usize;
        let text_start = self.pos;
        let bytes = self.read_bytes(len)?;
        let text = std::str::from_utf8(bytes).map_err(|_| PatchError::BadName {
            offset: text_start,
        })?;
        Ok(Name {
            start,
            end: self.pos,
            text,
        })
    }
}
