//! Binary encoding of the loaded-plugin inventory embedded into every dump
//!
//! All integers are native endian. The layout is:
//!
//! ```text
//! header:  magic u64 | version u32 | total size u32 | count u32
//! entry:   entry size u32 | handle (pointer width) | filename \0 | function count u32
//!          then per function: code offset u32 | name \0
//! tail:    magic u64
//! ```
//!
//! `total size` covers the header, every entry and the tail. Each `entry size` covers the whole
//! entry including its own size field. Post-mortem tooling locates the blob in the dump's
//! memory list by the header magic.

use crate::errors::BlobError;
use scroll::{NATIVE, Pread, Pwrite};

pub const HEADER_MAGIC: u64 = 103582791429521979;
pub const TAIL_MAGIC: u64 = 76561197987819599;
pub const VERSION: u32 = 1;

pub const HEADER_SIZE: usize = 8 + 4 + 4 + 4;
pub const TAIL_SIZE: usize = 8;
/// Bytes present in every blob regardless of how many plugins it describes
pub const FIXED_OVERHEAD: usize = HEADER_SIZE + TAIL_SIZE;

/// Smallest possible entry: empty filename and no functions
const MIN_ENTRY_SIZE: usize = 4 + size_of::<HandleRepr>() + 1 + 4;
const MIN_FUNCTION_SIZE: usize = 4 + 1;

#[cfg(target_pointer_width = "64")]
type HandleRepr = u64;
#[cfg(target_pointer_width = "32")]
type HandleRepr = u32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginFunction {
    pub code_offset: u32,
    pub name: String,
}

/// One loaded scripted plugin
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginRecord {
    /// Opaque runtime context handle, only ever printed post-mortem
    pub handle: usize,
    pub filename: String,
    pub functions: Vec<PluginFunction>,
}

impl PluginRecord {
    /// Bytes this record occupies in an encoded blob
    pub fn encoded_size(&self) -> usize {
        let functions: usize = self
            .functions
            .iter()
            .map(|f| 4 + c_str(&f.name).len() + 1)
            .sum();
        4 + size_of::<HandleRepr>() + c_str(&self.filename).len() + 1 + 4 + functions
    }
}

/// Encodes `records` into a fresh blob, or `None` when there is nothing to describe
pub fn encode<'a, I>(records: I) -> Result<Option<Box<[u8]>>, BlobError>
where
    I: IntoIterator<Item = &'a PluginRecord>,
    I::IntoIter: Clone,
{
    let records = records.into_iter();
    let count = records.clone().count();
    if count == 0 {
        return Ok(None);
    }

    let total = FIXED_OVERHEAD + records.clone().map(PluginRecord::encoded_size).sum::<usize>();
    let total_u32 = u32::try_from(total).map_err(|_| BlobError::EntryTooLarge("<blob>".into()))?;

    let mut buf = vec![0u8; total];
    let offset = &mut 0;
    buf.gwrite_with(HEADER_MAGIC, offset, NATIVE)?;
    buf.gwrite_with(VERSION, offset, NATIVE)?;
    buf.gwrite_with(total_u32, offset, NATIVE)?;
    buf.gwrite_with(count as u32, offset, NATIVE)?;

    for record in records {
        let size = u32::try_from(record.encoded_size())
            .map_err(|_| BlobError::EntryTooLarge(record.filename.clone()))?;
        let functions = u32::try_from(record.functions.len())
            .map_err(|_| BlobError::EntryTooLarge(record.filename.clone()))?;

        buf.gwrite_with(size, offset, NATIVE)?;
        buf.gwrite_with(record.handle as HandleRepr, offset, NATIVE)?;
        write_c_str(&mut buf, offset, &record.filename)?;
        buf.gwrite_with(functions, offset, NATIVE)?;
        for function in &record.functions {
            buf.gwrite_with(function.code_offset, offset, NATIVE)?;
            write_c_str(&mut buf, offset, &function.name)?;
        }
    }

    buf.gwrite_with(TAIL_MAGIC, offset, NATIVE)?;
    debug_assert_eq!(*offset, total);

    Ok(Some(buf.into_boxed_slice()))
}

/// Decodes a blob produced by [`encode`]
pub fn parse(bytes: &[u8]) -> Result<Vec<PluginRecord>, BlobError> {
    let offset = &mut 0;
    let magic: u64 = bytes.gread_with(offset, NATIVE)?;
    if magic != HEADER_MAGIC {
        return Err(BlobError::BadMagic(magic));
    }
    let version: u32 = bytes.gread_with(offset, NATIVE)?;
    if version != VERSION {
        return Err(BlobError::UnsupportedVersion(version));
    }
    let size: u32 = bytes.gread_with(offset, NATIVE)?;
    if size as usize != bytes.len() {
        return Err(BlobError::SizeMismatch {
            declared: size,
            actual: bytes.len(),
        });
    }
    let count: u32 = bytes.gread_with(offset, NATIVE)?;

    // Counts are untrusted, never reserve more than the remaining bytes could hold
    let remaining = |offset: usize| bytes.len().saturating_sub(offset);
    let mut records =
        Vec::with_capacity((count as usize).min(remaining(*offset) / MIN_ENTRY_SIZE));
    for _ in 0..count {
        let start = *offset;
        let entry_size: u32 = bytes.gread_with(offset, NATIVE)?;
        let handle: HandleRepr = bytes.gread_with(offset, NATIVE)?;
        let filename: &str = bytes.gread(offset)?;
        let function_count: u32 = bytes.gread_with(offset, NATIVE)?;

        let mut functions = Vec::with_capacity(
            (function_count as usize).min(remaining(*offset) / MIN_FUNCTION_SIZE),
        );
        for _ in 0..function_count {
            let code_offset: u32 = bytes.gread_with(offset, NATIVE)?;
            let name: &str = bytes.gread(offset)?;
            functions.push(PluginFunction {
                code_offset,
                name: name.to_owned(),
            });
        }

        if *offset - start != entry_size as usize {
            return Err(BlobError::SizeMismatch {
                declared: entry_size,
                actual: *offset - start,
            });
        }

        records.push(PluginRecord {
            handle: handle as usize,
            filename: filename.to_owned(),
            functions,
        });
    }

    let tail: u64 = bytes.gread_with(offset, NATIVE)?;
    if tail != TAIL_MAGIC {
        return Err(BlobError::BadTail(tail));
    }

    Ok(records)
}

/// Reads only the header, returning `(count, total size)`
pub fn read_header(bytes: &[u8]) -> Result<(u32, u32), BlobError> {
    let magic: u64 = bytes.pread_with(0, NATIVE)?;
    if magic != HEADER_MAGIC {
        return Err(BlobError::BadMagic(magic));
    }
    let size: u32 = bytes.pread_with(12, NATIVE)?;
    let count: u32 = bytes.pread_with(16, NATIVE)?;
    Ok((count, size))
}

// Names cannot carry interior nuls in a nul-terminated layout
fn c_str(s: &str) -> &str {
    s.find('\0').map_or(s, |idx| &s[..idx])
}

fn write_c_str(buf: &mut [u8], offset: &mut usize, s: &str) -> Result<(), BlobError> {
    buf.gwrite(c_str(s).as_bytes(), offset)?;
    buf.gwrite_with(0u8, offset, NATIVE)?;
    Ok(())
}
