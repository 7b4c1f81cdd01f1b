//! Reading this process's auxiliary vector

use byteorder::{NativeEndian, ReadBytesExt};
use std::{
    fs::File,
    io::{BufReader, Read},
};
use thiserror::Error;

/// The type used in auxv keys and values.
#[cfg(target_pointer_width = "32")]
pub type AuxvType = u32;
/// The type used in auxv keys and values.
#[cfg(target_pointer_width = "64")]
pub type AuxvType = u64;

pub const AT_NULL: AuxvType = 0;
#[cfg(any(target_arch = "arm", all(target_os = "android", target_arch = "x86")))]
pub const AT_SYSINFO_EHDR: AuxvType = 33;
#[cfg(not(any(target_arch = "arm", all(target_os = "android", target_arch = "x86"))))]
pub const AT_SYSINFO_EHDR: AuxvType = libc::AT_SYSINFO_EHDR as AuxvType;

const AUXV_PATH: &str = "/proc/self/auxv";

/// An auxv key-value pair.
#[derive(Debug, PartialEq, Eq)]
pub struct AuxvPair {
    pub key: AuxvType,
    pub value: AuxvType,
}

#[derive(Debug, Error)]
pub enum AuxvError {
    #[error("Failed to open file {0}")]
    OpenError(String, #[source] std::io::Error),
    #[error("Invalid auxv format (should not hit EOF before AT_NULL)")]
    InvalidFormat,
    #[error("IO Error")]
    IOError(#[from] std::io::Error),
}

/// Iterates the native-endian key/value pairs of an auxv file up to `AT_NULL`
pub struct ProcfsAuxvIter<R> {
    reader: R,
    done: bool,
}

impl<R: Read> ProcfsAuxvIter<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            done: false,
        }
    }

    fn read_word(&mut self) -> Result<AuxvType, AuxvError> {
        #[cfg(target_pointer_width = "64")]
        let word = self.reader.read_u64::<NativeEndian>();
        #[cfg(target_pointer_width = "32")]
        let word = self.reader.read_u32::<NativeEndian>();

        word.map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => AuxvError::InvalidFormat,
            _ => e.into(),
        })
    }

    fn read_pair(&mut self) -> Result<AuxvPair, AuxvError> {
        let key = self.read_word()?;
        let value = self.read_word()?;
        Ok(AuxvPair { key, value })
    }
}

impl<R: Read> Iterator for ProcfsAuxvIter<R> {
    type Item = Result<AuxvPair, AuxvError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_pair() {
            Ok(pair) if pair.key == AT_NULL => {
                self.done = true;
                None
            }
            Ok(pair) => Some(Ok(pair)),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Address at which the kernel mapped the VDSO into this process, if it did
pub fn linux_gate_address() -> Result<Option<AuxvType>, AuxvError> {
    let file =
        File::open(AUXV_PATH).map_err(|e| AuxvError::OpenError(AUXV_PATH.to_owned(), e))?;
    for pair in ProcfsAuxvIter::new(BufReader::new(file)) {
        let pair = pair?;
        if pair.key == AT_SYSINFO_EHDR {
            return Ok((pair.value != 0).then_some(pair.value));
        }
    }
    Ok(None)
}
