//! Extraction of the in-memory VDSO image so it can be symbolized like a file

use super::{
    auxv::{self, AuxvError},
    module_reader::{ModuleMemory, ModuleReader},
};
use crate::{classify::VDSO_MODULE_NAME, errors::ModuleReaderError};
use std::{
    fs::File,
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VdsoError {
    #[error("the kernel did not map a VDSO")]
    NotMapped,
    #[error("failed to locate the VDSO")]
    Auxv(#[from] AuxvError),
    #[error("failed to open /proc/self/mem")]
    OpenMemory(#[source] std::io::Error),
    #[error("the VDSO image is malformed")]
    ModuleReader(#[from] ModuleReaderError),
    #[error("failed to write the VDSO image to {0}")]
    Write(PathBuf, #[source] std::io::Error),
}

/// This process's memory, addressed relative to `base`
struct SelfMemory {
    mem: File,
    base: u64,
}

impl ModuleMemory for &SelfMemory {
    type Memory = Vec<u8>;

    fn read_module_memory(&self, offset: u64, length: u64) -> std::io::Result<Self::Memory> {
        let mut buf = vec![0; length as usize];
        self.mem.read_exact_at(&mut buf, self.base + offset)?;
        Ok(buf)
    }
}

/// Writes the VDSO image to `<dir>/linux-gate.so` and returns the path
pub fn extract_vdso(dir: &Path) -> Result<PathBuf, VdsoError> {
    let base = auxv::linux_gate_address()?.ok_or(VdsoError::NotMapped)?;
    let memory = SelfMemory {
        mem: File::open("/proc/self/mem").map_err(VdsoError::OpenMemory)?,
        base: base as u64,
    };

    let reader = ModuleReader::new(&memory)?;
    let size = reader.image_size()?;
    let image = (&memory)
        .read_module_memory(0, size)
        .map_err(|error| ModuleReaderError::ReadModuleMemory {
            offset: 0,
            length: size,
            error,
        })?;

    let path = dir.join(VDSO_MODULE_NAME);
    std::fs::write(&path, &image).map_err(|e| VdsoError::Write(path.clone(), e))?;
    log::debug!("extracted {size} byte VDSO image to {}", path.display());
    Ok(path)
}
