//! Just enough ELF reading to symbolize a module: its extent, its `.gnu_debuglink` and its
//! build id

use crate::errors::ModuleReaderError as Error;
use goblin::{
    container::{Container, Ctx, Endian},
    elf,
};
use std::ffi::CStr;

const DEBUG_LINK_SECTION_NAME: &[u8] = b".gnu_debuglink\0";
const NOTE_SECTION_NAME: &[u8] = b".note.gnu.build-id\0";

/// Random access to the bytes of an ELF image
pub trait ModuleMemory {
    type Memory: std::ops::Deref<Target = [u8]>;

    fn read_module_memory(&self, offset: u64, length: u64) -> std::io::Result<Self::Memory>;
}

impl<'a> ModuleMemory for &'a [u8] {
    type Memory = Self;

    fn read_module_memory(&self, offset: u64, length: u64) -> std::io::Result<Self::Memory> {
        offset
            .checked_add(length)
            .and_then(|end| self.get(offset as usize..end as usize))
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("{} out of bounds", offset.saturating_add(length)),
                )
            })
    }
}

fn read<T: ModuleMemory>(mem: &T, offset: u64, length: u64) -> Result<T::Memory, Error> {
    mem.read_module_memory(offset, length)
        .map_err(|error| Error::ReadModuleMemory {
            offset,
            length,
            error,
        })
}

// `name` should be null-terminated
fn section_header_with_name<'a>(
    section_headers: &'a elf::SectionHeaders,
    strtab_index: usize,
    name: &[u8],
    module_memory: &impl ModuleMemory,
) -> Result<Option<&'a elf::SectionHeader>, Error> {
    let strtab_section_header = section_headers.get(strtab_index).ok_or(Error::NoStrTab)?;
    for header in section_headers {
        let sh_name = header.sh_name as u64;
        if sh_name >= strtab_section_header.sh_size {
            log::warn!("invalid sh_name offset");
            continue;
        }
        if sh_name + name.len() as u64 >= strtab_section_header.sh_size {
            // This can't be a match.
            continue;
        }
        let n = read(
            module_memory,
            strtab_section_header.sh_offset + sh_name,
            name.len() as u64,
        )?;
        if name == &*n {
            return Ok(Some(header));
        }
    }
    Ok(None)
}

pub struct ModuleReader<T> {
    module_memory: T,
    header: elf::Header,
    context: Ctx,
}

impl<T: ModuleMemory> ModuleReader<T> {
    pub fn new(module_memory: T) -> Result<Self, Error> {
        // A 64-bit header is the largest there is, so reading that much covers both classes
        let header_size = elf::Header::size(Ctx::new(Container::Big, Endian::default()));
        let header_data = read(&module_memory, 0, header_size as u64)?;
        let header = elf::Elf::parse_header(&header_data)?;
        let context = Ctx::new(header.container()?, header.endianness()?);
        Ok(ModuleReader {
            module_memory,
            header,
            context,
        })
    }

    /// The file name recorded in `.gnu_debuglink`
    pub fn debug_link(&self) -> Result<String, Error> {
        let section_headers = self.read_section_headers()?;
        let header = section_header_with_name(
            &section_headers,
            self.header.e_shstrndx as usize,
            DEBUG_LINK_SECTION_NAME,
            &self.module_memory,
        )?
        .ok_or(Error::NoDebugLink)?;

        let data = read(&self.module_memory, header.sh_offset, header.sh_size)?;
        CStr::from_bytes_until_nul(&data)
            .map(|name| name.to_string_lossy().into_owned())
            .map_err(|_| Error::DebugLinkNoNulByte)
    }

    /// The build id note, from the program headers or failing that the note section
    pub fn build_id(&self) -> Result<Vec<u8>, Error> {
        let program_headers = match self.build_id_from_program_headers() {
            Ok(v) => return Ok(v),
            Err(e) => Box::new(e),
        };
        let section = match self.build_id_from_section() {
            Ok(v) => return Ok(v),
            Err(e) => Box::new(e),
        };
        Err(Error::NoBuildId {
            program_headers,
            section,
        })
    }

    /// Number of bytes the image spans, i.e. the furthest end of any header table, segment or
    /// section with file contents
    pub fn image_size(&self) -> Result<u64, Error> {
        let mut end = self.header.e_phoff
            + self.header.e_phentsize as u64 * self.header.e_phnum as u64;
        end = end.max(self.header.e_shoff + self.header.e_shentsize as u64 * self.header.e_shnum as u64);

        for header in self.read_program_headers()? {
            end = end.max(header.p_offset + header.p_filesz);
        }
        if self.header.e_shoff != 0 {
            for header in self.read_section_headers()? {
                if header.sh_type != elf::section_header::SHT_NOBITS {
                    end = end.max(header.sh_offset + header.sh_size);
                }
            }
        }
        Ok(end)
    }

    fn build_id_from_program_headers(&self) -> Result<Vec<u8>, Error> {
        for header in self.read_program_headers()? {
            if header.p_type != elf::program_header::PT_NOTE {
                continue;
            }
            if let Ok(Some(result)) =
                self.find_build_id_note(header.p_offset, header.p_filesz, header.p_align)
            {
                return Ok(result);
            }
        }
        Err(Error::NoProgramHeaderNote)
    }

    fn build_id_from_section(&self) -> Result<Vec<u8>, Error> {
        let section_headers = self.read_section_headers()?;

        let header = section_header_with_name(
            &section_headers,
            self.header.e_shstrndx as usize,
            NOTE_SECTION_NAME,
            &self.module_memory,
        )?
        .ok_or(Error::NoSectionNote)?;

        match self.find_build_id_note(header.sh_offset, header.sh_size, header.sh_addralign) {
            Ok(Some(v)) => Ok(v),
            Ok(None) => Err(Error::NoSectionNote),
            Err(e) => Err(e),
        }
    }

    fn read_program_headers(&self) -> Result<Vec<elf::ProgramHeader>, Error> {
        if self.header.e_phoff == 0 {
            return Ok(Vec::new());
        }
        let program_headers_data = read(
            &self.module_memory,
            self.header.e_phoff,
            self.header.e_phentsize as u64 * self.header.e_phnum as u64,
        )?;
        Ok(elf::ProgramHeader::parse(
            &program_headers_data,
            0,
            self.header.e_phnum as usize,
            self.context,
        )?)
    }

    fn read_section_headers(&self) -> Result<elf::SectionHeaders, Error> {
        if self.header.e_shoff == 0 {
            return Err(Error::NoSections);
        }

        // `SectionHeader::parse` returns nothing for a 0 offset, so read one extra byte
        // preceding the table and parse from offset 1.
        let section_headers_data = read(
            &self.module_memory,
            self.header.e_shoff - 1,
            self.header.e_shentsize as u64 * self.header.e_shnum as u64 + 1,
        )?;
        let section_headers = elf::SectionHeader::parse(
            &section_headers_data,
            1,
            self.header.e_shnum as usize,
            self.context,
        )?;
        Ok(section_headers)
    }

    fn find_build_id_note(
        &self,
        offset: u64,
        size: u64,
        alignment: u64,
    ) -> Result<Option<Vec<u8>>, Error> {
        let notes = read(&self.module_memory, offset, size)?;
        for note in (elf::note::NoteDataIterator {
            data: &notes,
            // `size` is really an end offset, which equals the size for a 0 start
            size: size as usize,
            offset: 0,
            ctx: (alignment as usize, self.context),
        }) {
            let Ok(note) = note else { break };
            if note.name == "GNU" && note.n_type == elf::note::NT_GNU_BUILD_ID {
                return Ok(Some(note.desc.to_owned()));
            }
        }
        Ok(None)
    }
}
