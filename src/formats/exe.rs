//! Executable headers: DOS MZ with an optional PE header, and ELF

use crate::{
    error::{Error, Result},
    info::{Field, Info},
    source::{ByteSource, ByteSourceExt},
};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use tracing::trace;

const DOS_HEADER_SIZE: usize = 64;

/// PE headers further than this from the start are not looked at
const MAX_PE_OFFSET: usize = 8180;

/// Bytes read after the PE signature, enough for the data directories
const PE_HEADER_READ: usize = 300;

const PE32_MAGIC: u16 = 0x10b;
const PE32_PLUS_MAGIC: u16 = 0x20b;
const MACHINE_I386: u16 = 0x14c;
const MACHINE_AMD64: u16 = 0x8664;

/// Index of IMAGE_DIRECTORY_ENTRY_COM_DESCRIPTOR (the CLR header)
const COM_DESCRIPTOR_ENTRY: u32 = 14;

fn u16_at(data: &[u8], ofs: usize) -> Option<u16> {
    data.get(ofs..ofs + 2).map(LittleEndian::read_u16)
}

fn u32_at(data: &[u8], ofs: usize) -> Option<u32> {
    data.get(ofs..ofs + 4).map(LittleEndian::read_u32)
}

/// Refines an MZ executable to `winexe` (PE for i386 or amd64) or
/// `dotnetexe` (PE with a CLR header)
pub fn analyze_exe(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let mut header = src.read_exact_vec(DOS_HEADER_SIZE, "exe header")?;
    if !header.starts_with(b"MZ") {
        return Err(Error::bad("exe signature not found"));
    }
    info.set_format("exe");
    let pe_ofs = LittleEndian::read_u32(&header[60..64]) as usize;
    if pe_ofs >= MAX_PE_OFFSET {
        return Ok(());
    }
    if header.len() < pe_ofs + PE_HEADER_READ {
        let more = src.read_vec(pe_ofs + PE_HEADER_READ - header.len())?;
        header.extend_from_slice(&more);
    }

    if header.get(pe_ofs..pe_ofs + 4) != Some(b"PE\0\0".as_slice()) {
        return Ok(());
    }
    let magic = u16_at(&header, pe_ofs + 24);
    let arch = match u16_at(&header, pe_ofs + 4) {
        Some(MACHINE_I386) => "i386",
        Some(MACHINE_AMD64) => "amd64",
        _ => return Ok(()),
    };
    if !matches!(magic, Some(PE32_MAGIC | PE32_PLUS_MAGIC)) {
        return Ok(());
    }
    info.set_format("winexe");
    info.set(Field::Arch, arch);
    info.set(Field::Endian, "little");

    // The optional header is 16 bytes longer for PE32+.
    let rva_ofs = pe_ofs + 24 + if magic == Some(PE32_PLUS_MAGIC) { 108 } else { 92 };
    if let Some(rva_count) = u32_at(&header, rva_ofs) {
        trace!(pe_ofs, rva_count, "pe data directories");
        if rva_count > COM_DESCRIPTOR_ENTRY {
            let entry = rva_ofs + 4 + 8 * COM_DESCRIPTOR_ENTRY as usize;
            if let (Some(vaddr), Some(size)) = (u32_at(&header, entry), u32_at(&header, entry + 4)) {
                if vaddr > 0 && size > 0 {
                    info.set_format("dotnetexe");
                }
            }
        }
    }
    Ok(())
}

const ELF_HEADER_SIZE: usize = 20;

fn elf_arch(machine: u16) -> String {
    match machine {
        2 => "sparc".into(),
        3 => "i386".into(),
        8 => "mips".into(),
        0x14 => "ppc".into(),
        0x15 => "ppc64".into(),
        0x16 => "s390".into(),
        0x28 => "arm".into(),
        0x2b => "sparc64".into(),
        0x32 => "ia64".into(),
        0x3e => "amd64".into(),
        0xb7 => "arm64".into(),
        0xf3 => "riscv".into(),
        other => format!("0x{other:x}"),
    }
}

/// Analyzes an ELF object header
///
/// Sets `subformat` to the word size, `binary` to the object type, plus
/// `endian` and `arch`.
pub fn analyze_elf(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let header = src.read_array::<ELF_HEADER_SIZE>("elf header")?;
    if &header[..4] != b"\x7fELF" {
        return Err(Error::bad("elf signature not found"));
    }
    info.set_format("elf");
    match header[4] {
        1 => info.set(Field::Subformat, "elf32"),
        2 => info.set(Field::Subformat, "elf64"),
        class => return Err(Error::bad(format!("bad elf class: {class}"))),
    }
    let read_u16: fn(&[u8]) -> u16 = match header[5] {
        1 => {
            info.set(Field::Endian, "little");
            LittleEndian::read_u16
        }
        2 => {
            info.set(Field::Endian, "big");
            BigEndian::read_u16
        }
        data => return Err(Error::bad(format!("bad elf data encoding: {data}"))),
    };
    match read_u16(&header[16..18]) {
        1 => info.set(Field::Binary, "object"),
        2 => info.set(Field::Binary, "executable"),
        3 => info.set(Field::Binary, "shlib"),
        4 => info.set(Field::Binary, "core"),
        _ => {}
    }
    info.set(Field::Arch, elf_arch(read_u16(&header[18..20])));
    Ok(())
}
