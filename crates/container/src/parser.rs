use crate::error::{DecodeError, Error};
use crate::image::{
    CommandContent, ContainerImage, DysymtabCommand, FatArch, FatHeader, HeaderRecord,
    LoadCommand, NO_NAME, Section, Segment, Symbols, SymtabCommand,
};
use crate::names::{self, *};
use crate::reader::{Endian, Reader};
use crate::signature::SignatureInspector;
use byteorder::{BigEndian, ByteOrder};
use std::path::Path;
use tracing::{debug, warn};

pub const MH_MAGIC: u32 = 0xfeed_face;
pub const MH_CIGAM: u32 = 0xcefa_edfe;
pub const MH_MAGIC_64: u32 = 0xfeed_facf;
pub const MH_CIGAM_64: u32 = 0xcffa_edfe;
pub const FAT_MAGIC: u32 = 0xcafe_babe;
pub const FAT_CIGAM: u32 = 0xbeba_feca;
pub const FAT_MAGIC_64: u32 = 0xcafe_babf;
pub const FAT_CIGAM_64: u32 = 0xbfba_feca;

// Java class files share the fat magic; their version field reads as a
// large architecture count.
const MAX_FAT_ARCHES: u32 = 30;

const HEADER_SIZE_32: usize = 28;
const HEADER_SIZE_64: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Fat { endian: Endian, is_64: bool },
    Thin { endian: Endian, is_64: bool },
}

fn identify(path: &Path, data: &[u8]) -> Result<Layout, Error> {
    if data.len() < 4 {
        return Err(Error::Truncated {
            path: path.to_owned(),
        });
    }
    let magic = BigEndian::read_u32(&data[..4]);
    let layout = match magic {
        FAT_MAGIC => Layout::Fat { endian: Endian::Big, is_64: false },
        FAT_MAGIC_64 => Layout::Fat { endian: Endian::Big, is_64: true },
        FAT_CIGAM => Layout::Fat { endian: Endian::Little, is_64: false },
        FAT_CIGAM_64 => Layout::Fat { endian: Endian::Little, is_64: true },
        MH_MAGIC => Layout::Thin { endian: Endian::Big, is_64: false },
        MH_MAGIC_64 => Layout::Thin { endian: Endian::Big, is_64: true },
        MH_CIGAM => Layout::Thin { endian: Endian::Little, is_64: false },
        MH_CIGAM_64 => Layout::Thin { endian: Endian::Little, is_64: true },
        magic => {
            return Err(Error::MalformedContainer {
                path: path.to_owned(),
                magic,
            });
        }
    };
    Ok(layout)
}

/// Cheap check used to decide whether a file is worth parsing.
pub fn is_container(data: &[u8]) -> bool {
    identify(Path::new(""), data).is_ok()
}

/// Parses Mach-O containers from disk and attaches the code-signature
/// inspector's output to every header.
#[derive(Debug, Clone, Default)]
pub struct Parser {
    inspector: SignatureInspector,
}

impl Parser {
    pub fn new(inspector: SignatureInspector) -> Self {
        Self { inspector }
    }

    pub fn parse(&self, path: impl AsRef<Path>) -> Result<ContainerImage, Error> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let mut image = parse_bytes(path, &data)?;
        let signature = self.inspector.inspect(path);
        for header in &mut image.headers {
            header.signature = signature.clone();
        }
        Ok(image)
    }
}

/// Decode a container already in memory. Signature fields are left empty.
pub fn parse_bytes(path: &Path, data: &[u8]) -> Result<ContainerImage, Error> {
    match identify(path, data)? {
        Layout::Thin { .. } => Ok(ContainerImage {
            path: path.to_owned(),
            fat_header: None,
            headers: vec![parse_header(path, data, 0)?],
        }),
        Layout::Fat { endian, is_64 } => parse_fat(path, data, endian, is_64),
    }
}

fn parse_fat(path: &Path, data: &[u8], endian: Endian, is_64: bool) -> Result<ContainerImage, Error> {
    let reader = Reader::new(data, endian);
    let truncated = |_| Error::Truncated {
        path: path.to_owned(),
    };
    let magic = reader.u32(0).map_err(truncated)?;
    let count = reader.u32(4).map_err(truncated)?;
    if count > MAX_FAT_ARCHES {
        return Err(Error::MalformedContainer {
            path: path.to_owned(),
            magic,
        });
    }

    let entry_size = if is_64 { 32 } else { 20 };
    let mut architectures = Vec::with_capacity(count as usize);
    let mut headers = Vec::with_capacity(count as usize);
    for index in 0..count as usize {
        let at = 8 + index * entry_size;
        let arch = match read_fat_arch(&reader, at, is_64) {
            Ok(arch) => arch,
            Err(err) => {
                warn!(path = %path.display(), index, %err, "truncated fat architecture table");
                break;
            }
        };

        let (cpu_type, cpu_subtype, offset, size, alignment) = arch;
        let arch = FatArch {
            cpu_type: names::cpu_type_name(cpu_type),
            cpu_subtype: names::cpu_subtype_name(cpu_type, cpu_subtype),
            offset,
            size,
            alignment,
        };

        let header = match reader.bytes(offset as usize, size as usize) {
            Ok(slice) => parse_header(path, slice, offset).unwrap_or_else(|err| {
                warn!(path = %path.display(), offset, %err, "unreadable architecture image");
                HeaderRecord::unreadable(offset, &arch, err.to_string())
            }),
            Err(err) => {
                warn!(path = %path.display(), offset, size, "architecture image runs past end of file");
                HeaderRecord::unreadable(offset, &arch, err.to_string())
            }
        };
        architectures.push(arch);
        headers.push(header);
    }

    Ok(ContainerImage {
        path: path.to_owned(),
        fat_header: Some(FatHeader {
            magic,
            architectures,
        }),
        headers,
    })
}

fn read_fat_arch(
    reader: &Reader<'_>,
    at: usize,
    is_64: bool,
) -> Result<(i32, u32, u64, u64, u32), DecodeError> {
    let cpu_type = reader.i32(at)?;
    let cpu_subtype = reader.u32(at + 4)?;
    if is_64 {
        Ok((
            cpu_type,
            cpu_subtype,
            reader.u64(at + 8)?,
            reader.u64(at + 16)?,
            reader.u32(at + 24)?,
        ))
    } else {
        Ok((
            cpu_type,
            cpu_subtype,
            u64::from(reader.u32(at + 8)?),
            u64::from(reader.u32(at + 12)?),
            reader.u32(at + 16)?,
        ))
    }
}

fn parse_header(path: &Path, data: &[u8], base: u64) -> Result<HeaderRecord, Error> {
    let (endian, is_64) = match identify(path, data)? {
        Layout::Thin { endian, is_64 } => (endian, is_64),
        Layout::Fat { .. } => {
            return Err(Error::MalformedContainer {
                path: path.to_owned(),
                magic: BigEndian::read_u32(&data[..4]),
            });
        }
    };
    let header_size = if is_64 { HEADER_SIZE_64 } else { HEADER_SIZE_32 };
    if data.len() < header_size {
        return Err(Error::Truncated {
            path: path.to_owned(),
        });
    }

    let reader = Reader::new(data, endian);
    let field = |offset| {
        reader.u32(offset).map_err(|_| Error::Truncated {
            path: path.to_owned(),
        })
    };
    let magic = field(0)?;
    let cpu_type = field(4)? as i32;
    let cpu_subtype = field(8)?;
    let file_type = field(12)?;
    let command_count = field(16)?;
    let flags = field(24)?;
    let reserved = if is_64 { Some(field(28)?) } else { None };

    let load_commands = parse_load_commands(path, &reader, header_size, command_count);
    let linked_libraries = load_commands
        .iter()
        .filter(|command| {
            matches!(
                command.raw_command,
                LC_LOAD_DYLIB
                    | LC_LOAD_WEAK_DYLIB
                    | LC_REEXPORT_DYLIB
                    | LC_LAZY_LOAD_DYLIB
                    | LC_LOAD_UPWARD_DYLIB
            )
        })
        .filter_map(|command| match &command.content {
            CommandContent::Dylib { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect();
    let (defined_external_symbols, undefined_external_symbols) =
        external_symbols(path, &reader, &load_commands, is_64);

    Ok(HeaderRecord {
        offset: base,
        magic,
        endian,
        is_64,
        cpu_type: names::cpu_type_name(cpu_type),
        cpu_subtype: names::cpu_subtype_name(cpu_type, cpu_subtype),
        file_type: names::file_type_name(file_type),
        flags: names::header_flag_names(flags),
        reserved,
        load_commands,
        linked_libraries,
        defined_external_symbols,
        undefined_external_symbols,
        signature: String::new(),
        error: None,
    })
}

fn parse_load_commands(
    path: &Path,
    reader: &Reader<'_>,
    start: usize,
    count: u32,
) -> Vec<LoadCommand> {
    let mut commands = Vec::new();
    let mut at = start;
    for index in 0..count as usize {
        let (raw_command, size) = match (reader.u32(at), reader.u32(at + 4)) {
            (Ok(cmd), Ok(size)) => (cmd, size),
            _ => {
                warn!(path = %path.display(), index, count, "load command table is truncated");
                break;
            }
        };
        if size < 8 {
            commands.push(LoadCommand {
                index,
                command: names::load_command_name(raw_command),
                raw_command,
                size,
                content: CommandContent::Unreadable {
                    error: DecodeError::CommandTooSmall(size).to_string(),
                },
            });
            // Without a usable size there is no way to find the next command.
            break;
        }

        let content = decode_command(reader, raw_command, at, size as usize)
            .unwrap_or_else(|err| {
                debug!(path = %path.display(), index, %err, "undecodable load command");
                CommandContent::Unreadable {
                    error: err.to_string(),
                }
            });
        commands.push(LoadCommand {
            index,
            command: names::load_command_name(raw_command),
            raw_command,
            size,
            content,
        });
        at = at.saturating_add(size as usize);
    }
    commands
}

/// String referenced by an `lc_str` offset relative to the command start.
fn command_string(
    reader: &Reader<'_>,
    at: usize,
    size: usize,
    field: usize,
) -> Result<String, DecodeError> {
    let relative = reader.u32(at + field)? as usize;
    if relative >= size {
        return Err(DecodeError::OutOfBounds {
            offset: at + relative,
            len: 1,
        });
    }
    reader.c_string(at + relative, at + size)
}

fn decode_command(
    reader: &Reader<'_>,
    cmd: u32,
    at: usize,
    size: usize,
) -> Result<CommandContent, DecodeError> {
    // Every field read below must stay inside the command.
    reader.bytes(at, size)?;
    let u32_at = |field: usize| -> Result<u32, DecodeError> {
        if field + 4 > size {
            return Err(DecodeError::OutOfBounds {
                offset: at + field,
                len: 4,
            });
        }
        reader.u32(at + field)
    };
    let u64_at = |field: usize| -> Result<u64, DecodeError> {
        if field + 8 > size {
            return Err(DecodeError::OutOfBounds {
                offset: at + field,
                len: 8,
            });
        }
        reader.u64(at + field)
    };

    let content = match cmd {
        LC_SEGMENT | LC_SEGMENT_64 => {
            CommandContent::Segment(decode_segment(reader, at, size, cmd == LC_SEGMENT_64)?)
        }
        LC_SYMTAB => CommandContent::Symtab(SymtabCommand {
            symbol_offset: u32_at(8)?,
            symbol_count: u32_at(12)?,
            string_offset: u32_at(16)?,
            string_size: u32_at(20)?,
        }),
        LC_DYSYMTAB => CommandContent::Dysymtab(DysymtabCommand {
            local_index: u32_at(8)?,
            local_count: u32_at(12)?,
            external_defined_index: u32_at(16)?,
            external_defined_count: u32_at(20)?,
            undefined_index: u32_at(24)?,
            undefined_count: u32_at(28)?,
        }),
        LC_LOAD_DYLIB | LC_ID_DYLIB | LC_LOAD_WEAK_DYLIB | LC_REEXPORT_DYLIB
        | LC_LAZY_LOAD_DYLIB | LC_LOAD_UPWARD_DYLIB => CommandContent::Dylib {
            name: command_string(reader, at, size, 8)?,
            timestamp: u32_at(12)?,
            current_version: packed_version(u32_at(16)?),
            compatibility_version: packed_version(u32_at(20)?),
        },
        LC_LOAD_DYLINKER | LC_ID_DYLINKER | LC_DYLD_ENVIRONMENT => CommandContent::Dylinker {
            name: command_string(reader, at, size, 8)?,
        },
        LC_RPATH => CommandContent::Rpath {
            path: command_string(reader, at, size, 8)?,
        },
        LC_UUID => {
            if size < 24 {
                return Err(DecodeError::OutOfBounds {
                    offset: at + 8,
                    len: 16,
                });
            }
            CommandContent::Uuid {
                uuid: format_uuid(reader.bytes(at + 8, 16)?),
            }
        }
        LC_MAIN => CommandContent::EntryPoint {
            entry_offset: u64_at(8)?,
            stack_size: u64_at(16)?,
        },
        LC_VERSION_MIN_MACOSX
        | LC_VERSION_MIN_IPHONEOS
        | LC_VERSION_MIN_TVOS
        | LC_VERSION_MIN_WATCHOS => CommandContent::VersionMin {
            version: packed_version(u32_at(8)?),
            sdk: packed_version(u32_at(12)?),
        },
        LC_BUILD_VERSION => CommandContent::BuildVersion {
            platform: platform_name(u32_at(8)?),
            minimum_os: packed_version(u32_at(12)?),
            sdk: packed_version(u32_at(16)?),
            tool_count: u32_at(20)?,
        },
        LC_SOURCE_VERSION => CommandContent::SourceVersion {
            version: source_version(u64_at(8)?),
        },
        LC_CODE_SIGNATURE
        | LC_SEGMENT_SPLIT_INFO
        | LC_FUNCTION_STARTS
        | LC_DATA_IN_CODE
        | LC_DYLIB_CODE_SIGN_DRS
        | LC_LINKER_OPTIMIZATION_HINT
        | LC_DYLD_EXPORTS_TRIE
        | LC_DYLD_CHAINED_FIXUPS => CommandContent::LinkeditData {
            data_offset: u32_at(8)?,
            data_size: u32_at(12)?,
        },
        LC_DYLD_INFO | LC_DYLD_INFO_ONLY => CommandContent::DyldInfo {
            rebase: (u32_at(8)?, u32_at(12)?),
            bind: (u32_at(16)?, u32_at(20)?),
            weak_bind: (u32_at(24)?, u32_at(28)?),
            lazy_bind: (u32_at(32)?, u32_at(36)?),
            export: (u32_at(40)?, u32_at(44)?),
        },
        LC_ENCRYPTION_INFO | LC_ENCRYPTION_INFO_64 => CommandContent::EncryptionInfo {
            crypt_offset: u32_at(8)?,
            crypt_size: u32_at(12)?,
            crypt_id: u32_at(16)?,
        },
        _ => CommandContent::Opaque,
    };
    Ok(content)
}

fn decode_segment(
    reader: &Reader<'_>,
    at: usize,
    size: usize,
    is_64: bool,
) -> Result<Segment, DecodeError> {
    let (header_len, section_len) = if is_64 { (72, 80) } else { (56, 68) };
    if size < header_len {
        return Err(DecodeError::OutOfBounds {
            offset: at,
            len: header_len,
        });
    }
    let word = if is_64 { 8 } else { 4 };
    let name = reader.fixed_name(at + 8, 16)?;
    let vm_address = reader.word(at + 24, is_64)?;
    let vm_size = reader.word(at + 24 + word, is_64)?;
    let file_offset = reader.word(at + 24 + 2 * word, is_64)?;
    let file_size = reader.word(at + 24 + 3 * word, is_64)?;
    let tail = at + 24 + 4 * word;
    let max_protection = reader.i32(tail)?;
    let initial_protection = reader.i32(tail + 4)?;
    let section_count = reader.u32(tail + 8)? as usize;
    let flags = reader.u32(tail + 12)?;

    let needed = section_count
        .saturating_mul(section_len)
        .saturating_add(header_len);
    if needed > size {
        return Err(DecodeError::OutOfBounds {
            offset: at + header_len,
            len: needed - header_len,
        });
    }

    let sections = (0..section_count)
        .map(|index| decode_section(reader, at + header_len + index * section_len, is_64))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Segment {
        name,
        vm_address,
        vm_size,
        file_offset,
        file_size,
        max_protection: vm_protection_name(max_protection),
        initial_protection: vm_protection_name(initial_protection),
        flags,
        sections,
    })
}

fn decode_section(reader: &Reader<'_>, at: usize, is_64: bool) -> Result<Section, DecodeError> {
    let word = if is_64 { 8 } else { 4 };
    let tail = at + 32 + 2 * word;
    let raw_flags = reader.u32(tail + 16)?;
    Ok(Section {
        name: reader.fixed_name(at, 16)?,
        segment: reader.fixed_name(at + 16, 16)?,
        address: reader.word(at + 32, is_64)?,
        size: reader.word(at + 32 + word, is_64)?,
        offset: reader.u32(tail)?,
        alignment: reader.u32(tail + 4)?,
        relocation_offset: reader.u32(tail + 8)?,
        relocation_count: reader.u32(tail + 12)?,
        flags: section_flags_name(raw_flags),
        raw_flags,
    })
}

fn format_uuid(bytes: &[u8]) -> String {
    let hex = bytes.iter().map(|b| format!("{b:02X}")).collect::<String>();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

fn external_symbols(
    path: &Path,
    reader: &Reader<'_>,
    commands: &[LoadCommand],
    is_64: bool,
) -> (Symbols, Symbols) {
    let symtab = commands.iter().find_map(|command| match &command.content {
        CommandContent::Symtab(symtab) => Some(*symtab),
        _ => None,
    });
    let dysymtab = commands.iter().find_map(|command| match &command.content {
        CommandContent::Dysymtab(dysymtab) => Some(*dysymtab),
        _ => None,
    });
    let (Some(symtab), Some(dysymtab)) = (symtab, dysymtab) else {
        return (Symbols::Absent, Symbols::Absent);
    };

    match read_symbol_names(reader, &symtab, &dysymtab, is_64) {
        Ok((defined, undefined)) => (Symbols::Names(defined), Symbols::Names(undefined)),
        Err(err) => {
            warn!(path = %path.display(), %err, "malformed symbol table");
            let error = format!("malformed symbol table: {err}");
            (
                Symbols::Unreadable {
                    error: error.clone(),
                },
                Symbols::Unreadable { error },
            )
        }
    }
}

fn read_symbol_names(
    reader: &Reader<'_>,
    symtab: &SymtabCommand,
    dysymtab: &DysymtabCommand,
    is_64: bool,
) -> Result<(Vec<String>, Vec<String>), DecodeError> {
    let strings_start = symtab.string_offset as usize;
    let strings_size = symtab.string_size as usize;
    reader.bytes(strings_start, strings_size)?;
    let strings_end = strings_start + strings_size;
    let entry_size = if is_64 { 16 } else { 12 };
    let symbols_start = symtab.symbol_offset as usize;

    let names = |first: u32, count: u32| -> Result<Vec<String>, DecodeError> {
        let first = first as usize;
        (first..first.saturating_add(count as usize))
            .map(|index| {
                let entry = symbols_start.saturating_add(index.saturating_mul(entry_size));
                let string_index = reader.u32(entry)? as usize;
                if string_index == 0 {
                    return Ok(NO_NAME.to_owned());
                }
                if string_index >= strings_size {
                    return Err(DecodeError::OutOfBounds {
                        offset: strings_start + string_index,
                        len: 1,
                    });
                }
                reader.c_string(strings_start + string_index, strings_end)
            })
            .collect()
    };

    Ok((
        names(
            dysymtab.external_defined_index,
            dysymtab.external_defined_count,
        )?,
        names(dysymtab.undefined_index, dysymtab.undefined_count)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_rejects_unknown_magic() {
        let err = identify(Path::new("x"), b"\x7fELF\x02\x01").unwrap_err();
        assert!(matches!(err, Error::MalformedContainer { magic: 0x7f45_4c46, .. }));
    }

    #[test]
    fn identify_short_input_is_truncated() {
        assert!(matches!(
            identify(Path::new("x"), b"\xfe\xed"),
            Err(Error::Truncated { .. })
        ));
    }

    #[test]
    fn identify_all_magics() {
        let cases = [
            (&[0xfe, 0xed, 0xfa, 0xce], Layout::Thin { endian: Endian::Big, is_64: false }),
            (&[0xcf, 0xfa, 0xed, 0xfe], Layout::Thin { endian: Endian::Little, is_64: true }),
            (&[0xce, 0xfa, 0xed, 0xfe], Layout::Thin { endian: Endian::Little, is_64: false }),
            (&[0xca, 0xfe, 0xba, 0xbe], Layout::Fat { endian: Endian::Big, is_64: false }),
            (&[0xca, 0xfe, 0xba, 0xbf], Layout::Fat { endian: Endian::Big, is_64: true }),
        ];
        for (bytes, expected) in cases {
            assert_eq!(identify(Path::new("x"), bytes).unwrap(), expected);
        }
    }

    #[test]
    fn uuid_formatting() {
        let bytes: Vec<u8> = (0u8..16).collect();
        assert_eq!(format_uuid(&bytes), "00010203-0405-0607-0809-0A0B0C0D0E0F");
    }
}
