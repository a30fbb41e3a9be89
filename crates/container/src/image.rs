use crate::reader::Endian;
use serde::Serialize;
use std::path::PathBuf;

/// Everything extracted from one executable container.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerImage {
    pub path: PathBuf,
    /// Present only for universal (fat) containers.
    pub fat_header: Option<FatHeader>,
    /// One record per architecture image, in file order.
    pub headers: Vec<HeaderRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FatHeader {
    pub magic: u32,
    pub architectures: Vec<FatArch>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FatArch {
    pub cpu_type: String,
    pub cpu_subtype: String,
    pub offset: u64,
    pub size: u64,
    pub alignment: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeaderRecord {
    /// Offset of this image inside the container.
    pub offset: u64,
    pub magic: u32,
    pub endian: Endian,
    pub is_64: bool,
    pub cpu_type: String,
    pub cpu_subtype: String,
    pub file_type: String,
    pub flags: Vec<String>,
    /// Only 64-bit headers carry this field.
    pub reserved: Option<u32>,
    pub load_commands: Vec<LoadCommand>,
    pub linked_libraries: Vec<String>,
    pub defined_external_symbols: Symbols,
    pub undefined_external_symbols: Symbols,
    /// Output of the code-signature inspector, or its error text.
    pub signature: String,
    /// Set when the image could not be decoded. Only the fat table fields
    /// are filled in then.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HeaderRecord {
    /// Placeholder for an architecture image that could not be decoded.
    pub fn unreadable(offset: u64, arch: &FatArch, error: impl Into<String>) -> Self {
        Self {
            offset,
            magic: 0,
            endian: Endian::Big,
            is_64: false,
            cpu_type: arch.cpu_type.clone(),
            cpu_subtype: arch.cpu_subtype.clone(),
            file_type: String::new(),
            flags: Vec::new(),
            reserved: None,
            load_commands: Vec::new(),
            linked_libraries: Vec::new(),
            defined_external_symbols: Symbols::Absent,
            undefined_external_symbols: Symbols::Absent,
            signature: String::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_unreadable(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadCommand {
    pub index: usize,
    pub command: String,
    pub raw_command: u32,
    pub size: u32,
    pub content: CommandContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandContent {
    Segment(Segment),
    Symtab(SymtabCommand),
    Dysymtab(DysymtabCommand),
    Dylib {
        name: String,
        timestamp: u32,
        current_version: String,
        compatibility_version: String,
    },
    Dylinker {
        name: String,
    },
    Rpath {
        path: String,
    },
    Uuid {
        uuid: String,
    },
    EntryPoint {
        entry_offset: u64,
        stack_size: u64,
    },
    VersionMin {
        version: String,
        sdk: String,
    },
    BuildVersion {
        platform: String,
        minimum_os: String,
        sdk: String,
        tool_count: u32,
    },
    SourceVersion {
        version: String,
    },
    LinkeditData {
        data_offset: u32,
        data_size: u32,
    },
    DyldInfo {
        rebase: (u32, u32),
        bind: (u32, u32),
        weak_bind: (u32, u32),
        lazy_bind: (u32, u32),
        export: (u32, u32),
    },
    EncryptionInfo {
        crypt_offset: u32,
        crypt_size: u32,
        crypt_id: u32,
    },
    /// A command whose payload is not decoded.
    Opaque,
    /// The payload could not be decoded. The parse of the remaining
    /// commands is not affected.
    Unreadable {
        error: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Segment {
    pub name: String,
    pub vm_address: u64,
    pub vm_size: u64,
    pub file_offset: u64,
    pub file_size: u64,
    pub max_protection: String,
    pub initial_protection: String,
    pub flags: u32,
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Section {
    pub name: String,
    pub segment: String,
    pub address: u64,
    pub size: u64,
    pub offset: u32,
    pub alignment: u32,
    pub relocation_offset: u32,
    pub relocation_count: u32,
    pub flags: String,
    pub raw_flags: u32,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct SymtabCommand {
    pub symbol_offset: u32,
    pub symbol_count: u32,
    pub string_offset: u32,
    pub string_size: u32,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct DysymtabCommand {
    pub local_index: u32,
    pub local_count: u32,
    pub external_defined_index: u32,
    pub external_defined_count: u32,
    pub undefined_index: u32,
    pub undefined_count: u32,
}

/// Name placeholder for symbols whose string index is zero.
pub const NO_NAME: &str = "NULL";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Symbols {
    /// The image has no symbol table commands.
    Absent,
    Names(Vec<String>),
    Unreadable { error: String },
}

impl Symbols {
    pub fn names(&self) -> &[String] {
        match self {
            Symbols::Names(names) => names,
            _ => &[],
        }
    }
}
