//! Lookup tables turning Mach-O numeric fields into their symbolic names.

const CPU_ARCH_ABI64: i32 = 0x0100_0000;
const CPU_ARCH_ABI64_32: i32 = 0x0200_0000;

pub(crate) const CPU_TYPE_X86: i32 = 7;
pub(crate) const CPU_TYPE_ARM: i32 = 12;
pub(crate) const CPU_TYPE_POWERPC: i32 = 18;

const SUBTYPE_MASK: u32 = 0xff00_0000;
const LOAD_COMMAND_HIGH_MASK: u32 = 0xff00_0000;
const SECTION_TYPE_MASK: u32 = 0x0000_00ff;
const SECTION_USER_ATTRIBUTES: u32 = 0xff00_0000;
const SECTION_SYSTEM_ATTRIBUTES: u32 = 0x00ff_ff00;

fn unknown(value: u32) -> String {
    format!("unknown ({value:#x})")
}

pub fn cpu_type_name(cpu_type: i32) -> String {
    let name = match cpu_type {
        -1 => "CPU_TYPE_ANY",
        1 => "CPU_TYPE_VAX",
        6 => "CPU_TYPE_MC680x0",
        CPU_TYPE_X86 => "CPU_TYPE_X86",
        t if t == CPU_TYPE_X86 | CPU_ARCH_ABI64 => "CPU_TYPE_X86_64",
        8 => "CPU_TYPE_MIPS",
        10 => "CPU_TYPE_MC98000",
        11 => "CPU_TYPE_HPPA",
        CPU_TYPE_ARM => "CPU_TYPE_ARM",
        t if t == CPU_TYPE_ARM | CPU_ARCH_ABI64 => "CPU_TYPE_ARM64",
        t if t == CPU_TYPE_ARM | CPU_ARCH_ABI64_32 => "CPU_TYPE_ARM64_32",
        13 => "CPU_TYPE_MC88000",
        14 => "CPU_TYPE_SPARC",
        15 => "CPU_TYPE_I860",
        CPU_TYPE_POWERPC => "CPU_TYPE_POWERPC",
        t if t == CPU_TYPE_POWERPC | CPU_ARCH_ABI64 => "CPU_TYPE_POWERPC64",
        other => return unknown(other as u32),
    };
    name.to_owned()
}

fn x86_subtype(cpu_type: i32, low: u32) -> Option<&'static str> {
    if cpu_type & CPU_ARCH_ABI64 != 0 {
        return match low {
            3 => Some("CPU_SUBTYPE_X86_64_ALL"),
            4 => Some("CPU_SUBTYPE_X86_ARCH1"),
            8 => Some("CPU_SUBTYPE_X86_64_H"),
            _ => None,
        };
    }
    match low {
        3 => Some("CPU_SUBTYPE_I386_ALL"),
        4 => Some("CPU_SUBTYPE_486"),
        0x84 => Some("CPU_SUBTYPE_486SX"),
        5 => Some("CPU_SUBTYPE_PENT"),
        0x16 => Some("CPU_SUBTYPE_PENTPRO"),
        0x36 => Some("CPU_SUBTYPE_PENTII_M3"),
        0x56 => Some("CPU_SUBTYPE_PENTII_M5"),
        0x67 => Some("CPU_SUBTYPE_CELERON"),
        0x77 => Some("CPU_SUBTYPE_CELERON_MOBILE"),
        0x08 => Some("CPU_SUBTYPE_PENTIUM_3"),
        0x18 => Some("CPU_SUBTYPE_PENTIUM_3_M"),
        0x28 => Some("CPU_SUBTYPE_PENTIUM_3_XEON"),
        0x09 => Some("CPU_SUBTYPE_PENTIUM_M"),
        0x0a => Some("CPU_SUBTYPE_PENTIUM_4"),
        0x1a => Some("CPU_SUBTYPE_PENTIUM_4_M"),
        0x0b => Some("CPU_SUBTYPE_ITANIUM"),
        0x1b => Some("CPU_SUBTYPE_ITANIUM_2"),
        0x0c => Some("CPU_SUBTYPE_XEON"),
        0x1c => Some("CPU_SUBTYPE_XEON_MP"),
        _ => None,
    }
}

fn arm_subtype(cpu_type: i32, low: u32) -> Option<&'static str> {
    if cpu_type & (CPU_ARCH_ABI64 | CPU_ARCH_ABI64_32) != 0 {
        return match low {
            0 => Some("CPU_SUBTYPE_ARM64_ALL"),
            1 => Some("CPU_SUBTYPE_ARM64_V8"),
            2 => Some("CPU_SUBTYPE_ARM64E"),
            _ => None,
        };
    }
    match low {
        0 => Some("CPU_SUBTYPE_ARM_ALL"),
        5 => Some("CPU_SUBTYPE_ARM_V4T"),
        6 => Some("CPU_SUBTYPE_ARM_V6"),
        7 => Some("CPU_SUBTYPE_ARM_V5TEJ"),
        8 => Some("CPU_SUBTYPE_ARM_XSCALE"),
        9 => Some("CPU_SUBTYPE_ARM_V7"),
        10 => Some("CPU_SUBTYPE_ARM_V7F"),
        11 => Some("CPU_SUBTYPE_ARM_V7S"),
        12 => Some("CPU_SUBTYPE_ARM_V7K"),
        13 => Some("CPU_SUBTYPE_ARM_V8"),
        14 => Some("CPU_SUBTYPE_ARM_V6M"),
        15 => Some("CPU_SUBTYPE_ARM_V7M"),
        16 => Some("CPU_SUBTYPE_ARM_V7EM"),
        _ => None,
    }
}

fn powerpc_subtype(low: u32) -> Option<&'static str> {
    match low {
        0 => Some("CPU_SUBTYPE_POWERPC_ALL"),
        1 => Some("CPU_SUBTYPE_POWERPC_601"),
        2 => Some("CPU_SUBTYPE_POWERPC_602"),
        3 => Some("CPU_SUBTYPE_POWERPC_603"),
        4 => Some("CPU_SUBTYPE_POWERPC_603e"),
        5 => Some("CPU_SUBTYPE_POWERPC_603ev"),
        6 => Some("CPU_SUBTYPE_POWERPC_604"),
        7 => Some("CPU_SUBTYPE_POWERPC_604e"),
        8 => Some("CPU_SUBTYPE_POWERPC_620"),
        9 => Some("CPU_SUBTYPE_POWERPC_750"),
        10 => Some("CPU_SUBTYPE_POWERPC_7400"),
        11 => Some("CPU_SUBTYPE_POWERPC_7450"),
        100 => Some("CPU_SUBTYPE_POWERPC_970"),
        _ => None,
    }
}

fn other_subtype(cpu_type: i32, low: u32) -> Option<&'static str> {
    match (cpu_type, low) {
        (1, 0) => Some("CPU_SUBTYPE_VAX_ALL"),
        (6, 1) => Some("CPU_SUBTYPE_MC680x0_ALL"),
        (6, 2) => Some("CPU_SUBTYPE_MC68040"),
        (6, 3) => Some("CPU_SUBTYPE_MC68030_ONLY"),
        (8, 0) => Some("CPU_SUBTYPE_MIPS_ALL"),
        (10, 0) => Some("CPU_SUBTYPE_MC98000_ALL"),
        (10, 1) => Some("CPU_SUBTYPE_MC98601"),
        (11, 0) => Some("CPU_SUBTYPE_HPPA_ALL"),
        (11, 1) => Some("CPU_SUBTYPE_HPPA_7100LC"),
        (13, 0) => Some("CPU_SUBTYPE_MC88000_ALL"),
        (13, 1) => Some("CPU_SUBTYPE_MC88100"),
        (13, 2) => Some("CPU_SUBTYPE_MC88110"),
        (14, 0) => Some("CPU_SUBTYPE_SPARC_ALL"),
        (15, 0) => Some("CPU_SUBTYPE_I860_ALL"),
        (15, 1) => Some("CPU_SUBTYPE_I860_860"),
        _ => None,
    }
}

fn subtype_capability(cpu_type: i32, high: u32) -> String {
    match high {
        0x8000_0000 if cpu_type & !CPU_ARCH_ABI64 == CPU_TYPE_ARM => {
            "CPU_SUBTYPE_PTRAUTH_ABI".to_owned()
        }
        0x8000_0000 => "CPU_SUBTYPE_LIB64".to_owned(),
        other => unknown(other),
    }
}

/// The subtype carries capability bits in its high byte. The remaining bits
/// are looked up in the family table of `cpu_type` and the capability name,
/// if any, is appended after a comma.
pub fn cpu_subtype_name(cpu_type: i32, subtype: u32) -> String {
    let low = subtype & !SUBTYPE_MASK;
    let high = subtype & SUBTYPE_MASK;
    let family = cpu_type & !(CPU_ARCH_ABI64 | CPU_ARCH_ABI64_32);
    let name = match family {
        CPU_TYPE_X86 => x86_subtype(cpu_type, low),
        CPU_TYPE_ARM => arm_subtype(cpu_type, low),
        CPU_TYPE_POWERPC => powerpc_subtype(low),
        _ => other_subtype(cpu_type, low),
    }
    .map(str::to_owned)
    .unwrap_or_else(|| unknown(low));

    if high == 0 {
        name
    } else {
        format!("{name}, {}", subtype_capability(cpu_type, high))
    }
}

pub fn file_type_name(file_type: u32) -> String {
    let name = match file_type {
        0x1 => "MH_OBJECT",
        0x2 => "MH_EXECUTE",
        0x3 => "MH_FVMLIB",
        0x4 => "MH_CORE",
        0x5 => "MH_PRELOAD",
        0x6 => "MH_DYLIB",
        0x7 => "MH_DYLINKER",
        0x8 => "MH_BUNDLE",
        0x9 => "MH_DYLIB_STUB",
        0xa => "MH_DSYM",
        0xb => "MH_KEXT_BUNDLE",
        0xc => "MH_FILESET",
        other => return unknown(other),
    };
    name.to_owned()
}

const HEADER_FLAGS: &[(u32, &str)] = &[
    (0x1, "MH_NOUNDEFS"),
    (0x2, "MH_INCRLINK"),
    (0x4, "MH_DYLDLINK"),
    (0x8, "MH_BINDATLOAD"),
    (0x10, "MH_PREBOUND"),
    (0x20, "MH_SPLIT_SEGS"),
    (0x40, "MH_LAZY_INIT"),
    (0x80, "MH_TWOLEVEL"),
    (0x100, "MH_FORCE_FLAT"),
    (0x200, "MH_NOMULTIDEFS"),
    (0x400, "MH_NOFIXPREBINDING"),
    (0x800, "MH_PREBINDABLE"),
    (0x1000, "MH_ALLMODSBOUND"),
    (0x2000, "MH_SUBSECTIONS_VIA_SYMBOLS"),
    (0x4000, "MH_CANONICAL"),
    (0x8000, "MH_WEAK_DEFINES"),
    (0x10000, "MH_BINDS_TO_WEAK"),
    (0x20000, "MH_ALLOW_STACK_EXECUTION"),
    (0x40000, "MH_ROOT_SAFE"),
    (0x80000, "MH_SETUID_SAFE"),
    (0x100000, "MH_NO_REEXPORTED_DYLIBS"),
    (0x200000, "MH_PIE"),
    (0x400000, "MH_DEAD_STRIPPABLE_DYLIB"),
    (0x800000, "MH_HAS_TLV_DESCRIPTORS"),
    (0x1000000, "MH_NO_HEAP_EXECUTION"),
    (0x2000000, "MH_APP_EXTENSION_SAFE"),
    (0x4000000, "MH_NLIST_OUTOFSYNC_WITH_DYLDINFO"),
    (0x8000000, "MH_SIM_SUPPORT"),
    (0x80000000, "MH_DYLIB_IN_CACHE"),
];

/// One name per set bit, lowest bit first.
pub fn header_flag_names(flags: u32) -> Vec<String> {
    (0..32)
        .map(|bit| 1u32 << bit)
        .filter(|mask| flags & mask != 0)
        .map(|mask| {
            HEADER_FLAGS
                .iter()
                .find(|(value, _)| *value == mask)
                .map(|(_, name)| (*name).to_owned())
                .unwrap_or_else(|| unknown(mask))
        })
        .collect()
}

pub(crate) const LC_REQ_DYLD: u32 = 0x8000_0000;
pub(crate) const LC_SEGMENT: u32 = 0x1;
pub(crate) const LC_SYMTAB: u32 = 0x2;
pub(crate) const LC_DYSYMTAB: u32 = 0xb;
pub(crate) const LC_LOAD_DYLIB: u32 = 0xc;
pub(crate) const LC_ID_DYLIB: u32 = 0xd;
pub(crate) const LC_LOAD_DYLINKER: u32 = 0xe;
pub(crate) const LC_ID_DYLINKER: u32 = 0xf;
pub(crate) const LC_LOAD_WEAK_DYLIB: u32 = 0x18 | LC_REQ_DYLD;
pub(crate) const LC_SEGMENT_64: u32 = 0x19;
pub(crate) const LC_UUID: u32 = 0x1b;
pub(crate) const LC_RPATH: u32 = 0x1c | LC_REQ_DYLD;
pub(crate) const LC_CODE_SIGNATURE: u32 = 0x1d;
pub(crate) const LC_SEGMENT_SPLIT_INFO: u32 = 0x1e;
pub(crate) const LC_REEXPORT_DYLIB: u32 = 0x1f | LC_REQ_DYLD;
pub(crate) const LC_LAZY_LOAD_DYLIB: u32 = 0x20;
pub(crate) const LC_ENCRYPTION_INFO: u32 = 0x21;
pub(crate) const LC_DYLD_INFO: u32 = 0x22;
pub(crate) const LC_DYLD_INFO_ONLY: u32 = 0x22 | LC_REQ_DYLD;
pub(crate) const LC_LOAD_UPWARD_DYLIB: u32 = 0x23 | LC_REQ_DYLD;
pub(crate) const LC_VERSION_MIN_MACOSX: u32 = 0x24;
pub(crate) const LC_VERSION_MIN_IPHONEOS: u32 = 0x25;
pub(crate) const LC_FUNCTION_STARTS: u32 = 0x26;
pub(crate) const LC_DYLD_ENVIRONMENT: u32 = 0x27;
pub(crate) const LC_MAIN: u32 = 0x28 | LC_REQ_DYLD;
pub(crate) const LC_DATA_IN_CODE: u32 = 0x29;
pub(crate) const LC_SOURCE_VERSION: u32 = 0x2a;
pub(crate) const LC_DYLIB_CODE_SIGN_DRS: u32 = 0x2b;
pub(crate) const LC_ENCRYPTION_INFO_64: u32 = 0x2c;
pub(crate) const LC_LINKER_OPTIMIZATION_HINT: u32 = 0x2e;
pub(crate) const LC_VERSION_MIN_TVOS: u32 = 0x2f;
pub(crate) const LC_VERSION_MIN_WATCHOS: u32 = 0x30;
pub(crate) const LC_BUILD_VERSION: u32 = 0x32;
pub(crate) const LC_DYLD_EXPORTS_TRIE: u32 = 0x33 | LC_REQ_DYLD;
pub(crate) const LC_DYLD_CHAINED_FIXUPS: u32 = 0x34 | LC_REQ_DYLD;

const LOAD_COMMANDS: &[(u32, &str)] = &[
    (LC_SEGMENT, "LC_SEGMENT"),
    (LC_SYMTAB, "LC_SYMTAB"),
    (0x3, "LC_SYMSEG"),
    (0x4, "LC_THREAD"),
    (0x5, "LC_UNIXTHREAD"),
    (0x6, "LC_LOADFVMLIB"),
    (0x7, "LC_IDFVMLIB"),
    (0x8, "LC_IDENT"),
    (0x9, "LC_FVMFILE"),
    (0xa, "LC_PREPAGE"),
    (LC_DYSYMTAB, "LC_DYSYMTAB"),
    (LC_LOAD_DYLIB, "LC_LOAD_DYLIB"),
    (LC_ID_DYLIB, "LC_ID_DYLIB"),
    (LC_LOAD_DYLINKER, "LC_LOAD_DYLINKER"),
    (LC_ID_DYLINKER, "LC_ID_DYLINKER"),
    (0x10, "LC_PREBOUND_DYLIB"),
    (0x11, "LC_ROUTINES"),
    (0x12, "LC_SUB_FRAMEWORK"),
    (0x13, "LC_SUB_UMBRELLA"),
    (0x14, "LC_SUB_CLIENT"),
    (0x15, "LC_SUB_LIBRARY"),
    (0x16, "LC_TWOLEVEL_HINTS"),
    (0x17, "LC_PREBIND_CKSUM"),
    (LC_LOAD_WEAK_DYLIB, "LC_LOAD_WEAK_DYLIB"),
    (LC_SEGMENT_64, "LC_SEGMENT_64"),
    (0x1a, "LC_ROUTINES_64"),
    (LC_UUID, "LC_UUID"),
    (LC_RPATH, "LC_RPATH"),
    (LC_CODE_SIGNATURE, "LC_CODE_SIGNATURE"),
    (LC_SEGMENT_SPLIT_INFO, "LC_SEGMENT_SPLIT_INFO"),
    (LC_REEXPORT_DYLIB, "LC_REEXPORT_DYLIB"),
    (LC_LAZY_LOAD_DYLIB, "LC_LAZY_LOAD_DYLIB"),
    (LC_ENCRYPTION_INFO, "LC_ENCRYPTION_INFO"),
    (LC_DYLD_INFO, "LC_DYLD_INFO"),
    (LC_DYLD_INFO_ONLY, "LC_DYLD_INFO_ONLY"),
    (LC_LOAD_UPWARD_DYLIB, "LC_LOAD_UPWARD_DYLIB"),
    (LC_VERSION_MIN_MACOSX, "LC_VERSION_MIN_MACOSX"),
    (LC_VERSION_MIN_IPHONEOS, "LC_VERSION_MIN_IPHONEOS"),
    (LC_FUNCTION_STARTS, "LC_FUNCTION_STARTS"),
    (LC_DYLD_ENVIRONMENT, "LC_DYLD_ENVIRONMENT"),
    (LC_MAIN, "LC_MAIN"),
    (LC_DATA_IN_CODE, "LC_DATA_IN_CODE"),
    (LC_SOURCE_VERSION, "LC_SOURCE_VERSION"),
    (LC_DYLIB_CODE_SIGN_DRS, "LC_DYLIB_CODE_SIGN_DRS"),
    (LC_ENCRYPTION_INFO_64, "LC_ENCRYPTION_INFO_64"),
    (0x2d, "LC_LINKER_OPTION"),
    (LC_LINKER_OPTIMIZATION_HINT, "LC_LINKER_OPTIMIZATION_HINT"),
    (LC_VERSION_MIN_TVOS, "LC_VERSION_MIN_TVOS"),
    (LC_VERSION_MIN_WATCHOS, "LC_VERSION_MIN_WATCHOS"),
    (0x31, "LC_NOTE"),
    (LC_BUILD_VERSION, "LC_BUILD_VERSION"),
    (LC_DYLD_EXPORTS_TRIE, "LC_DYLD_EXPORTS_TRIE"),
    (LC_DYLD_CHAINED_FIXUPS, "LC_DYLD_CHAINED_FIXUPS"),
];

fn lookup(table: &[(u32, &'static str)], value: u32) -> Option<&'static str> {
    table
        .iter()
        .find(|(code, _)| *code == value)
        .map(|(_, name)| *name)
}

/// Known codes map directly. Unknown codes with bits in the high byte are
/// split and rendered as `<high label>, <low label>`.
pub fn load_command_name(cmd: u32) -> String {
    if let Some(name) = lookup(LOAD_COMMANDS, cmd) {
        return name.to_owned();
    }
    let high = cmd & LOAD_COMMAND_HIGH_MASK;
    let low = cmd & !LOAD_COMMAND_HIGH_MASK;
    let low_name = lookup(LOAD_COMMANDS, low)
        .map(str::to_owned)
        .unwrap_or_else(|| unknown(low));
    match high {
        0 => low_name,
        LC_REQ_DYLD => format!("LC_REQ_DYLD, {low_name}"),
        other => format!("{}, {low_name}", unknown(other)),
    }
}

pub fn vm_protection_name(prot: i32) -> String {
    if prot == 0 {
        return "VM_PROT_NONE".to_owned();
    }
    let mut names = Vec::new();
    for (bit, name) in [
        (0x1, "VM_PROT_READ"),
        (0x2, "VM_PROT_WRITE"),
        (0x4, "VM_PROT_EXECUTE"),
    ] {
        if prot & bit != 0 {
            names.push(name.to_owned());
        }
    }
    let rest = prot & !0x7;
    if rest != 0 {
        names.push(unknown(rest as u32));
    }
    names.join(", ")
}

const SECTION_TYPES: &[(u32, &str)] = &[
    (0x0, "S_REGULAR"),
    (0x1, "S_ZEROFILL"),
    (0x2, "S_CSTRING_LITERALS"),
    (0x3, "S_4BYTE_LITERALS"),
    (0x4, "S_8BYTE_LITERALS"),
    (0x5, "S_LITERAL_POINTERS"),
    (0x6, "S_NON_LAZY_SYMBOL_POINTERS"),
    (0x7, "S_LAZY_SYMBOL_POINTERS"),
    (0x8, "S_SYMBOL_STUBS"),
    (0x9, "S_MOD_INIT_FUNC_POINTERS"),
    (0xa, "S_MOD_TERM_FUNC_POINTERS"),
    (0xb, "S_COALESCED"),
    (0xc, "S_GB_ZEROFILL"),
    (0xd, "S_INTERPOSING"),
    (0xe, "S_16BYTE_LITERALS"),
    (0xf, "S_DTRACE_DOF"),
    (0x10, "S_LAZY_DYLIB_SYMBOL_POINTERS"),
    (0x11, "S_THREAD_LOCAL_REGULAR"),
    (0x12, "S_THREAD_LOCAL_ZEROFILL"),
    (0x13, "S_THREAD_LOCAL_VARIABLES"),
    (0x14, "S_THREAD_LOCAL_VARIABLE_POINTERS"),
    (0x15, "S_THREAD_LOCAL_INIT_FUNCTION_POINTERS"),
    (0x16, "S_INIT_FUNC_OFFSETS"),
];

const SECTION_ATTRIBUTES: &[(u32, &str)] = &[
    (0x8000_0000, "S_ATTR_PURE_INSTRUCTIONS"),
    (0x4000_0000, "S_ATTR_NO_TOC"),
    (0x2000_0000, "S_ATTR_STRIP_STATIC_SYMS"),
    (0x1000_0000, "S_ATTR_NO_DEAD_STRIP"),
    (0x0800_0000, "S_ATTR_LIVE_SUPPORT"),
    (0x0400_0000, "S_ATTR_SELF_MODIFYING_CODE"),
    (0x0200_0000, "S_ATTR_DEBUG"),
    (0x0000_0400, "S_ATTR_SOME_INSTRUCTIONS"),
    (0x0000_0200, "S_ATTR_EXT_RELOC"),
    (0x0000_0100, "S_ATTR_LOC_RELOC"),
];

fn attribute_names(bits: u32, out: &mut Vec<String>) {
    for bit in (0..32).rev().map(|shift| 1u32 << shift) {
        if bits & bit != 0 {
            out.push(
                lookup(SECTION_ATTRIBUTES, bit)
                    .map(str::to_owned)
                    .unwrap_or_else(|| unknown(bit)),
            );
        }
    }
}

/// Section flags are a low-byte type followed by user-settable attributes
/// in the high byte and system-settable attributes in the middle bytes.
pub fn section_flags_name(flags: u32) -> String {
    let kind = flags & SECTION_TYPE_MASK;
    let mut parts = vec![
        lookup(SECTION_TYPES, kind)
            .map(str::to_owned)
            .unwrap_or_else(|| unknown(kind)),
    ];
    attribute_names(flags & SECTION_USER_ATTRIBUTES, &mut parts);
    attribute_names(flags & SECTION_SYSTEM_ATTRIBUTES, &mut parts);
    parts.join(", ")
}

pub fn platform_name(platform: u32) -> String {
    let name = match platform {
        1 => "MACOS",
        2 => "IOS",
        3 => "TVOS",
        4 => "WATCHOS",
        5 => "BRIDGEOS",
        6 => "MACCATALYST",
        7 => "IOSSIMULATOR",
        8 => "TVOSSIMULATOR",
        9 => "WATCHOSSIMULATOR",
        10 => "DRIVERKIT",
        11 => "VISIONOS",
        12 => "VISIONOSSIMULATOR",
        other => return unknown(other),
    };
    name.to_owned()
}

/// `xxxx.yy.zz` nibble-packed version used by the version load commands.
pub fn packed_version(version: u32) -> String {
    format!(
        "{}.{}.{}",
        version >> 16,
        (version >> 8) & 0xff,
        version & 0xff
    )
}

/// `a.b.c.d.e` packed as 24.10.10.10.10 bits.
pub fn source_version(version: u64) -> String {
    format!(
        "{}.{}.{}.{}.{}",
        version >> 40,
        (version >> 30) & 0x3ff,
        (version >> 20) & 0x3ff,
        (version >> 10) & 0x3ff,
        version & 0x3ff
    )
}
