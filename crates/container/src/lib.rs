#![forbid(unsafe_code)]

//! Static inspection of Mach-O executable containers.

mod bundle;
mod error;
mod image;
mod names;
mod parser;
mod reader;
mod signature;

pub use bundle::{bundle_executable, parse_bundle};
pub use error::{DecodeError, Error};
pub use image::{
    CommandContent, ContainerImage, DysymtabCommand, FatArch, FatHeader, HeaderRecord,
    LoadCommand, NO_NAME, Section, Segment, Symbols, SymtabCommand,
};
pub use names::{
    cpu_subtype_name, cpu_type_name, file_type_name, header_flag_names, load_command_name,
    section_flags_name, vm_protection_name,
};
pub use parser::{Parser, is_container, parse_bytes};
pub use reader::Endian;
pub use signature::SignatureInspector;

use std::io::Read;
use std::path::Path;

const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";

/// Parse a container file with the default signature inspector.
pub fn parse(path: impl AsRef<Path>) -> Result<ContainerImage, Error> {
    Parser::default().parse(path)
}

/// Short content-type description from the leading bytes, in the style of
/// libmagic. Only the formats this crate understands are recognized.
pub fn describe(data: &[u8]) -> Option<&'static str> {
    if is_container(data) {
        Some("Mach-O executable")
    } else if data.starts_with(ZIP_MAGIC) {
        Some("Zip archive data")
    } else {
        None
    }
}

/// [`describe`] applied to the first bytes of a file.
pub fn describe_file(path: impl AsRef<Path>) -> Option<&'static str> {
    let mut head = [0u8; 8];
    let read = std::fs::File::open(path).and_then(|mut file| file.read(&mut head)).ok()?;
    describe(&head[..read])
}

/// Parse a container or, for zip archives, the application bundle inside.
pub fn inspect(parser: &Parser, path: impl AsRef<Path>) -> Result<ContainerImage, Error> {
    let path = path.as_ref();
    let mut magic = [0u8; 4];
    let read = std::fs::File::open(path)?.read(&mut magic)?;
    if read == magic.len() && &magic == ZIP_MAGIC {
        parse_bundle(parser, path)
    } else {
        parser.parse(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_known_magic() {
        assert_eq!(describe(&[0xcf, 0xfa, 0xed, 0xfe, 7, 0, 0, 1]), Some("Mach-O executable"));
        assert_eq!(describe(&[0xca, 0xfe, 0xba, 0xbe, 0, 0, 0, 2]), Some("Mach-O executable"));
        assert_eq!(describe(b"PK\x03\x04rest"), Some("Zip archive data"));
        assert_eq!(describe(b"%PDF-1.7"), None);
        assert_eq!(describe(b""), None);
    }
}
