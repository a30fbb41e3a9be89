use crate::error::Error;
use crate::image::ContainerImage;
use crate::parser::Parser;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;
use tracing::{debug, info};
use zip::ZipArchive;

const INFO_PLIST: &str = "Contents/Info.plist";
const EXECUTABLE_KEY: &str = "CFBundleExecutable";

/// Archive member holding the main executable of the first application
/// bundle found in the archive.
pub fn bundle_executable<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
) -> Result<Option<String>, Error> {
    let names = archive
        .file_names()
        .map(str::to_owned)
        .collect::<Vec<_>>();

    // Shortest match is the outermost bundle.
    let Some(plist_name) = names
        .iter()
        .filter(|name| {
            name.strip_suffix(INFO_PLIST)
                .is_some_and(|app| app.ends_with(".app/"))
        })
        .min_by_key(|name| name.len())
    else {
        return Ok(None);
    };
    let app_dir = &plist_name[..plist_name.len() - INFO_PLIST.len()];

    let mut buf = Vec::new();
    archive.by_name(plist_name)?.read_to_end(&mut buf)?;
    let plist = plist::Value::from_reader(Cursor::new(buf))?;
    let Some(executable) = plist
        .as_dictionary()
        .and_then(|dict| dict.get(EXECUTABLE_KEY))
        .and_then(|value| value.as_string())
    else {
        debug!(%plist_name, "bundle has no executable key");
        return Ok(None);
    };

    let preferred = format!("{app_dir}Contents/MacOS/{executable}");
    if names.contains(&preferred) {
        return Ok(Some(preferred));
    }
    Ok(names
        .iter()
        .filter(|name| name.starts_with(app_dir))
        .find(|name| name.rsplit('/').next() == Some(executable))
        .cloned())
}

/// Parse the main executable of an application bundle shipped inside a zip
/// archive. The executable is extracted to a temporary file that is removed
/// once parsed.
pub fn parse_bundle(parser: &Parser, path: &Path) -> Result<ContainerImage, Error> {
    let mut archive = ZipArchive::new(std::fs::File::open(path)?)?;
    let member = bundle_executable(&mut archive)?.ok_or_else(|| Error::NoBundle {
        path: path.to_owned(),
    })?;
    info!(archive = %path.display(), %member, "parsing bundle executable");

    let mut extracted = tempfile::NamedTempFile::new()?;
    std::io::copy(&mut archive.by_name(&member)?, extracted.as_file_mut())?;
    extracted.as_file_mut().flush()?;

    let mut image = parser.parse(extracted.path())?;
    image.path = path.join(&member);
    Ok(image)
}
