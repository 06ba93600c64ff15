//! Bulk transfer between host data and cartridge files.
//!
//! Archives are ZIP files; every regular entry becomes one cartridge file
//! named by its path inside the archive.

use std::io::{Read, Seek};

use log::debug;
use serde::Serialize;
use zip::ZipArchive;

use crate::driver::CartDriver;
use crate::error::{CartError, CartResult};
use crate::transport::CartTransport;

/// A file copied onto the cartridges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportedFile {
    pub name: String,
    pub bytes: usize,
}

/// Write `data` as the file `name`.
///
/// An existing file is overwritten from offset 0; a longer old tail is kept.
pub fn import_file<T: CartTransport>(
    driver: &mut CartDriver<T>,
    name: &str,
    data: &[u8],
) -> CartResult<ImportedFile> {
    let handle = driver.open(name)?;
    let result = driver.write(handle, data);
    driver.close(handle)?;
    let bytes = result?;
    debug!("imported {} ({} bytes)", name, bytes);
    Ok(ImportedFile {
        name: name.to_string(),
        bytes,
    })
}

/// Import every regular entry of a ZIP archive.
pub fn import_archive<T: CartTransport, R: Read + Seek>(
    driver: &mut CartDriver<T>,
    reader: R,
) -> CartResult<Vec<ImportedFile>> {
    let mut archive = ZipArchive::new(reader).map_err(CartError::Zip)?;
    let mut imported = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(CartError::Zip)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;

        imported.push(import_file(driver, &name, &content)?);
    }

    Ok(imported)
}

/// Read a whole file back.
pub fn export_file<T: CartTransport>(driver: &mut CartDriver<T>, name: &str) -> CartResult<Vec<u8>> {
    let handle = driver.open(name)?;
    let result = driver
        .file_length(handle)
        .and_then(|len| driver.read_vec(handle, len as usize));
    driver.close(handle)?;
    result
}
