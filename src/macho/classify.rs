//! Fat/thin Mach-O detection
//!
//! Only headers are read: the file is wrapped in an `object::ReadCache`, so
//! a multi-hundred-megabyte dylib costs a few small reads rather than a
//! full load.

use crate::error::ClassifyError;
use object::macho::{MachHeader32, MachHeader64, MH_BUNDLE, MH_DYLIB};
use object::read::macho::{FatArch, MachHeader, MachOFatFile32, MachOFatFile64};
use object::read::{ReadCache, ReadRef};
use object::{Endianness, FileKind};
use std::fs::File;
use std::path::Path;

/// What kind of image a Mach-O header describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRole {
    /// MH_DYLIB
    Dylib,
    /// MH_BUNDLE
    Bundle,
    /// Anything else (executables, object files, ...), with the raw filetype
    Other(u32),
}

impl ImageRole {
    pub fn from_filetype(filetype: u32) -> Self {
        match filetype {
            MH_DYLIB => ImageRole::Dylib,
            MH_BUNDLE => ImageRole::Bundle,
            other => ImageRole::Other(other),
        }
    }

    /// Only libraries and bundles have their symbols dumped
    pub fn is_dumpable(&self) -> bool {
        matches!(self, ImageRole::Dylib | ImageRole::Bundle)
    }
}

/// Header facts about one architecture-specific image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub role: ImageRole,
    pub cputype: u32,
    pub cpusubtype: u32,
}

/// Result of classifying a file that turned out to be Mach-O
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Multi-architecture container, one entry per slice
    Fat(Vec<ImageInfo>),
    /// Single-architecture image
    Thin(ImageInfo),
}

impl Classification {
    /// All images, in slice order
    pub fn images(&self) -> &[ImageInfo] {
        match self {
            Classification::Fat(images) => images,
            Classification::Thin(image) => std::slice::from_ref(image),
        }
    }
}

/// Opens a path and reports what binary images it contains
pub trait ImageClassifier: Send + Sync {
    /// `Err(ClassifyError::NotBinary)` means the file is simply not Mach-O
    fn classify(&self, path: &Path) -> Result<Classification, ClassifyError>;
}

/// Classifier backed by the `object` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct MachOClassifier;

impl ImageClassifier for MachOClassifier {
    fn classify(&self, path: &Path) -> Result<Classification, ClassifyError> {
        let file = File::open(path)?;
        let cache = ReadCache::new(file);
        classify_data(&cache)
    }
}

/// Classify an in-memory or cached Mach-O file
pub fn classify_data<'data, R: ReadRef<'data>>(data: R) -> Result<Classification, ClassifyError> {
    let kind = FileKind::parse(data).map_err(|_| ClassifyError::NotBinary)?;

    match kind {
        FileKind::MachOFat32 => {
            let fat = MachOFatFile32::parse(data)?;
            let images = fat
                .arches()
                .iter()
                .map(|arch| slice_info(data, arch))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Classification::Fat(images))
        }
        FileKind::MachOFat64 => {
            let fat = MachOFatFile64::parse(data)?;
            let images = fat
                .arches()
                .iter()
                .map(|arch| slice_info(data, arch))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Classification::Fat(images))
        }
        FileKind::MachO32 | FileKind::MachO64 => Ok(Classification::Thin(image_info(data, 0)?)),
        _ => Err(ClassifyError::NotBinary),
    }
}

fn slice_info<'data, R: ReadRef<'data>>(
    data: R,
    arch: &impl FatArch,
) -> Result<ImageInfo, ClassifyError> {
    let (offset, _size) = arch.file_range();
    image_info(data, offset)
}

fn image_info<'data, R: ReadRef<'data>>(data: R, offset: u64) -> Result<ImageInfo, ClassifyError> {
    match FileKind::parse_at(data, offset)? {
        FileKind::MachO32 => header_info(MachHeader32::<Endianness>::parse(data, offset)?),
        FileKind::MachO64 => header_info(MachHeader64::<Endianness>::parse(data, offset)?),
        _ => Err(ClassifyError::Parse(format!("no Mach-O header at offset {offset}"))),
    }
}

fn header_info<M: MachHeader>(header: &M) -> Result<ImageInfo, ClassifyError> {
    let endian = header.endian()?;
    Ok(ImageInfo {
        role: ImageRole::from_filetype(header.filetype(endian)),
        cputype: header.cputype(endian),
        cpusubtype: header.cpusubtype(endian),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use object::macho::{
        CPU_SUBTYPE_ARM64_ALL, CPU_SUBTYPE_X86_64_ALL, CPU_TYPE_ARM64, CPU_TYPE_X86_64,
        MH_EXECUTE,
    };
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MH_MAGIC_64: u32 = 0xfeed_facf;
    const FAT_MAGIC: u32 = 0xcafe_babe;

    /// 32-byte little-endian mach_header_64 with no load commands
    pub(crate) fn thin_header(cputype: u32, cpusubtype: u32, filetype: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(32);
        for field in [MH_MAGIC_64, cputype, cpusubtype, filetype, 0, 0, 0, 0] {
            out.extend_from_slice(&field.to_le_bytes());
        }
        out
    }

    /// Big-endian fat container with each slice page aligned
    pub(crate) fn fat_file(slices: &[(u32, u32, u32)]) -> Vec<u8> {
        const ALIGN: usize = 0x1000;
        let mut out = Vec::new();
        out.extend_from_slice(&FAT_MAGIC.to_be_bytes());
        out.extend_from_slice(&(slices.len() as u32).to_be_bytes());
        for (i, (cputype, cpusubtype, _)) in slices.iter().enumerate() {
            let offset = (ALIGN * (i + 1)) as u32;
            for field in [*cputype, *cpusubtype, offset, 32, 12] {
                out.extend_from_slice(&field.to_be_bytes());
            }
        }
        for (i, (cputype, cpusubtype, filetype)) in slices.iter().enumerate() {
            out.resize(ALIGN * (i + 1), 0);
            out.extend_from_slice(&thin_header(*cputype, *cpusubtype, *filetype));
        }
        out
    }

    fn write_temp(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_thin_dylib() {
        let file = write_temp(&thin_header(CPU_TYPE_X86_64, CPU_SUBTYPE_X86_64_ALL, MH_DYLIB));
        let classification = MachOClassifier.classify(file.path()).unwrap();

        assert_eq!(
            classification,
            Classification::Thin(ImageInfo {
                role: ImageRole::Dylib,
                cputype: CPU_TYPE_X86_64,
                cpusubtype: CPU_SUBTYPE_X86_64_ALL,
            })
        );
        assert_eq!(classification.images().len(), 1);
    }

    #[test]
    fn test_fat_container() {
        let bytes = fat_file(&[
            (CPU_TYPE_X86_64, CPU_SUBTYPE_X86_64_ALL, MH_DYLIB),
            (CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64_ALL, MH_BUNDLE),
        ]);
        let file = write_temp(&bytes);
        let classification = MachOClassifier.classify(file.path()).unwrap();

        let images = classification.images();
        assert!(matches!(classification, Classification::Fat(_)));
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].cputype, CPU_TYPE_X86_64);
        assert_eq!(images[0].role, ImageRole::Dylib);
        assert_eq!(images[1].cputype, CPU_TYPE_ARM64);
        assert_eq!(images[1].role, ImageRole::Bundle);
    }

    #[test]
    fn test_truncated_fat_container() {
        let mut bytes = fat_file(&[
            (CPU_TYPE_X86_64, CPU_SUBTYPE_X86_64_ALL, MH_DYLIB),
            (CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64_ALL, MH_DYLIB),
        ]);
        // Header and first fat_arch only
        bytes.truncate(30);

        let err = classify_data(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, ClassifyError::Parse(_)));
    }

    #[test]
    fn test_executable_role() {
        let bytes = thin_header(CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64_ALL, MH_EXECUTE);
        let classification = classify_data(bytes.as_slice()).unwrap();
        let role = classification.images()[0].role;
        assert_eq!(role, ImageRole::Other(MH_EXECUTE));
        assert!(!role.is_dumpable());
    }

    #[test]
    fn test_not_binary() {
        let file = write_temp(b"#!/bin/sh\necho not a library\n");
        let err = MachOClassifier.classify(file.path()).unwrap_err();
        assert!(err.is_not_binary());

        let err = classify_data(&b""[..]).unwrap_err();
        assert!(err.is_not_binary());
    }

    #[test]
    fn test_missing_file() {
        let err = MachOClassifier
            .classify(Path::new("/nonexistent/libnothing.dylib"))
            .unwrap_err();
        assert!(matches!(err, ClassifyError::Io(_)));
    }
}
