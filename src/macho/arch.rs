//! CPU architecture naming
//!
//! The name passed to `dump_syms -a` is derived from the image's
//! (cputype, cpusubtype) pair. A small override table handles pairs the
//! host lookup gets wrong, everything else goes to the fallback resolver.

use object::macho::{
    CPU_SUBTYPE_ARM64E, CPU_SUBTYPE_ARM64_ALL, CPU_SUBTYPE_ARM_ALL, CPU_SUBTYPE_ARM_V6,
    CPU_SUBTYPE_ARM_V7, CPU_SUBTYPE_ARM_V7F, CPU_SUBTYPE_ARM_V7K, CPU_SUBTYPE_ARM_V7S,
    CPU_SUBTYPE_I386_ALL, CPU_SUBTYPE_MASK, CPU_SUBTYPE_POWERPC_ALL, CPU_SUBTYPE_X86_64_ALL,
    CPU_SUBTYPE_X86_64_H, CPU_TYPE_ARM, CPU_TYPE_ARM64, CPU_TYPE_POWERPC, CPU_TYPE_POWERPC64,
    CPU_TYPE_X86, CPU_TYPE_X86_64,
};

/// Maps a CPU type/subtype pair to an architecture name
pub trait ArchResolver: Send + Sync {
    /// Returns `None` if the pair is unknown
    fn arch_name(&self, cputype: u32, cpusubtype: u32) -> Option<String>;
}

/// Pairs matched exactly before consulting the fallback
const OVERRIDES: &[(u32, u32, &str)] = &[
    (CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64_ALL, "arm64"),
    (CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V7K, "armv7k"),
];

/// Portable stand-in for the host's architecture lookup
///
/// Capability bits in the high byte of the subtype are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostArchTable;

impl ArchResolver for HostArchTable {
    fn arch_name(&self, cputype: u32, cpusubtype: u32) -> Option<String> {
        let name = match (cputype, cpusubtype & !CPU_SUBTYPE_MASK) {
            (CPU_TYPE_X86, CPU_SUBTYPE_I386_ALL) => "i386",
            (CPU_TYPE_X86_64, CPU_SUBTYPE_X86_64_ALL) => "x86_64",
            (CPU_TYPE_X86_64, CPU_SUBTYPE_X86_64_H) => "x86_64h",
            (CPU_TYPE_ARM, CPU_SUBTYPE_ARM_ALL) => "arm",
            (CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V6) => "armv6",
            (CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V7) => "armv7",
            (CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V7F) => "armv7f",
            (CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V7S) => "armv7s",
            (CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64E) => "arm64e",
            (CPU_TYPE_POWERPC, CPU_SUBTYPE_POWERPC_ALL) => "ppc",
            (CPU_TYPE_POWERPC64, CPU_SUBTYPE_POWERPC_ALL) => "ppc64",
            _ => return None,
        };
        Some(name.to_string())
    }
}

/// Applies the override table, then defers to `fallback`
#[derive(Debug, Clone, Default)]
pub struct OverrideResolver<F = HostArchTable> {
    fallback: F,
}

impl<F: ArchResolver> OverrideResolver<F> {
    pub fn new(fallback: F) -> Self {
        Self { fallback }
    }
}

impl OverrideResolver<HostArchTable> {
    /// Overrides backed by the built-in host table
    pub fn host() -> Self {
        Self::new(HostArchTable)
    }
}

impl<F: ArchResolver> ArchResolver for OverrideResolver<F> {
    fn arch_name(&self, cputype: u32, cpusubtype: u32) -> Option<String> {
        OVERRIDES
            .iter()
            .find(|(t, s, _)| *t == cputype && *s == cpusubtype)
            .map(|(_, _, name)| name.to_string())
            .or_else(|| self.fallback.arch_name(cputype, cpusubtype))
    }
}
