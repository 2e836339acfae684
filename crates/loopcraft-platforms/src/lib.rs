//! Hardware template catalogs.
//!
//! Templates are written in the kernel text format and compiled into the
//! crate; [`catalog`] parses and registers them on demand.

use derive_more::{Display, Error, From};
use loopcraft_ir::{ParseError, parse_procs};
use loopcraft_passes::{ScheduleError, TemplateCatalog};

const AVX2: &str = include_str!("../lib/avx2.lc");

/// A target whose templates ship with loopcraft.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Platform {
    Avx2,
}

impl Platform {
    pub const ALL: &'static [Platform] = &[Platform::Avx2];

    pub fn name(self) -> &'static str {
        match self {
            Platform::Avx2 => "avx2",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.name() == name)
    }

    fn source(self) -> &'static str {
        match self {
            Platform::Avx2 => AVX2,
        }
    }
}

#[derive(Debug, Display, Error, From)]
pub enum PlatformError {
    #[display("template source does not parse: {_0}")]
    Parse(ParseError),
    #[display("template rejected: {_0}")]
    Register(ScheduleError),
}

/// Templates for `platform`.
pub fn catalog(platform: Platform) -> Result<TemplateCatalog, PlatformError> {
    load_catalog(platform.source())
}

/// Parse every procedure in `source` and register it as a template.
pub fn load_catalog(source: &str) -> Result<TemplateCatalog, PlatformError> {
    let mut catalog = TemplateCatalog::new();
    extend_catalog(&mut catalog, source)?;
    Ok(catalog)
}

/// Extend `catalog` with the templates in `source`.
pub fn extend_catalog(catalog: &mut TemplateCatalog, source: &str) -> Result<(), PlatformError> {
    for template in parse_procs(source)? {
        catalog.register(template)?;
    }
    Ok(())
}
