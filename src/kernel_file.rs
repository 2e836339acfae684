//! Kernel files: the procedures to schedule, plus any extra templates.

use derive_more::{Display, Error, From};
use loopcraft_ir::{ParseError, Proc, parse_procs, validate};
use loopcraft_passes::{ScheduleError, TemplateCatalog};
use loopcraft_platforms::{Platform, PlatformError};

/// Procedures of one kernel file. Procedures carrying `@instr` are
/// templates; everything else is a kernel.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KernelFile {
    pub kernels: Vec<Proc>,
    pub templates: Vec<Proc>,
}

#[derive(Debug, Display, Error, From)]
pub enum KernelFileError {
    #[display("{_0}")]
    Parse(ParseError),

    #[display("{_0}")]
    Platform(PlatformError),

    #[display("the file defines no kernel")]
    #[from(ignore)]
    NoKernel,

    #[display("the file defines several kernels ({}); pick one with --name", names.join(", "))]
    #[from(ignore)]
    AmbiguousKernel {
        #[error(not(source))]
        names: Vec<String>,
    },

    #[display("no kernel named `{name}`")]
    #[from(ignore)]
    UnknownKernel {
        #[error(not(source))]
        name: String,
    },

    #[display("kernel `{kernel}` is malformed: {source}")]
    #[from(ignore)]
    Invalid {
        #[error(not(source))]
        kernel: String,
        source: ScheduleError,
    },
}

impl KernelFile {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let (templates, kernels) = parse_procs(text)?.into_iter().partition(|p| p.instr.is_some());
        Ok(KernelFile { kernels, templates })
    }

    /// The kernel called `name`, or the only kernel when no name is given.
    pub fn kernel(&self, name: Option<&str>) -> Result<&Proc, KernelFileError> {
        match name {
            Some(name) => self
                .kernels
                .iter()
                .find(|p| p.name == name)
                .ok_or_else(|| KernelFileError::UnknownKernel { name: name.to_owned() }),
            None => match self.kernels.as_slice() {
                [] => Err(KernelFileError::NoKernel),
                [only] => Ok(only),
                many => Err(KernelFileError::AmbiguousKernel {
                    names: many.iter().map(|p| p.name.clone()).collect(),
                }),
            },
        }
    }

    /// The platform's templates followed by the file's own.
    pub fn catalog(&self, platform: Platform) -> Result<TemplateCatalog, KernelFileError> {
        let mut catalog = loopcraft_platforms::catalog(platform)?;
        for template in &self.templates {
            catalog
                .register(template.clone())
                .map_err(PlatformError::Register)?;
        }
        Ok(catalog)
    }

    /// Select a kernel and check it is well formed against `catalog`.
    pub fn checked_kernel(&self, name: Option<&str>, catalog: &TemplateCatalog) -> Result<&Proc, KernelFileError> {
        let kernel = self.kernel(name)?;
        validate(kernel, Some(catalog)).map_err(|e| KernelFileError::Invalid {
            kernel: kernel.name.clone(),
            source: e.into(),
        })?;
        Ok(kernel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = r#"
        @instr("vzero({out});")
        proc zero8(out: f32[8] @ DRAM) { for i in seq(8) { out[i] = 0.0; } }

        proc clear(A: f32[4, 8] @ DRAM) {
          for r in par(4) { for c in par(8) { A[r, c] = 0.0; } }
        }

        proc copy(A: f32[8] @ DRAM, B: f32[8] @ DRAM) { for i in par(8) { B[i] = A[i]; } }
    "#;

    #[test]
    fn test_partition_templates_and_kernels() {
        let file = KernelFile::parse(FILE).unwrap();
        assert_eq!(file.templates.len(), 1);
        assert_eq!(file.kernels.len(), 2);
        assert_eq!(file.kernel(Some("copy")).unwrap().name, "copy");
    }

    #[test]
    fn test_kernel_selection_errors() {
        let file = KernelFile::parse(FILE).unwrap();
        assert!(matches!(
            file.kernel(None),
            Err(KernelFileError::AmbiguousKernel { names }) if names == ["clear", "copy"]
        ));
        assert!(matches!(
            file.kernel(Some("gemm")),
            Err(KernelFileError::UnknownKernel { .. })
        ));
        assert!(matches!(
            KernelFile::default().kernel(None),
            Err(KernelFileError::NoKernel)
        ));
    }

    #[test]
    fn test_catalog_includes_file_templates() {
        let file = KernelFile::parse(FILE).unwrap();
        let catalog = file.catalog(Platform::Avx2).unwrap();
        assert!(catalog.get("zero8").is_some());
        assert!(catalog.get("mm256_loadu_ps").is_some());
        assert!(file.checked_kernel(Some("clear"), &catalog).is_ok());
    }
}
