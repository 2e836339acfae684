//! Hardware templates.
//!
//! A template is a [`Proc`] carrying an `@instr` emission string. Its body
//! is the semantics of the instruction: the code it stands for, over
//! fixed-shape buffer parameters. [`TemplateCatalog`] holds the templates a
//! schedule may substitute, keyed by name.

pub(crate) mod matcher;

use std::collections::BTreeMap;

use loopcraft_ir::{Param, Proc, TemplateLookup, validate};

use crate::error::{ScheduleError, ScheduleResult};

#[derive(Clone, Debug, Default)]
pub struct TemplateCatalog {
    templates: BTreeMap<String, Proc>,
}

impl TemplateCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template.
    ///
    /// A template must carry an `@instr` string, take only buffer
    /// parameters of constant shape, and access every parameter in its
    /// body.
    pub fn register(&mut self, template: Proc) -> ScheduleResult<()> {
        let name = template.name.clone();
        let reject = |reason: String| Err(ScheduleError::template(&name, reason));
        if template.instr.is_none() {
            return reject("missing `@instr` emission string".into());
        }
        if self.templates.contains_key(&name) {
            return Err(ScheduleError::collision(&name));
        }
        for p in &template.params {
            let Param::Buffer(d) = p else {
                return reject(format!("parameter `{}` is not a buffer", p.name()));
            };
            if d.shape.iter().any(|e| e.as_int().is_none()) {
                return reject(format!("parameter `{}` has a symbolic shape", d.name));
            }
            if !template.body.uses_buffer(&d.name) {
                return reject(format!("parameter `{}` is never accessed", d.name));
            }
        }
        if let Err(e) = validate(&template, None) {
            return reject(e.to_string());
        }
        tracing::debug!(template = %name, "registered template");
        self.templates.insert(name, template);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Proc> {
        self.templates.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl TemplateLookup for TemplateCatalog {
    fn template(&self, name: &str) -> Option<&Proc> {
        self.get(name)
    }
}
