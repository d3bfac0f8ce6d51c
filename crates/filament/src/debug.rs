//! Debug views of a file service registry.
//!
//! ```ignore
//! let view = service.registry_debug();
//! println!("{view}");
//! // File service #1 (2 live):
//! //   ImplId(1v1)  FileHandle(5)       generation 0
//! //   ImplId(2v1)  closed              generation 3 (destroyed)
//! ```

use std::fmt;

use crate::service::RegistryEntry;

/// Output style for [`RegistryDebug`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistryStyle {
    /// One line per implementation.
    #[default]
    Table,
    /// Everything on a single line.
    Compact,
}

/// A snapshot of a service registry that formats itself for humans.
///
/// The snapshot is taken when the value is created; it does not follow
/// later changes to the service.
#[derive(Debug, Clone)]
pub struct RegistryDebug {
    service: u64,
    entries: Vec<RegistryEntry>,
    style: RegistryStyle,
}

impl RegistryDebug {
    pub(crate) fn new(service: u64, entries: Vec<RegistryEntry>) -> Self {
        Self {
            service,
            entries,
            style: RegistryStyle::default(),
        }
    }

    /// Use a different output style.
    pub fn with_style(mut self, style: RegistryStyle) -> Self {
        self.style = style;
        self
    }

    /// Number of implementations in the snapshot.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of implementations holding an open handle.
    pub fn open_count(&self) -> usize {
        self.entries.iter().filter(|e| e.handle.is_open()).count()
    }

    fn write_entry(&self, f: &mut fmt::Formatter<'_>, entry: &RegistryEntry) -> fmt::Result {
        let handle = if entry.handle.is_open() {
            format!("{:?}", entry.handle)
        } else {
            "closed".to_string()
        };
        write!(f, "{:?}  {handle:<18}  generation {}", entry.id, entry.generation)?;
        if entry.destroyed {
            write!(f, " (destroyed)")?;
        }
        Ok(())
    }
}

impl fmt::Display for RegistryDebug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.style {
            RegistryStyle::Table => {
                writeln!(f, "File service #{} ({} live):", self.service, self.entries.len())?;
                if self.entries.is_empty() {
                    return writeln!(f, "  (empty)");
                }
                for entry in &self.entries {
                    write!(f, "  ")?;
                    self.write_entry(f, entry)?;
                    writeln!(f)?;
                }
                Ok(())
            }
            RegistryStyle::Compact => {
                write!(
                    f,
                    "service #{}: {} live, {} open [",
                    self.service,
                    self.entries.len(),
                    self.open_count()
                )?;
                for (i, entry) in self.entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}", entry.id)?;
                }
                write!(f, "]")
            }
        }
    }
}
