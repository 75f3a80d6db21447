use dbrpc_core::error::RpcError;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverEntry {
    pub name: String,
    /// Shell command that starts the driver.
    pub command: String,
}

/// Driver name to startup command mapping, one `name:command` per line.
/// Blank lines and lines starting with `#` are ignored.
#[derive(Debug, Clone, Default)]
pub struct DriverCatalog {
    entries: Vec<DriverEntry>,
}

impl DriverCatalog {
    pub fn parse(text: &str) -> Result<Self, RpcError> {
        let mut entries: Vec<DriverEntry> = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (name, command) = line.split_once(':').ok_or_else(|| {
                RpcError::Catalog(format!("line {}: expected name:command", lineno + 1))
            })?;
            let (name, command) = (name.trim(), command.trim());
            if name.is_empty() || command.is_empty() {
                return Err(RpcError::Catalog(format!(
                    "line {}: empty driver name or command",
                    lineno + 1
                )));
            }
            // First definition wins.
            if entries.iter().any(|e| e.name == name) {
                continue;
            }
            entries.push(DriverEntry {
                name: name.to_string(),
                command: command.to_string(),
            });
        }
        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> Result<Self, RpcError> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| RpcError::Catalog(format!("{}: {err}", path.display())))?;
        Self::parse(&text)
    }

    pub fn find(&self, name: &str) -> Option<&DriverEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn entries(&self) -> &[DriverEntry] {
        &self.entries
    }
}
