use serde::{Deserialize, Deserializer, Serialize, de};

use crate::config::ConfigError;
use crate::sandbox::patch::PatchSpec;

/// Import module names may not exceed this many bytes
const MAX_MODULE_NAME_LEN: usize = 1024;

/// Name of a WebAssembly import module (e.g., "system")
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleName(String);

impl ModuleName {
    pub fn new(name: &str) -> Result<Self, ConfigError> {
        if name.is_empty() {
            return Err(ConfigError::InvalidModuleName(
                "module name is empty".to_owned(),
            ));
        }
        if name.len() > MAX_MODULE_NAME_LEN {
            return Err(ConfigError::InvalidModuleName(format!(
                "module name is longer than {MAX_MODULE_NAME_LEN} bytes"
            )));
        }
        if name.chars().any(char::is_control) {
            return Err(ConfigError::InvalidModuleName(format!(
                "module name {name:?} contains control characters"
            )));
        }
        Ok(Self(name.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for ModuleName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ModuleName::new(&s).map_err(de::Error::custom)
    }
}

impl std::fmt::Display for ModuleName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maps a standard facility's import module to its sandbox substitute
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Redirect {
    /// Module name that submitted programs import (e.g., "system")
    pub standard: ModuleName,

    /// Module name defined by the sandbox linker (e.g., "sandbox/system")
    pub substitute: ModuleName,
}

impl Redirect {
    fn new(standard: &str, substitute: &str) -> Self {
        Self {
            standard: ModuleName(standard.to_owned()),
            substitute: ModuleName(substitute.to_owned()),
        }
    }

    /// The patch that retargets this facility
    pub fn patch(&self) -> PatchSpec {
        PatchSpec::new(self.standard.as_str(), self.substitute.as_str())
    }
}

/// The redirected standard facilities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Facilities {
    /// Standard output and error provider
    #[serde(default = "default_system")]
    pub system: Redirect,

    /// Standard input scanner
    #[serde(default = "default_scanner")]
    pub scanner: Redirect,
}

impl Facilities {
    /// Patches applied to every compiled module, in order
    pub fn patches(&self) -> [PatchSpec; 2] {
        [self.system.patch(), self.scanner.patch()]
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        for (id, redirect) in [("system", &self.system), ("scanner", &self.scanner)] {
            if redirect.standard == redirect.substitute {
                return Err(ConfigError::Invalid(format!(
                    "facility '{id}' redirects '{}' to itself",
                    redirect.standard
                )));
            }
        }

        let names = [
            &self.system.standard,
            &self.system.substitute,
            &self.scanner.standard,
            &self.scanner.substitute,
        ];
        for (i, a) in names.iter().enumerate() {
            if names[i + 1..].contains(a) {
                return Err(ConfigError::Invalid(format!(
                    "module name '{a}' is used by more than one facility"
                )));
            }
        }

        Ok(())
    }
}

impl Default for Facilities {
    fn default() -> Self {
        Self {
            system: default_system(),
            scanner: default_scanner(),
        }
    }
}

fn default_system() -> Redirect {
    Redirect::new("system", "sandbox/system")
}

fn default_scanner() -> Redirect {
    Redirect::new("scanner", "sandbox/scanner")
}
