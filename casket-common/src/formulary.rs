// casket-common/src/formulary.rs
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use tracing::debug;

use super::cache::Cache;
use super::config::Config;
use super::error::{CasketError, Result};
use super::model::{Cask, Formula, Package, PackageId, PackageKind};

const CASK_API_FILE: &str = "cask.json";
const FORMULA_API_FILE: &str = "formula.json";

/// Resolves a name to a parsed definition.
///
/// Three outcomes: the definition, `NotFound`, or `InvalidDefinition`.
pub trait PackageSource: Send + Sync {
    fn load_cask(&self, token: &str) -> Result<Arc<Cask>>;

    fn load_formula(&self, name: &str) -> Result<Arc<Formula>>;

    fn load_cask_from_path(&self, path: &Path) -> Result<Arc<Cask>> {
        let token = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let raw = fs::read_to_string(path)
            .map_err(|e| CasketError::InvalidDefinition(token.clone(), e.to_string()))?;
        serde_json::from_str::<Cask>(&raw)
            .map(Arc::new)
            .map_err(|e| CasketError::InvalidDefinition(token, e.to_string()))
    }

    fn load(&self, id: &PackageId) -> Result<Package> {
        match id.kind {
            PackageKind::Cask => self.load_cask(&id.name).map(Package::Cask),
            PackageKind::Formula => self.load_formula(&id.name).map(Package::Formula),
        }
    }
}

/// Loads definitions from tapped JSON files, then from the API cache.
pub struct Formulary {
    config: Config,
    cache: Cache,
    casks: Mutex<HashMap<String, Arc<Cask>>>,
    formulae: Mutex<HashMap<String, Arc<Formula>>>,
}

impl Formulary {
    pub fn new(config: Config) -> Result<Self> {
        let cache = Cache::new(&config)?;
        Ok(Self {
            config,
            cache,
            casks: Mutex::new(HashMap::new()),
            formulae: Mutex::new(HashMap::new()),
        })
    }

    fn tap_file(&self, full_name: &str, subdir: &str) -> Option<(PathBuf, String)> {
        let parts: Vec<&str> = full_name.split('/').collect();
        if parts.len() != 3 {
            return None;
        }
        let tap = format!("{}/{}", parts[0], parts[1]);
        let path = self
            .config
            .get_tap_path(&tap)?
            .join(subdir)
            .join(format!("{}.json", parts[2]));
        Some((path, parts[2].to_string()))
    }

    fn load_definition<T: DeserializeOwned>(
        &self,
        name: &str,
        subdir: &str,
        default_tap: &str,
        api_file: &str,
        key: &str,
    ) -> Result<T> {
        let lowered = name.to_ascii_lowercase();
        let (tap_path, short) = match self.tap_file(&lowered, subdir) {
            Some(found) => found,
            None => {
                let full = format!("{default_tap}/{lowered}");
                match self.tap_file(&full, subdir) {
                    Some(found) => found,
                    None => return Err(CasketError::NotFound(name.to_string())),
                }
            }
        };

        if tap_path.is_file() {
            debug!("Loading '{}' from tap file {}", name, tap_path.display());
            let raw = fs::read_to_string(&tap_path)?;
            return serde_json::from_str(&raw)
                .map_err(|e| CasketError::InvalidDefinition(name.to_string(), e.to_string()));
        }
        if lowered.contains('/') && !lowered.starts_with(&format!("{default_tap}/")) {
            return Err(CasketError::NotFound(name.to_string()));
        }

        let raw = match self.cache.load_raw(api_file) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("No API cache available for '{}': {}", name, e);
                return Err(CasketError::NotFound(name.to_string()));
            }
        };
        let entries: Vec<serde_json::Value> = serde_json::from_str(&raw)
            .map_err(|e| CasketError::Cache(format!("Failed to parse cached {api_file}: {e}")))?;
        let entry = entries
            .into_iter()
            .find(|v| v.get(key).and_then(|t| t.as_str()) == Some(short.as_str()))
            .ok_or_else(|| CasketError::NotFound(name.to_string()))?;
        serde_json::from_value(entry)
            .map_err(|e| CasketError::InvalidDefinition(name.to_string(), e.to_string()))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<std::sync::MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| CasketError::Generic("definition cache lock poisoned".to_string()))
}

impl PackageSource for Formulary {
    fn load_cask(&self, token: &str) -> Result<Arc<Cask>> {
        if let Some(cask) = lock(&self.casks)?.get(token) {
            debug!("Loaded cask '{}' from parsed cache.", token);
            return Ok(Arc::clone(cask));
        }
        let cask: Cask = self.load_definition(
            token,
            "Casks",
            PackageKind::Cask.default_tap(),
            CASK_API_FILE,
            "token",
        )?;
        let cask = Arc::new(cask);
        lock(&self.casks)?.insert(token.to_string(), Arc::clone(&cask));
        Ok(cask)
    }

    fn load_formula(&self, name: &str) -> Result<Arc<Formula>> {
        if let Some(formula) = lock(&self.formulae)?.get(name) {
            debug!("Loaded formula '{}' from parsed cache.", name);
            return Ok(Arc::clone(formula));
        }
        let formula: Formula = self.load_definition(
            name,
            "Formula",
            PackageKind::Formula.default_tap(),
            FORMULA_API_FILE,
            "name",
        )?;
        let formula = Arc::new(formula);
        lock(&self.formulae)?.insert(name.to_string(), Arc::clone(&formula));
        Ok(formula)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn setup() -> (tempfile::TempDir, Formulary, Config) {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_prefix(tmp.path().join("prefix"), tmp.path().join("home"));
        let formulary = Formulary::new(config.clone()).unwrap();
        (tmp, formulary, config)
    }

    #[test]
    fn loads_from_tap_then_api_cache() {
        let (_tmp, formulary, config) = setup();
        let casks_dir = config.taps_dir().join("acme/homebrew-tools/Casks");
        fs::create_dir_all(&casks_dir).unwrap();
        fs::write(
            casks_dir.join("widget.json"),
            json!({"token": "widget", "version": "2.0"}).to_string(),
        )
        .unwrap();
        Cache::new(&config)
            .unwrap()
            .store_raw(
                "cask.json",
                &json!([{"token": "foo", "version": "1.0"}]).to_string(),
            )
            .unwrap();

        let tapped = formulary.load_cask("acme/tools/widget").unwrap();
        assert_eq!(tapped.version_str(), "2.0");
        let api = formulary.load_cask("foo").unwrap();
        assert_eq!(api.version_str(), "1.0");
    }

    #[test]
    fn distinguishes_missing_from_invalid() {
        let (_tmp, formulary, config) = setup();
        Cache::new(&config)
            .unwrap()
            .store_raw(
                "cask.json",
                &json!([{"token": "broken", "version": 7}]).to_string(),
            )
            .unwrap();

        assert!(matches!(
            formulary.load_cask("nope"),
            Err(CasketError::NotFound(_))
        ));
        assert!(matches!(
            formulary.load_cask("broken"),
            Err(CasketError::InvalidDefinition(..))
        ));
        assert!(matches!(
            formulary.load_cask("other/tap/nope"),
            Err(CasketError::NotFound(_))
        ));
    }
}
