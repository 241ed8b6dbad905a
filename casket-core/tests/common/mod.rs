// casket-core/tests/common/mod.rs
#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use casket_common::config::Config;
use casket_common::error::{CasketError, Result};
use casket_common::formulary::PackageSource;
use casket_common::model::{Cask, CaskTab, Formula};
use casket_core::{CaskInstaller, FormulaInstaller, NoQuarantine};
use casket_net::{DownloadBackend, DownloadRequest};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use tempfile::TempDir;

/// Definitions held in memory; tests swap them to simulate new releases.
#[derive(Default)]
pub struct MapSource {
    casks: Mutex<HashMap<String, Arc<Cask>>>,
    formulae: Mutex<HashMap<String, Arc<Formula>>>,
}

impl MapSource {
    pub fn put_cask(&self, definition: Value) -> Arc<Cask> {
        let cask: Arc<Cask> = Arc::new(serde_json::from_value(definition).unwrap());
        self.casks
            .lock()
            .unwrap()
            .insert(cask.token.clone(), Arc::clone(&cask));
        cask
    }

    pub fn put_formula(&self, name: &str) {
        let formula = Formula {
            name: name.to_string(),
            ..Default::default()
        };
        self.formulae
            .lock()
            .unwrap()
            .insert(name.to_string(), Arc::new(formula));
    }
}

impl PackageSource for MapSource {
    fn load_cask(&self, token: &str) -> Result<Arc<Cask>> {
        self.casks
            .lock()
            .unwrap()
            .get(token)
            .cloned()
            .ok_or_else(|| CasketError::NotFound(token.to_string()))
    }

    fn load_formula(&self, name: &str) -> Result<Arc<Formula>> {
        self.formulae
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| CasketError::NotFound(name.to_string()))
    }
}

pub fn tar_gz(entries: &[(String, String)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, data.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Serves generated tar.gz archives and counts every request.
pub struct MockBackend {
    dir: PathBuf,
    archives: Mutex<HashMap<String, Vec<(String, String)>>>,
    calls: AtomicUsize,
}

impl MockBackend {
    fn new(dir: PathBuf) -> Self {
        fs::create_dir_all(&dir).unwrap();
        Self {
            dir,
            archives: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn serve(&self, token: &str, version: &str, entries: &[(&str, &str)]) {
        let entries = entries
            .iter()
            .map(|(n, d)| (n.to_string(), d.to_string()))
            .collect();
        self.archives
            .lock()
            .unwrap()
            .insert(format!("{token}@{version}"), entries);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DownloadBackend for MockBackend {
    async fn fetch(&self, request: &DownloadRequest) -> Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = format!("{}@{}", request.token, request.version);
        let entries = self.archives.lock().unwrap().get(&key).cloned();
        let Some(entries) = entries else {
            return Err(CasketError::DownloadError(
                request.token.clone(),
                request.url.clone(),
                "Resource not found (404)".to_string(),
            ));
        };
        let path = self.dir.join(request.cache_file_name());
        fs::write(&path, tar_gz(&entries))?;
        Ok(path)
    }
}

/// Records formula installs instead of running a real tool.
#[derive(Default)]
pub struct RecordingFormulaInstaller {
    pub installed: Mutex<Vec<(String, bool)>>,
}

#[async_trait]
impl FormulaInstaller for RecordingFormulaInstaller {
    fn is_installed(&self, name: &str) -> bool {
        self.installed.lock().unwrap().iter().any(|(n, _)| n == name)
    }

    async fn install(&self, formula: &Formula, as_dependency: bool) -> Result<()> {
        self.installed
            .lock()
            .unwrap()
            .push((formula.name.clone(), as_dependency));
        Ok(())
    }
}

pub struct Harness {
    _tmp: TempDir,
    pub config: Config,
    pub source: Arc<MapSource>,
    pub backend: Arc<MockBackend>,
    pub formulae: Arc<RecordingFormulaInstaller>,
    pub installer: CaskInstaller,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::with_prefix(tmp.path().join("prefix"), tmp.path().join("home"));
        config.download_concurrency = 2;
        adjust(&mut config);

        let source = Arc::new(MapSource::default());
        let backend = Arc::new(MockBackend::new(tmp.path().join("downloads")));
        let formulae = Arc::new(RecordingFormulaInstaller::default());
        let installer = CaskInstaller::new(
            config.clone(),
            source.clone(),
            backend.clone(),
            Arc::new(NoQuarantine),
            formulae.clone(),
        );
        Self {
            _tmp: tmp,
            config,
            source,
            backend,
            formulae,
            installer,
        }
    }

    /// Registers a cask shipping one app bundle per entry of `apps` and serves its archive.
    pub fn app_cask(&self, token: &str, version: &str, apps: &[&str], extra: Value) -> Arc<Cask> {
        let artifacts: Vec<Value> = apps.iter().map(|a| json!({ "app": [a] })).collect();
        let mut definition = json!({
            "token": token,
            "version": version,
            "url": format!("https://example.com/{token}-{version}.tar.gz"),
            "sha256": null,
            "artifacts": artifacts,
        });
        if let (Some(target), Some(extra)) = (definition.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                target.insert(k.clone(), v.clone());
            }
        }
        let entries: Vec<(String, String)> = apps
            .iter()
            .map(|a| (format!("{a}/Contents/Info.plist"), format!("{token} {version}")))
            .collect();
        let borrowed: Vec<(&str, &str)> = entries
            .iter()
            .map(|(n, d)| (n.as_str(), d.as_str()))
            .collect();
        self.backend.serve(token, version, &borrowed);
        self.source.put_cask(definition)
    }

    pub fn app_path(&self, app: &str) -> PathBuf {
        self.config.applications_dir.join(app)
    }

    pub fn tab(&self, token: &str) -> CaskTab {
        CaskTab::load(&self.config.tab_path(token))
            .unwrap()
            .expect("tab written")
    }

    pub fn plist(&self, app: &str) -> String {
        fs::read_to_string(self.app_path(app).join("Contents/Info.plist")).unwrap()
    }
}

pub fn exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}
