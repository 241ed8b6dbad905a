// casket-common/src/config.rs
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::UserDirs;
use tracing::debug;

use super::error::Result;
use super::policy::PackagePolicy;

// Used when HOMEBREW_PREFIX is not set or is empty.
const DEFAULT_FALLBACK_PREFIX: &str = "/opt/homebrew";
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 300;

pub const TAB_FILENAME: &str = "INSTALL_RECEIPT.json";
pub const CONFIG_STORE_FILENAME: &str = "config.json";
pub const DOWNLOAD_SHA_FILENAME: &str = "LATEST_DOWNLOAD_SHA256";
pub const METADATA_DIRNAME: &str = ".metadata";
pub const BACKUP_SUFFIX: &str = ".upgrading";

/// Every artifact directory key a cask stanza can be routed to.
pub const ARTIFACT_DIR_KEYS: &[&str] = &[
    "appdir",
    "binarydir",
    "manpagedir",
    "colorpickerdir",
    "prefpanedir",
    "qlplugindir",
    "mdimporterdir",
    "dictionarydir",
    "fontdir",
    "servicedir",
    "input_methoddir",
    "internet_plugindir",
    "audio_unit_plugindir",
    "vst_plugindir",
    "vst3_plugindir",
    "screen_saverdir",
    "keyboard_layoutdir",
];

/// Flags parsed out of `HOMEBREW_CASK_OPTS`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaskOpts {
    pub explicit_dirs: BTreeMap<String, PathBuf>,
    pub require_sha: Option<bool>,
    pub quarantine: Option<bool>,
    pub binaries: Option<bool>,
}

impl CaskOpts {
    pub fn parse(raw: &str, home: &Path) -> Self {
        let mut opts = CaskOpts::default();
        for word in raw.split_whitespace() {
            match word {
                "--require-sha" => opts.require_sha = Some(true),
                "--no-require-sha" => opts.require_sha = Some(false),
                "--quarantine" => opts.quarantine = Some(true),
                "--no-quarantine" => opts.quarantine = Some(false),
                "--binaries" => opts.binaries = Some(true),
                "--no-binaries" => opts.binaries = Some(false),
                other => {
                    let parsed = other
                        .strip_prefix("--")
                        .and_then(|flag| flag.split_once('='))
                        .filter(|(key, value)| key.ends_with("dir") && !value.is_empty());
                    match parsed {
                        Some((key, value)) if ARTIFACT_DIR_KEYS.contains(&key) => {
                            let value = value.trim_matches(|c| c == '"' || c == '\'');
                            let path = match value.strip_prefix("~/") {
                                Some(rest) => home.join(rest),
                                None => PathBuf::from(value),
                            };
                            opts.explicit_dirs.insert(key.to_string(), path);
                        }
                        _ => debug!("Ignoring unrecognised HOMEBREW_CASK_OPTS entry: {}", other),
                    }
                }
            }
        }
        opts
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub prefix: PathBuf,
    pub home: PathBuf,
    pub applications_dir: PathBuf,
    pub explicit_dirs: BTreeMap<String, PathBuf>,
    pub require_sha: bool,
    pub quarantine: bool,
    pub binaries: bool,
    pub download_concurrency: usize,
    pub fetch_timeout: Duration,
    pub policy: PackagePolicy,
}

impl Config {
    pub fn load() -> Result<Self> {
        debug!("Loading casket configuration");

        let prefix_str = env::var("HOMEBREW_PREFIX")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                debug!(
                    "HOMEBREW_PREFIX not set or empty, falling back to default: {}",
                    DEFAULT_FALLBACK_PREFIX
                );
                DEFAULT_FALLBACK_PREFIX.to_string()
            });
        let home =
            UserDirs::new().map_or_else(|| PathBuf::from("/"), |ud| ud.home_dir().to_path_buf());

        let mut config = Self::with_prefix(PathBuf::from(prefix_str), home);
        if cfg!(target_os = "macos") {
            config.applications_dir = PathBuf::from("/Applications");
        }

        if let Ok(raw) = env::var("HOMEBREW_CASK_OPTS") {
            let opts = CaskOpts::parse(&raw, &config.home);
            config.apply_cask_opts(opts);
        }

        if let Some(n) = env::var("HOMEBREW_DOWNLOAD_CONCURRENCY")
            .ok()
            .and_then(|s| s.trim().parse::<usize>().ok())
        {
            config.download_concurrency = n.max(1);
        }
        if let Some(secs) = env::var("HOMEBREW_CURL_TIMEOUT")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
        {
            config.fetch_timeout = Duration::from_secs(secs);
        }
        config.policy = PackagePolicy::from_env();

        debug!("Effective prefix set to: {}", config.prefix.display());
        Ok(config)
    }

    /// A configuration rooted entirely under `prefix` and `home`, reading no environment.
    pub fn with_prefix(prefix: PathBuf, home: PathBuf) -> Self {
        Self {
            applications_dir: home.join("Applications"),
            prefix,
            home,
            explicit_dirs: BTreeMap::new(),
            require_sha: false,
            quarantine: true,
            binaries: true,
            download_concurrency: num_cpus::get_physical().max(1),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            policy: PackagePolicy::default(),
        }
    }

    pub fn apply_cask_opts(&mut self, opts: CaskOpts) {
        self.explicit_dirs.extend(opts.explicit_dirs);
        if let Some(v) = opts.require_sha {
            self.require_sha = v;
        }
        if let Some(v) = opts.quarantine {
            self.quarantine = v;
        }
        if let Some(v) = opts.binaries {
            self.binaries = v;
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn home_dir(&self) -> &Path {
        &self.home
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.prefix.join("bin")
    }

    pub fn cellar_dir(&self) -> PathBuf {
        self.prefix.join("Cellar")
    }

    pub fn caskroom_dir(&self) -> PathBuf {
        self.prefix.join("Caskroom")
    }

    pub fn taps_dir(&self) -> PathBuf {
        self.prefix.join("Library/Taps")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.prefix.join("casket_cache")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.cache_dir().join("downloads")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.prefix.join("casket_logs")
    }

    pub fn man_base_dir(&self) -> PathBuf {
        self.prefix.join("share").join("man")
    }

    pub fn formula_cellar_dir(&self, formula_name: &str) -> PathBuf {
        self.cellar_dir().join(formula_name)
    }

    pub fn cask_token_path(&self, token: &str) -> PathBuf {
        self.caskroom_dir().join(token)
    }

    /// The staged path: `Caskroom/<token>/<version>`.
    pub fn cask_version_path(&self, token: &str, version: &str) -> PathBuf {
        self.cask_token_path(token).join(version)
    }

    pub fn metadata_main_dir(&self, token: &str) -> PathBuf {
        self.cask_token_path(token).join(METADATA_DIRNAME)
    }

    pub fn metadata_versioned_dir(&self, token: &str, version: &str) -> PathBuf {
        self.metadata_main_dir(token).join(version)
    }

    pub fn metadata_timestamped_dir(&self, token: &str, version: &str, timestamp: &str) -> PathBuf {
        self.metadata_versioned_dir(token, version).join(timestamp)
    }

    pub fn tab_path(&self, token: &str) -> PathBuf {
        self.metadata_main_dir(token).join(TAB_FILENAME)
    }

    pub fn config_store_path(&self, token: &str) -> PathBuf {
        self.metadata_main_dir(token).join(CONFIG_STORE_FILENAME)
    }

    pub fn download_sha_path(&self, token: &str) -> PathBuf {
        self.metadata_main_dir(token).join(DOWNLOAD_SHA_FILENAME)
    }

    pub fn get_tap_path(&self, name: &str) -> Option<PathBuf> {
        let parts: Vec<&str> = name.split('/').collect();
        if parts.len() == 2 {
            Some(
                self.taps_dir()
                    .join(parts[0])
                    .join(format!("homebrew-{}", parts[1])),
            )
        } else {
            None
        }
    }

    /// Artifact directories before any per-cask or explicit override.
    pub fn default_artifact_dirs(&self) -> BTreeMap<String, PathBuf> {
        let lib = self.home.join("Library");
        let plugins = lib.join("Audio").join("Plug-Ins");
        let mut dirs = BTreeMap::new();
        let mut put = |key: &str, path: PathBuf| {
            dirs.insert(key.to_string(), path);
        };
        put("appdir", self.applications_dir.clone());
        put("binarydir", self.bin_dir());
        put("manpagedir", self.man_base_dir());
        put("colorpickerdir", lib.join("ColorPickers"));
        put("prefpanedir", lib.join("PreferencePanes"));
        put("qlplugindir", lib.join("QuickLook"));
        put("mdimporterdir", lib.join("Spotlight"));
        put("dictionarydir", lib.join("Dictionaries"));
        put("fontdir", lib.join("Fonts"));
        put("servicedir", lib.join("Services"));
        put("input_methoddir", lib.join("Input Methods"));
        put("internet_plugindir", lib.join("Internet Plug-Ins"));
        put("audio_unit_plugindir", plugins.join("Components"));
        put("vst_plugindir", plugins.join("VST"));
        put("vst3_plugindir", plugins.join("VST3"));
        put("screen_saverdir", lib.join("Screen Savers"));
        put("keyboard_layoutdir", lib.join("Keyboard Layouts"));
        dirs
    }

    /// Defaults with `HOMEBREW_CASK_OPTS` directory overrides applied.
    pub fn artifact_dirs(&self) -> BTreeMap<String, PathBuf> {
        let mut dirs = self.default_artifact_dirs();
        dirs.extend(self.explicit_dirs.clone());
        dirs
    }
}
