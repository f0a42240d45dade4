use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use genrelay_jobs::{
    GeneratorConfig, JobSettings, OutputLayout, DEFAULT_FIXED_TEXT_FILE, DEFAULT_IMAGE_DIR,
    DEFAULT_TEXT_DIR,
};
use serde::Deserialize;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3000;

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub auth: Option<HttpAuthConfig>,
    pub cors: Option<HttpCorsConfig>,
    pub root: PathBuf,
    pub layout: OutputLayout,
    pub jobs: JobSettings,
    pub generator: GeneratorConfig,
}

#[derive(Debug, Clone)]
pub struct HttpAuthConfig {
    pub tokens: HashSet<String>,
    pub header: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpCorsConfig {
    pub allowed_origins: Vec<String>,
}

/// Values supplied on the command line; each one wins over the file.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub root: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tokens: Vec<String>,
    pub tokens_file: Option<PathBuf>,
    pub cors_origins: Vec<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawConfig {
    server: RawServerConfig,
    paths: RawPathsConfig,
    jobs: JobSettings,
    generator: GeneratorConfig,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawServerConfig {
    host: Option<String>,
    port: Option<u16>,
    auth: Option<RawAuthConfig>,
    cors: Option<RawCorsConfig>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawAuthConfig {
    tokens: Vec<String>,
    tokens_file: Option<String>,
    header: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawCorsConfig {
    allowed_origins: Vec<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawPathsConfig {
    root: Option<String>,
    image_dir: Option<String>,
    text_dir: Option<String>,
    fixed_text_path: Option<String>,
    history_root: Option<String>,
    history_enabled: Option<bool>,
}

/// Reads the optional TOML file and merges CLI overrides on top.
///
/// Relative paths in the file resolve against the file's directory;
/// relative paths on the command line resolve against `cwd`.
pub fn load(config_path: Option<&Path>, cli: &CliOverrides, cwd: &Path) -> Result<ServerConfig> {
    let (raw, config_dir) = match config_path {
        Some(path) => {
            let path = resolve_relative(cwd, path);
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            let raw: RawConfig = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config {}", path.display()))?;
            let dir = path.parent().unwrap_or(cwd).to_path_buf();
            (raw, dir)
        }
        None => (RawConfig::default(), cwd.to_path_buf()),
    };

    build(raw, &config_dir, cli, cwd)
}

fn build(raw: RawConfig, config_dir: &Path, cli: &CliOverrides, cwd: &Path) -> Result<ServerConfig> {
    let RawConfig {
        server,
        paths,
        jobs,
        generator,
    } = raw;

    validate_jobs(&jobs)?;

    let root = match (&cli.root, &paths.root) {
        (Some(root), _) => resolve_relative(cwd, root),
        (None, Some(root)) => resolve_relative(config_dir, Path::new(root)),
        (None, None) => config_dir.to_path_buf(),
    };

    let layout = build_layout(&paths, &root);
    let auth = build_auth_config(cli, server.auth.as_ref(), config_dir, cwd)?;
    let cors = build_cors_config(cli, server.cors.as_ref());

    let host = cli
        .host
        .clone()
        .or(server.host)
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = cli.port.or(server.port).unwrap_or(DEFAULT_PORT);

    Ok(ServerConfig {
        host,
        port,
        auth,
        cors,
        root,
        layout,
        jobs,
        generator,
    })
}

fn validate_jobs(jobs: &JobSettings) -> Result<()> {
    if jobs.timeout_ms == 0 {
        return Err(anyhow!("jobs.timeout_ms must be positive"));
    }
    if jobs.poll_interval_ms == 0 {
        return Err(anyhow!("jobs.poll_interval_ms must be positive"));
    }
    if jobs.max_timeout_ms < jobs.timeout_ms {
        return Err(anyhow!(
            "jobs.max_timeout_ms ({}) is below jobs.timeout_ms ({})",
            jobs.max_timeout_ms,
            jobs.timeout_ms
        ));
    }
    Ok(())
}

fn build_layout(paths: &RawPathsConfig, root: &Path) -> OutputLayout {
    let dir = |value: &Option<String>, default: &str| {
        resolve_relative(root, Path::new(value.as_deref().unwrap_or(default)))
    };

    let image_dir = dir(&paths.image_dir, DEFAULT_IMAGE_DIR);
    let text_dir = dir(&paths.text_dir, DEFAULT_TEXT_DIR);

    let fixed_text_path = match paths.fixed_text_path.as_deref() {
        Some("") => None,
        Some(path) => Some(resolve_relative(root, Path::new(path))),
        None => Some(text_dir.join(DEFAULT_FIXED_TEXT_FILE)),
    };

    let history_root = paths
        .history_root
        .as_deref()
        .filter(|path| !path.is_empty())
        .map(|path| resolve_relative(root, Path::new(path)));
    let history_enabled = paths.history_enabled.unwrap_or(history_root.is_some());

    OutputLayout {
        image_dir,
        text_dir,
        fixed_text_path,
        history_root,
        history_enabled,
    }
}

fn build_auth_config(
    cli: &CliOverrides,
    file_cfg: Option<&RawAuthConfig>,
    config_dir: &Path,
    cwd: &Path,
) -> Result<Option<HttpAuthConfig>> {
    let mut tokens: HashSet<String> = HashSet::new();
    let mut header = None;

    if let Some(cfg) = file_cfg {
        tokens.extend(cfg.tokens.iter().cloned());
        if let Some(path) = cfg.tokens_file.as_deref() {
            tokens.extend(load_tokens_from_file(&resolve_relative(
                config_dir,
                Path::new(path),
            ))?);
        }
        header = cfg
            .header
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_ascii_lowercase);
    }

    if let Some(path) = cli.tokens_file.as_ref() {
        tokens.extend(load_tokens_from_file(&resolve_relative(cwd, path))?);
    }
    tokens.extend(cli.tokens.iter().cloned());
    tokens.retain(|token| !token.trim().is_empty());

    if tokens.is_empty() {
        if header.is_some() {
            tracing::warn!("auth header configured but no tokens; authentication is disabled");
        }
        return Ok(None);
    }

    Ok(Some(HttpAuthConfig { tokens, header }))
}

fn build_cors_config(cli: &CliOverrides, file_cfg: Option<&RawCorsConfig>) -> Option<HttpCorsConfig> {
    let mut origins: Vec<String> = Vec::new();

    if let Some(cfg) = file_cfg {
        origins.extend(cfg.allowed_origins.iter().cloned());
    }
    origins.extend(cli.cors_origins.iter().cloned());

    if origins.is_empty() {
        return None;
    }

    origins.sort();
    origins.dedup();

    Some(HttpCorsConfig {
        allowed_origins: origins,
    })
}

fn load_tokens_from_file(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read tokens file {}", path.display()))?;
    let parsed: TokenFile = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse tokens file {}", path.display()))?;
    Ok(parsed.tokens.into_iter().map(|entry| entry.token).collect())
}

fn resolve_relative(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[derive(Deserialize)]
struct TokenFile {
    tokens: Vec<TokenEntry>,
}

#[derive(Deserialize)]
struct TokenEntry {
    token: String,
}
