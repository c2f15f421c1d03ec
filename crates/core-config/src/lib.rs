//! Configuration loading and parsing.
//!
//! Parses `editor.toml` (or an override path) for indentation and LSP
//! transport settings. Unknown fields are ignored so the file can evolve
//! without breaking older cores. On parse error the caller gets defaults
//! rather than a hard failure — config is advisory, not load-bearing.

use anyhow::Result;
use serde::Deserialize;
use std::{fs, path::PathBuf};
use tracing::info;

pub const MIN_INDENT_WIDTH: u8 = 1;
pub const MAX_INDENT_WIDTH: u8 = 8;
pub const DEFAULT_LSP_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_LSP_DEBOUNCE_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndentUnit {
    Tabs,
    Spaces(u8),
}

impl Default for IndentUnit {
    fn default() -> Self {
        IndentUnit::Spaces(4)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "lowercase")]
enum IndentKindToml {
    Tabs,
    Spaces,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndentConfig {
    #[serde(default = "IndentConfig::default_kind")]
    kind: IndentKindToml,
    #[serde(default = "IndentConfig::default_width")]
    width: u8,
    /// When `true`, the first indented line in a newly opened document
    /// overrides `kind`/`width` for that document only (§ indent-unit
    /// auto-detection).
    #[serde(default = "IndentConfig::default_auto_detect")]
    pub auto_detect: bool,
}

impl IndentConfig {
    const fn default_kind() -> IndentKindToml {
        IndentKindToml::Spaces
    }
    const fn default_width() -> u8 {
        4
    }
    const fn default_auto_detect() -> bool {
        true
    }
}

impl Default for IndentConfig {
    fn default() -> Self {
        IndentConfig {
            kind: Self::default_kind(),
            width: Self::default_width(),
            auto_detect: Self::default_auto_detect(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LspConfig {
    #[serde(default = "LspConfig::default_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "LspConfig::default_debounce_ms")]
    pub debounce_ms: u64,
}

impl LspConfig {
    const fn default_timeout_ms() -> u64 {
        DEFAULT_LSP_TIMEOUT_MS
    }
    const fn default_debounce_ms() -> u64 {
        DEFAULT_LSP_DEBOUNCE_MS
    }
}

impl Default for LspConfig {
    fn default() -> Self {
        LspConfig {
            request_timeout_ms: Self::default_timeout_ms(),
            debounce_ms: Self::default_debounce_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    indent: IndentConfig,
    #[serde(default)]
    pub lsp: LspConfig,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub raw: Option<String>,
    pub file: ConfigFile,
    effective_indent_width: u8,
}

/// Best-effort config path: prefer a project-local file before a platform
/// config dir.
pub fn discover() -> PathBuf {
    let local = PathBuf::from("editor.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("editor").join("editor.toml");
    }
    PathBuf::from("editor.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    if let Ok(content) = fs::read_to_string(&path) {
        match toml::from_str::<ConfigFile>(&content) {
            Ok(file) => {
                let mut cfg = Config { raw: Some(content), file, effective_indent_width: 0 };
                cfg.recompute();
                Ok(cfg)
            }
            Err(e) => {
                info!(target: "config", error = %e, path = %path.display(), "config parse failed, using defaults");
                Ok(Config::default_computed())
            }
        }
    } else {
        Ok(Config::default_computed())
    }
}

impl Config {
    fn default_computed() -> Config {
        let mut cfg = Config::default();
        cfg.recompute();
        cfg
    }

    fn recompute(&mut self) {
        let raw = self.file.indent.width;
        let clamped = raw.clamp(MIN_INDENT_WIDTH, MAX_INDENT_WIDTH);
        if clamped != raw {
            info!(target: "config", raw, clamped, "indent_width_clamped");
        }
        self.effective_indent_width = clamped;
    }

    pub fn indent_unit(&self) -> IndentUnit {
        match self.file.indent.kind {
            IndentKindToml::Tabs => IndentUnit::Tabs,
            IndentKindToml::Spaces => IndentUnit::Spaces(self.effective_indent_width),
        }
    }

    pub fn auto_detect_indent(&self) -> bool {
        self.file.indent.auto_detect
    }

    pub fn lsp_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.file.lsp.request_timeout_ms)
    }

    pub fn lsp_debounce(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.file.lsp.debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex, MutexGuard};
    use tracing::Level;
    use tracing::subscriber::with_default;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct BufferWriter {
        inner: Arc<Mutex<Vec<u8>>>,
    }

    impl BufferWriter {
        fn new() -> (Self, Arc<Mutex<Vec<u8>>>) {
            let buf = Arc::new(Mutex::new(Vec::new()));
            (Self { inner: buf.clone() }, buf)
        }
    }

    struct LockedWriter<'a> {
        guard: MutexGuard<'a, Vec<u8>>,
    }

    impl<'a> Write for LockedWriter<'a> {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.guard.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for BufferWriter {
        type Writer = LockedWriter<'a>;

        fn make_writer(&'a self) -> Self::Writer {
            LockedWriter { guard: self.inner.lock().expect("log buffer poisoned") }
        }
    }

    #[test]
    fn defaults_when_file_missing() {
        let cfg = load_from(Some(PathBuf::from("/nonexistent/editor.toml"))).unwrap();
        assert_eq!(cfg.indent_unit(), IndentUnit::Spaces(4));
        assert_eq!(cfg.lsp_timeout().as_millis(), 30_000);
    }

    #[test]
    fn parses_tabs_and_clamps_width() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[indent]\nkind = \"tabs\"\nwidth = 99\n").unwrap();
        let cfg = load_from(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.indent_unit(), IndentUnit::Tabs);
    }

    #[test]
    fn parses_spaces_width() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[indent]\nkind = \"spaces\"\nwidth = 2\n").unwrap();
        let cfg = load_from(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.indent_unit(), IndentUnit::Spaces(2));
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not valid toml :::").unwrap();
        let cfg = load_from(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.indent_unit(), IndentUnit::Spaces(4));
    }

    #[test]
    fn lsp_settings_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[lsp]\nrequest_timeout_ms = 5000\ndebounce_ms = 50\n").unwrap();
        let cfg = load_from(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.lsp_timeout().as_millis(), 5000);
        assert_eq!(cfg.lsp_debounce().as_millis(), 50);
    }

    #[test]
    fn clamp_logging_uses_config_target() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[indent]\nkind = \"spaces\"\nwidth = 99\n").unwrap();

        let (writer, buffer) = BufferWriter::new();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::INFO)
            .with_target(true)
            .with_ansi(false)
            .without_time()
            .with_writer(writer)
            .finish();

        let cfg = with_default(subscriber, || load_from(Some(file.path().to_path_buf())).unwrap());

        let log_output = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(log_output.contains("INFO config:"));
        assert!(log_output.contains("indent_width_clamped"));
        assert_eq!(cfg.indent_unit(), IndentUnit::Spaces(MAX_INDENT_WIDTH));
    }
}
