//! Server configuration.
//!
//! Three layers, later wins: built-in defaults, an optional TOML file
//! (`--config`), and command-line flags. The TOML side deserialises with
//! `#[serde(default)]` sub-defaults so a partial file is fine.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::render::Depth;

/// Scrollback rows kept above the screen.
pub const DEFAULT_SCROLLBACK: usize = 1000;

/// Fully resolved configuration the session runs with.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub cols: usize,
    pub rows: usize,
    pub depth: Depth,
    pub title: String,
    pub scrollback: usize,
    pub password: Option<String>,
    pub state_file: Option<PathBuf>,
    /// Emit raw scancodes instead of terminal byte sequences.
    pub graphic_keyboard: bool,
    /// Host command argv; empty means `$SHELL`.
    pub command: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:5900".parse().expect("static address"),
            cols: 80,
            rows: 25,
            depth: Depth::D8,
            title: "rfbterm".to_string(),
            scrollback: DEFAULT_SCROLLBACK,
            password: None,
            state_file: None,
            graphic_keyboard: false,
            command: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// TOML file layer
// ---------------------------------------------------------------------------

/// On-disk configuration; every field optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub listen: Option<SocketAddr>,
    /// `COLSxROWS`, e.g. `"80x25"`.
    pub geometry: Option<String>,
    pub depth: Option<u32>,
    pub title: Option<String>,
    pub scrollback: Option<usize>,
    pub password_file: Option<PathBuf>,
    pub state_file: Option<PathBuf>,
    pub graphic_keyboard: Option<bool>,
    pub command: Option<Vec<String>>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse `"COLSxROWS"`.
pub fn parse_geometry(s: &str) -> Result<(usize, usize)> {
    let Some((cols, rows)) = s.split_once('x') else {
        bail!("geometry must be COLSxROWS, got {s:?}");
    };
    let cols: usize = cols.trim().parse().context("geometry columns")?;
    let rows: usize = rows.trim().parse().context("geometry rows")?;
    if !(2..=1024).contains(&cols) || !(1..=512).contains(&rows) {
        bail!("geometry {cols}x{rows} out of range");
    }
    Ok((cols, rows))
}

/// Read a VNC password from a file, trimming the trailing newline.
pub fn read_password_file(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading password file {}", path.display()))?;
    let pw = text.trim_end_matches(['\r', '\n']).to_string();
    if pw.is_empty() {
        bail!("password file {} is empty", path.display());
    }
    Ok(pw)
}

impl ServerConfig {
    /// Apply the file layer over the defaults.
    pub fn apply_file(&mut self, file: &FileConfig) -> Result<()> {
        if let Some(listen) = file.listen {
            self.listen = listen;
        }
        if let Some(geometry) = &file.geometry {
            (self.cols, self.rows) = parse_geometry(geometry)?;
        }
        if let Some(depth) = file.depth {
            self.depth = Depth::from_bits(depth)
                .with_context(|| format!("unsupported depth {depth} (use 8, 15, 16 or 32)"))?;
        }
        if let Some(title) = &file.title {
            self.title = title.clone();
        }
        if let Some(scrollback) = file.scrollback {
            self.scrollback = scrollback.min(65536);
        }
        if let Some(path) = &file.password_file {
            self.password = Some(read_password_file(path)?);
        }
        if let Some(path) = &file.state_file {
            self.state_file = Some(path.clone());
        }
        if let Some(graphic) = file.graphic_keyboard {
            self.graphic_keyboard = graphic;
        }
        if let Some(command) = &file.command {
            self.command = command.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_parses_and_validates() {
        assert_eq!(parse_geometry("80x25").unwrap(), (80, 25));
        assert_eq!(parse_geometry("132 x 50").unwrap(), (132, 50));
        assert!(parse_geometry("80").is_err());
        assert!(parse_geometry("1x0").is_err());
        assert!(parse_geometry("9999x25").is_err());
    }

    #[test]
    fn file_layer_overrides_defaults() {
        let file: FileConfig = toml::from_str(
            r#"
            geometry = "132x43"
            depth = 32
            title = "ops console"
            "#,
        )
        .unwrap();
        let mut cfg = ServerConfig::default();
        cfg.apply_file(&file).unwrap();
        assert_eq!((cfg.cols, cfg.rows), (132, 43));
        assert_eq!(cfg.depth, Depth::D32);
        assert_eq!(cfg.title, "ops console");
        // Untouched fields keep their defaults.
        assert_eq!(cfg.listen.port(), 5900);
    }

    #[test]
    fn bad_depth_is_rejected() {
        let file: FileConfig = toml::from_str("depth = 24").unwrap();
        let mut cfg = ServerConfig::default();
        assert!(cfg.apply_file(&file).is_err());
    }
}
