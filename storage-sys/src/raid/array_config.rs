// SPDX-License-Identifier: GPL-3.0-only

//! Per-volume mdadm configuration file.
//!
//! Plain `mdadm.conf` syntax (DEVICE and ARRAY lines) plus a `# TotalNodes=`
//! comment that records how many members the array was created with. The
//! recorded count only ever grows.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use storage_types::VolumeId;

use crate::{Result, SysError};

const TOTAL_NODES_TAG: &str = "# TotalNodes=";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayConfig {
    pub devices: Vec<String>,
    /// `ARRAY` line as printed by `mdadm --detail --brief`.
    pub array_line: String,
    pub total_nodes: usize,
}

impl ArrayConfig {
    pub fn new(devices: Vec<String>, array_line: impl Into<String>, total_nodes: usize) -> Self {
        Self {
            devices,
            array_line: array_line.into().trim().to_string(),
            total_nodes,
        }
    }

    pub fn path(dir: &Path, volume: VolumeId) -> PathBuf {
        dir.join(format!("mdadm_{}.conf", volume.0))
    }

    /// md device named by the ARRAY line.
    pub fn array_device(&self) -> Option<&str> {
        self.array_line.split_whitespace().nth(1)
    }

    pub fn parse(input: &str) -> Result<Self> {
        let mut devices = Vec::new();
        let mut array_line = None;
        let mut total_nodes = None;

        for line in input.lines().map(str::trim) {
            if let Some(count) = line.strip_prefix(TOTAL_NODES_TAG) {
                total_nodes = Some(count.trim().parse::<usize>().map_err(|e| {
                    SysError::Parse(format!("bad TotalNodes value {count:?}: {e}"))
                })?);
            } else if let Some(rest) = line.strip_prefix("DEVICE ") {
                devices.extend(rest.split_whitespace().map(str::to_string));
            } else if line.starts_with("ARRAY ") && array_line.is_none() {
                array_line = Some(line.to_string());
            }
        }

        let array_line =
            array_line.ok_or_else(|| SysError::Parse("array config has no ARRAY line".into()))?;
        let total_nodes = match total_nodes {
            Some(count) => count,
            None => {
                let from_line = array_line
                    .split_whitespace()
                    .find_map(|token| token.strip_prefix("num-devices="))
                    .and_then(|count| count.parse().ok());
                warn!("array config lacks TotalNodes, falling back to member count");
                from_line.unwrap_or(devices.len())
            }
        };

        Ok(Self {
            devices,
            array_line,
            total_nodes,
        })
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.devices.is_empty() {
            out.push_str(&format!("DEVICE {}\n", self.devices.join(" ")));
        }
        out.push_str(&self.array_line);
        out.push('\n');
        out.push_str(&format!("{TOTAL_NODES_TAG}{}\n", self.total_nodes));
        out
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(raw) => Self::parse(&raw).map(Some),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    /// Write the file, keeping the larger of the new and any previously recorded count.
    /// Returns the count that was written.
    pub fn store(&self, path: &Path) -> Result<usize> {
        let previous = match Self::load(path) {
            Ok(existing) => existing.map(|config| config.total_nodes).unwrap_or(0),
            Err(error) => {
                warn!(path = %path.display(), %error, "replacing unreadable array config");
                0
            }
        };

        let mut config = self.clone();
        config.total_nodes = config.total_nodes.max(previous);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, config.render())?;
        debug!(path = %path.display(), total_nodes = config.total_nodes, "stored array config");
        Ok(config.total_nodes)
    }

    pub fn remove(path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => Err(error.into()),
            _ => Ok(()),
        }
    }
}
