// SPDX-License-Identifier: GPL-3.0-only

//! `/proc/mdstat` parsing.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use crate::Result;

pub const PROC_MDSTAT: &str = "/proc/mdstat";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Resync,
    Recovery,
    Reshape,
    Check,
}

impl SyncAction {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "resync" => Some(Self::Resync),
            "recovery" => Some(Self::Recovery),
            "reshape" => Some(Self::Reshape),
            "check" => Some(Self::Check),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MdstatArray {
    pub name: String,
    pub active: bool,
    pub level: Option<String>,
    /// Kernel names of working members, e.g. `sda1`.
    pub members: Vec<String>,
    pub failed: Vec<String>,
    /// Members marked `(S)`: hot-added and not yet rebuilding.
    pub spares: Vec<String>,
    /// `[n/m]`: configured and working device counts.
    pub raid_devices: Option<usize>,
    pub working_devices: Option<usize>,
    pub degraded: bool,
    pub sync: Option<(SyncAction, f32)>,
}

impl MdstatArray {
    pub fn is_syncing(&self) -> bool {
        self.sync.is_some()
    }

    pub fn sync_percent(&self) -> Option<u8> {
        self.sync
            .map(|(_, percent)| percent.clamp(0.0, 100.0).floor() as u8)
    }

    /// True when every expected member (`/dev/sda1` or `sda1`) is listed.
    pub fn has_members<S: AsRef<str>>(&self, expected: &[S]) -> bool {
        expected.iter().all(|member| {
            let name = kernel_name(member.as_ref());
            self.members.iter().any(|present| present == name)
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mdstat {
    pub arrays: BTreeMap<String, MdstatArray>,
}

impl Mdstat {
    pub fn parse(input: &str) -> Self {
        let mut arrays = BTreeMap::new();
        let mut current: Option<String> = None;

        for line in input.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("Personalities") || line.starts_with("unused") {
                continue;
            }

            if line.starts_with("md") && line.contains(" : ") {
                let array = parse_array_header(line);
                current = Some(array.name.clone());
                arrays.insert(array.name.clone(), array);
                continue;
            }

            let Some(array) = current.as_ref().and_then(|name| arrays.get_mut(name)) else {
                continue;
            };

            if line.contains("blocks") {
                parse_status_line(line, array);
            } else if let Some(sync) = parse_progress_line(line) {
                array.sync = Some(sync);
            }
        }

        Self { arrays }
    }

    /// No md arrays at all.
    pub fn has_no_devices(&self) -> bool {
        self.arrays.is_empty()
    }

    /// Lookup by `md3` or `/dev/md3`.
    pub fn array(&self, device: &str) -> Option<&MdstatArray> {
        self.arrays.get(kernel_name(device))
    }
}

fn kernel_name(device: &str) -> &str {
    device.rsplit('/').next().unwrap_or(device)
}

fn parse_array_header(line: &str) -> MdstatArray {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let mut array = MdstatArray {
        name: parts.first().copied().unwrap_or_default().to_string(),
        active: parts.get(2) == Some(&"active"),
        ..Default::default()
    };

    for part in parts.iter().skip(3) {
        if part.starts_with("raid") || *part == "linear" {
            array.level = Some((*part).to_string());
        } else if let Some((name, rest)) = part.split_once('[') {
            if rest.contains("(F)") {
                array.failed.push(name.to_string());
            } else if rest.contains("(S)") {
                array.spares.push(name.to_string());
            } else {
                array.members.push(name.to_string());
            }
        }
    }
    array.members.sort();
    array
}

fn parse_status_line(line: &str, array: &mut MdstatArray) {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    for (index, token) in tokens.iter().enumerate() {
        let Some(inner) = token.strip_prefix('[').and_then(|t| t.strip_suffix(']')) else {
            continue;
        };
        let Some((configured, working)) = inner.split_once('/') else {
            continue;
        };
        array.raid_devices = configured.parse().ok();
        array.working_devices = working.parse().ok();
        if let Some(map) = tokens.get(index + 1) {
            array.degraded = map.contains('_');
        }
    }
}

fn parse_progress_line(line: &str) -> Option<(SyncAction, f32)> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    for (index, token) in tokens.iter().enumerate() {
        // resync=DELAYED / resync=PENDING
        if let Some((word, _)) = token.split_once('=')
            && let Some(action) = SyncAction::from_token(word)
        {
            return Some((action, 0.0));
        }

        if let Some(action) = SyncAction::from_token(token)
            && tokens.get(index + 1) == Some(&"=")
        {
            let percent = tokens
                .get(index + 2)
                .and_then(|value| value.trim_end_matches('%').parse::<f32>().ok())
                .unwrap_or(0.0);
            return Some((action, percent));
        }
    }
    None
}

/// Source of md array status.
pub trait ArrayStatusSource: Send + Sync {
    fn read_mdstat(&self) -> Result<Mdstat>;
}

#[derive(Debug, Clone)]
pub struct ProcMdstat {
    path: PathBuf,
}

impl ProcMdstat {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for ProcMdstat {
    fn default() -> Self {
        Self::new(PROC_MDSTAT)
    }
}

impl ArrayStatusSource for ProcMdstat {
    fn read_mdstat(&self) -> Result<Mdstat> {
        Ok(Mdstat::parse(&fs::read_to_string(&self.path)?))
    }
}
