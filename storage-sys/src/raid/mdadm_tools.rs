// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use tracing::{info, warn};

use storage_types::RaidBuildRequest;

use crate::cmd::{CommandRunner, owned, run_checked};
use crate::{Result, SysError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdArrayScan {
    pub device: String,
    pub name: Option<String>,
    pub uuid: Option<String>,
    pub line: String,
}

pub fn parse_mdadm_scan(output: &str) -> Vec<MdArrayScan> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || !line.starts_with("ARRAY ") {
                return None;
            }

            let mut parts = line.split_whitespace();
            let _array = parts.next()?;
            let device = parts.next()?.to_string();

            let mut name = None;
            let mut uuid = None;

            for token in parts {
                if let Some(value) = token.strip_prefix("name=") {
                    name = Some(value.to_string());
                }
                if let Some(value) = token.strip_prefix("UUID=") {
                    uuid = Some(value.to_string());
                }
            }

            Some(MdArrayScan {
                device,
                name,
                uuid,
                line: line.to_string(),
            })
        })
        .collect()
}

pub fn create_array(
    runner: &dyn CommandRunner,
    array: &str,
    request: &RaidBuildRequest,
) -> Result<()> {
    let level = request.mode.mdadm_level().ok_or_else(|| {
        SysError::OperationFailed(format!("{} is not a RAID mode", request.mode))
    })?;

    let mut args = owned(&[
        "--create",
        array,
        "--run",
        &format!("--level={level}"),
        "--assume-clean",
        &format!("--raid-devices={}", request.disk_count),
    ]);
    args.extend(request.members.iter().cloned());

    info!(array, mode = %request.mode, members = ?request.members, "creating array");
    run_checked(runner, "mdadm", &args)?;
    Ok(())
}

/// Plain assemble first, then forced assemble with `--update=name`.
pub fn assemble_array(runner: &dyn CommandRunner, array: &str, config: &Path) -> Result<()> {
    let config_arg = format!("--config={}", config.display());

    match run_checked(runner, "mdadm", &owned(&["--assemble", &config_arg, array])) {
        Ok(_) => Ok(()),
        Err(error) => {
            warn!(array, %error, "plain assemble failed, forcing");
            run_checked(
                runner,
                "mdadm",
                &owned(&["--assemble", "--force", "--update=name", &config_arg, array]),
            )?;
            Ok(())
        }
    }
}

pub fn add_member(runner: &dyn CommandRunner, array: &str, partition: &str) -> Result<()> {
    info!(array, partition, "hot-adding member");
    run_checked(runner, "mdadm", &owned(&["--manage", array, "--add", partition]))?;
    Ok(())
}

pub fn stop_array(runner: &dyn CommandRunner, array: &str) -> Result<()> {
    run_checked(runner, "mdadm", &owned(&["--stop", array]))?;
    Ok(())
}

pub fn zero_superblock(runner: &dyn CommandRunner, partition: &str) -> Result<()> {
    run_checked(runner, "mdadm", &owned(&["--zero-superblock", partition]))?;
    Ok(())
}

/// `ARRAY` line describing a running array.
pub fn detail_brief(runner: &dyn CommandRunner, array: &str) -> Result<MdArrayScan> {
    let output = run_checked(runner, "mdadm", &owned(&["--detail", "--brief", array]))?;
    parse_mdadm_scan(&output.stdout)
        .into_iter()
        .next()
        .ok_or_else(|| SysError::Parse(format!("mdadm --detail --brief {array} printed no ARRAY line")))
}
