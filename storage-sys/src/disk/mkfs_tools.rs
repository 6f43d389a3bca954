// SPDX-License-Identifier: GPL-3.0-only

use tracing::info;

use crate::Result;
use crate::cmd::{CommandRunner, owned, run_checked};

pub fn format_ext4(runner: &dyn CommandRunner, partition: &str) -> Result<()> {
    info!(partition, "formatting ext4");
    run_checked(
        runner,
        "mkfs.ext4",
        &owned(&[
            "-O",
            "uninit_bg",
            "-E",
            "lazy_itable_init=1",
            "-F",
            "-t",
            "ext4",
            partition,
        ]),
    )?;
    Ok(())
}

pub fn format_vfat(runner: &dyn CommandRunner, partition: &str) -> Result<()> {
    info!(partition, "formatting vfat");
    run_checked(runner, "mkfs.vfat", &owned(&[partition]))?;
    Ok(())
}
