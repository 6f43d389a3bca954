// SPDX-License-Identifier: GPL-3.0-only

use tracing::info;

use storage_types::{
    DiskPartitionLayout, MB_PER_GB, PartitionBound, PartitionEntry, PartitionSpan, partition_node,
};

use crate::cmd::{CommandRunner, owned, run_checked};
use crate::{Result, SysError};

pub fn make_gpt_label(runner: &dyn CommandRunner, device: &str) -> Result<()> {
    run_checked(runner, "parted", &owned(&["-s", device, "mklabel", "gpt"]))?;
    Ok(())
}

pub fn make_partition(runner: &dyn CommandRunner, device: &str, span: &PartitionSpan) -> Result<()> {
    let start = span.start.to_string();
    let end = span.end.to_string();
    run_checked(
        runner,
        "parted",
        &owned(&["-s", device, "mkpart", "primary", "ext4", &start, &end]),
    )?;
    Ok(())
}

/// Write a fresh GPT label and one partition per span.
pub fn create_layout(
    runner: &dyn CommandRunner,
    device: &str,
    spans: &[PartitionSpan],
) -> Result<DiskPartitionLayout> {
    info!(device, partitions = spans.len(), "creating partition layout");
    make_gpt_label(runner, device)?;

    let mut layout = DiskPartitionLayout::default();
    for (index, span) in spans.iter().enumerate() {
        make_partition(runner, device, span)?;
        let number = index as u8 + 1;
        layout.entries.push(PartitionEntry {
            index: number,
            node: partition_node(device, number),
            link: None,
            start: span.start,
            end: span.end,
        });
    }
    Ok(layout)
}

/// Current layout of `device` as reported by `parted -m`.
pub fn read_layout(runner: &dyn CommandRunner, device: &str) -> Result<DiskPartitionLayout> {
    let output = run_checked(
        runner,
        "parted",
        &owned(&["-s", "-m", device, "unit", "MB", "print"]),
    )?;
    parse_machine_print(&output.stdout, device)
}

fn bound_from_mb(mb: u64) -> PartitionBound {
    if mb >= MB_PER_GB && mb % MB_PER_GB == 0 {
        PartitionBound::gb(mb / MB_PER_GB)
    } else {
        PartitionBound::mb(mb)
    }
}

fn parse_mb(field: &str) -> Result<u64> {
    let value = field
        .trim()
        .strip_suffix("MB")
        .ok_or_else(|| SysError::Parse(format!("expected MB value, got {field:?}")))?;
    let parsed = value
        .parse::<f64>()
        .map_err(|e| SysError::Parse(format!("{field:?}: {e}")))?;
    Ok(parsed.round() as u64)
}

/// Parse `parted -s -m <dev> unit MB print` output.
pub fn parse_machine_print(output: &str, device: &str) -> Result<DiskPartitionLayout> {
    let mut layout = DiskPartitionLayout::default();

    for line in output.lines() {
        let line = line.trim().trim_end_matches(';');
        let fields: Vec<&str> = line.split(':').collect();
        let Some(number) = fields.first().and_then(|field| field.parse::<u8>().ok()) else {
            continue;
        };
        if fields.len() < 3 {
            return Err(SysError::Parse(format!("truncated parted row: {line}")));
        }

        layout.entries.push(PartitionEntry {
            index: number,
            node: partition_node(device, number),
            link: None,
            start: bound_from_mb(parse_mb(fields[1])?),
            end: bound_from_mb(parse_mb(fields[2])?),
        });
    }

    layout.entries.sort_by_key(|entry| entry.index);
    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_machine_readable_rows() {
        let output = "BYT;\n/dev/sdb:4000787MB:scsi:512:4096:gpt:ATA WDC WD40PURZ:;\n1:100MB:2000000MB:1999900MB:ext4:primary:;\n2:2000000MB:4000787MB:2000787MB::primary:;\n";
        let layout = parse_machine_print(output, "/dev/sdb").unwrap();

        assert_eq!(layout.len(), 2);
        assert_eq!(layout.entries[0].node, "/dev/sdb1");
        assert_eq!(layout.entries[0].start, PartitionBound::mb(100));
        assert_eq!(layout.entries[0].end, PartitionBound::gb(2000));
        assert_eq!(layout.entries[1].end, PartitionBound::mb(4_000_787));
        assert_eq!(layout.end_mb(), 4_000_787);
    }

    #[test]
    fn unpartitioned_disk_has_empty_layout() {
        let output = "BYT;\n/dev/sdc:2000399MB:scsi:512:4096:unknown:ATA:;\n";
        assert!(parse_machine_print(output, "/dev/sdc").unwrap().is_empty());
    }

    #[test]
    fn rejects_rows_without_units() {
        let output = "1:100:2000:1900:ext4:primary:;\n";
        assert!(parse_machine_print(output, "/dev/sda").is_err());
    }
}
