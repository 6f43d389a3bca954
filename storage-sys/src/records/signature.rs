// SPDX-License-Identifier: GPL-3.0-only

//! Volume signature: proves a filesystem was initialised by this recorder.

use std::fs;
use std::io;
use std::path::Path;

use crate::Result;

pub const SIGNATURE_FILE: &str = ".nvr_signature";
pub const SIGNATURE_MAGIC: u32 = 0x4E56_5253;
pub const SIGNATURE_VERSION: u32 = 1;
const SIGNATURE_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    Valid,
    Missing,
    Mismatch { magic: u32, version: u32 },
    Truncated,
}

impl SignatureCheck {
    pub fn is_valid(self) -> bool {
        self == Self::Valid
    }
}

pub fn write_signature(mount_path: &Path) -> Result<()> {
    let mut record = Vec::with_capacity(SIGNATURE_LEN);
    record.extend_from_slice(&SIGNATURE_MAGIC.to_le_bytes());
    record.extend_from_slice(&SIGNATURE_VERSION.to_le_bytes());

    let path = mount_path.join(SIGNATURE_FILE);
    fs::write(&path, record)?;
    fs::File::open(&path)?.sync_all()?;
    Ok(())
}

pub fn verify_signature(mount_path: &Path) -> Result<SignatureCheck> {
    let raw = match fs::read(mount_path.join(SIGNATURE_FILE)) {
        Ok(raw) => raw,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            return Ok(SignatureCheck::Missing);
        }
        Err(error) => return Err(error.into()),
    };

    if raw.len() != SIGNATURE_LEN {
        return Ok(SignatureCheck::Truncated);
    }

    let magic = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
    let version = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
    if magic == SIGNATURE_MAGIC && version == SIGNATURE_VERSION {
        Ok(SignatureCheck::Valid)
    } else {
        Ok(SignatureCheck::Mismatch { magic, version })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn written_signature_verifies() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(verify_signature(dir.path()).unwrap(), SignatureCheck::Missing);

        write_signature(dir.path()).unwrap();
        assert!(verify_signature(dir.path()).unwrap().is_valid());
    }

    #[test]
    fn wrong_version_is_a_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut raw = SIGNATURE_MAGIC.to_le_bytes().to_vec();
        raw.extend_from_slice(&7u32.to_le_bytes());
        fs::write(dir.path().join(SIGNATURE_FILE), raw).unwrap();

        assert_eq!(
            verify_signature(dir.path()).unwrap(),
            SignatureCheck::Mismatch {
                magic: SIGNATURE_MAGIC,
                version: 7
            }
        );
    }

    #[test]
    fn short_file_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SIGNATURE_FILE), [0x53, 0x52]).unwrap();
        assert_eq!(verify_signature(dir.path()).unwrap(), SignatureCheck::Truncated);
    }
}
