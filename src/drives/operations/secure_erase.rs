use crate::DeviceType;
use anyhow::{anyhow, Context, Result};
use std::process::Command;

/// Password used for the transient ATA security state during SECURITY ERASE UNIT.
/// The drive clears it again when the erase completes.
const ATA_ERASE_PASSWORD: &str = "sayonara";

/// Device-native sanitize commands
pub struct SecureErase;

impl SecureErase {
    /// Issue the native erase for the device family and block until it completes
    pub fn run(device_path: &str, device_type: DeviceType) -> Result<()> {
        tracing::info!(device = device_path, %device_type, "issuing native secure erase");

        match device_type {
            DeviceType::NVMe => Self::nvme_format(device_path),
            DeviceType::SSD | DeviceType::HDD => Self::ata_security_erase(device_path),
            DeviceType::EMMC | DeviceType::Other => Err(anyhow!(
                "no native secure erase command for {} device {}",
                device_type,
                device_path
            )),
        }
    }

    /// Whether `nvme id-ctrl -H` reports Format NVM support
    pub fn nvme_supports_format(device_path: &str) -> Result<bool> {
        let output = Command::new("nvme")
            .args(["id-ctrl", "-H", device_path])
            .output()
            .with_context(|| format!("failed to run nvme id-ctrl on {}", device_path))?;

        if !output.status.success() {
            return Ok(false);
        }

        Ok(Self::parse_nvme_format_support(&String::from_utf8_lossy(
            &output.stdout,
        )))
    }

    pub(crate) fn parse_nvme_format_support(output: &str) -> bool {
        output
            .lines()
            .any(|line| line.contains("Format NVM Supported") && !line.contains("Not Supported"))
    }

    fn ata_security_erase(device_path: &str) -> Result<()> {
        Self::run_checked(
            "hdparm",
            &[
                "--user-master",
                "u",
                "--security-set-pass",
                ATA_ERASE_PASSWORD,
                device_path,
            ],
        )
        .context("failed to set ATA security password")?;

        Self::run_checked(
            "hdparm",
            &[
                "--user-master",
                "u",
                "--security-erase",
                ATA_ERASE_PASSWORD,
                device_path,
            ],
        )
        .context("ATA SECURITY ERASE UNIT failed")
    }

    fn nvme_format(device_path: &str) -> Result<()> {
        Self::run_checked("nvme", &["format", device_path, "--ses=1", "--force"])
            .context("NVMe format with user data erase failed")
    }

    fn run_checked(program: &str, args: &[&str]) -> Result<()> {
        let output = Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("failed to spawn {}", program))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(anyhow!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }
}
