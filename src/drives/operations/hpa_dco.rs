use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::process::Command;

lazy_static! {
    // "max sectors   = 976771055/976773168, HPA is enabled"
    static ref MAX_SECTORS: Regex =
        Regex::new(r"max sectors\s*=\s*(\d+)\s*/\s*(\d+)").expect("static regex");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HPAInfo {
    pub current_max_sectors: u64,
    pub native_max_sectors: u64,
}

impl HPAInfo {
    pub fn hidden_sectors(&self) -> u64 {
        self.native_max_sectors.saturating_sub(self.current_max_sectors)
    }

    pub fn hidden_size_bytes(&self) -> u64 {
        self.hidden_sectors() * 512
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DCOInfo {
    pub real_max_sectors: u64,
    pub dco_max_sectors: u64,
}

impl DCOInfo {
    pub fn hidden_sectors(&self) -> u64 {
        self.real_max_sectors.saturating_sub(self.dco_max_sectors)
    }
}

/// Read-only probing of ATA hidden areas and security feature set.
///
/// Nothing here ever changes drive configuration.
pub struct HPADCOManager;

impl HPADCOManager {
    /// HPA present if the native max address is above the current max
    pub fn detect_hpa(device_path: &str) -> Result<Option<HPAInfo>> {
        let output = Self::hdparm(&["-N", device_path])?;
        Ok(Self::parse_hpa_output(&output).filter(|hpa| hpa.hidden_sectors() > 0))
    }

    pub fn detect_dco(device_path: &str) -> Result<Option<DCOInfo>> {
        let output = Self::hdparm(&["--dco-identify", device_path])?;
        Ok(Self::parse_dco_output(&output).filter(|dco| dco.hidden_sectors() > 0))
    }

    /// Whether ATA SECURITY ERASE UNIT can be issued right now
    pub fn supports_security_erase(device_path: &str) -> Result<bool> {
        let output = Self::hdparm(&["-I", device_path])?;
        Ok(Self::parse_security_erase_support(&output))
    }

    fn hdparm(args: &[&str]) -> Result<String> {
        let output = Command::new("hdparm")
            .args(args)
            .output()
            .with_context(|| format!("failed to run hdparm {}", args.join(" ")))?;

        if !output.status.success() {
            anyhow::bail!(
                "hdparm {} exited with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub(crate) fn parse_hpa_output(output: &str) -> Option<HPAInfo> {
        let caps = MAX_SECTORS.captures(output)?;
        let current = caps.get(1)?.as_str().parse().ok()?;
        let native = caps.get(2)?.as_str().parse().ok()?;

        Some(HPAInfo {
            current_max_sectors: current,
            native_max_sectors: native,
        })
    }

    pub(crate) fn parse_dco_output(output: &str) -> Option<DCOInfo> {
        let mut real_max = None;
        let mut dco_max = None;

        for line in output.lines() {
            if line.contains("Real max sectors") {
                real_max = Self::extract_number_from_line(line);
            } else if line.contains("DCO max sectors") {
                dco_max = Self::extract_number_from_line(line);
            }
        }

        Some(DCOInfo {
            real_max_sectors: real_max?,
            dco_max_sectors: dco_max?,
        })
    }

    /// Security feature set listed as supported and the drive not frozen.
    ///
    /// `hdparm -I` prints the frozen state on its own line, either
    /// `frozen` or `not	frozen`.
    pub(crate) fn parse_security_erase_support(output: &str) -> bool {
        let mut in_security = false;
        let mut supported = false;
        let mut frozen = false;

        for line in output.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with("Security:") {
                in_security = true;
                continue;
            }
            if !in_security {
                continue;
            }
            // Next top-level section ends the block
            if !line.starts_with(char::is_whitespace) && !trimmed.is_empty() {
                break;
            }

            let normalized = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
            match normalized.as_str() {
                "supported" => supported = true,
                "frozen" => frozen = true,
                _ => {}
            }
            if normalized.starts_with("supported: enhanced erase") {
                supported = true;
            }
        }

        supported && !frozen
    }

    /// Largest number in the line (the sector count)
    pub(crate) fn extract_number_from_line(line: &str) -> Option<u64> {
        line.split(|c: char| !c.is_ascii_digit())
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse::<u64>().ok())
            .max()
    }
}
