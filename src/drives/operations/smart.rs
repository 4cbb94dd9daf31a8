use crate::{HealthSnapshot, HealthStatus};
use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::process::Command;

lazy_static! {
    // NVMe: "Temperature:                        38 Celsius"
    static ref NVME_TEMPERATURE: Regex =
        Regex::new(r"(?m)^Temperature:\s+(\d+)\s+Celsius").expect("static regex");
    // NVMe: "Available Spare:                    100%"
    static ref NVME_SPARE: Regex =
        Regex::new(r"(?m)^Available Spare:\s+(\d+)%").expect("static regex");
    // NVMe: "Percentage Used:                    3%"
    static ref NVME_USED: Regex =
        Regex::new(r"(?m)^Percentage Used:\s+(\d+)%").expect("static regex");
    // NVMe: "Critical Warning:                   0x00"
    static ref NVME_CRITICAL: Regex =
        Regex::new(r"(?m)^Critical Warning:\s+0x([0-9a-fA-F]+)").expect("static regex");
}

/// Counters that feed the health verdict; only what the verdict reads
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SMARTHealth {
    pub self_assessment_failed: bool,
    pub self_assessment_passed: bool,
    pub temperature_celsius: Option<u32>,
    pub reallocated_sectors: Option<u64>,
    pub pending_sectors: Option<u64>,
    pub uncorrectable_errors: Option<u64>,
    /// Percentage of rated endurance used
    pub wear_level: Option<u64>,
    pub available_spare: Option<u64>,
    pub critical_warning: Option<u64>,
}

impl SMARTHealth {
    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            status: SMARTMonitor::determine_health_status(self),
            temperature_celsius: self.temperature_celsius,
        }
    }
}

pub struct SMARTMonitor;

impl SMARTMonitor {
    /// Run `smartctl -H -A` and reduce it to a health snapshot
    pub fn get_health(device_path: &str, is_nvme: bool) -> Result<HealthSnapshot> {
        let output = Command::new("smartctl")
            .args(["-H", "-A", device_path])
            .output()
            .with_context(|| format!("failed to run smartctl on {}", device_path))?;

        // smartctl uses its exit status as a bitmask; bits 0-1 mean the
        // command itself could not talk to the device
        if let Some(code) = output.status.code() {
            if code & 0b11 != 0 {
                anyhow::bail!("smartctl could not read {} (exit {})", device_path, code);
            }
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let health = if is_nvme {
            Self::parse_nvme_smart(&stdout)
        } else {
            Self::parse_ata_smart(&stdout)
        };

        Ok(health.snapshot())
    }

    pub(crate) fn parse_ata_smart(output: &str) -> SMARTHealth {
        let mut health = Self::parse_self_assessment(output);

        let mut in_attributes = false;
        for line in output.lines() {
            if line.contains("ID# ATTRIBUTE_NAME") {
                in_attributes = true;
                continue;
            }
            if !in_attributes {
                continue;
            }

            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 10 || parts[0].parse::<u8>().is_err() {
                continue;
            }

            let current = parts[3].parse::<u64>().unwrap_or(0);
            let raw_value = Self::parse_raw_value(&parts[9..].join(" "));

            match parts[1] {
                "Temperature_Celsius" | "Airflow_Temperature_Cel" => {
                    if health.temperature_celsius.is_none() {
                        health.temperature_celsius = Self::plausible_temperature(raw_value);
                    }
                }
                "Reallocated_Sector_Ct" => health.reallocated_sectors = Some(raw_value),
                "Current_Pending_Sector" => health.pending_sectors = Some(raw_value),
                "Offline_Uncorrectable" | "Reported_Uncorrect" => {
                    health.uncorrectable_errors = Some(raw_value)
                }
                "Wear_Leveling_Count" | "SSD_Life_Left" | "Media_Wearout_Indicator" => {
                    health.wear_level = Some(100u64.saturating_sub(current))
                }
                _ => {}
            }
        }

        health
    }

    pub(crate) fn parse_nvme_smart(output: &str) -> SMARTHealth {
        let mut health = Self::parse_self_assessment(output);

        let capture = |re: &Regex, radix: u32| {
            re.captures(output)
                .and_then(|c| c.get(1))
                .and_then(|m| u64::from_str_radix(m.as_str(), radix).ok())
        };

        health.temperature_celsius =
            capture(&NVME_TEMPERATURE, 10).and_then(Self::plausible_temperature);
        health.available_spare = capture(&NVME_SPARE, 10);
        health.wear_level = capture(&NVME_USED, 10);
        health.critical_warning = capture(&NVME_CRITICAL, 16);

        health
    }

    fn parse_self_assessment(output: &str) -> SMARTHealth {
        let mut health = SMARTHealth::default();
        for line in output.lines() {
            if line.contains("self-assessment test result") || line.contains("SMART Health Status")
            {
                if line.contains("PASSED") || line.trim_end().ends_with("OK") {
                    health.self_assessment_passed = true;
                } else if line.contains("FAILED") {
                    health.self_assessment_failed = true;
                }
            }
        }
        health
    }

    pub(crate) fn determine_health_status(health: &SMARTHealth) -> HealthStatus {
        if health.self_assessment_failed {
            return HealthStatus::Critical;
        }

        let mut status = if health.self_assessment_passed {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unknown
        };

        let mut escalate = |level: HealthStatus| {
            status = match (status, level) {
                (HealthStatus::Critical, _) | (_, HealthStatus::Critical) => HealthStatus::Critical,
                _ => HealthStatus::Warning,
            };
        };

        if let Some(reallocated) = health.reallocated_sectors {
            if reallocated > 100 {
                escalate(HealthStatus::Critical);
            } else if reallocated > 10 {
                escalate(HealthStatus::Warning);
            }
        }
        if health.pending_sectors.unwrap_or(0) > 0 {
            escalate(HealthStatus::Warning);
        }
        if health.uncorrectable_errors.unwrap_or(0) > 0 {
            escalate(HealthStatus::Critical);
        }
        if let Some(wear) = health.wear_level {
            if wear > 90 {
                escalate(HealthStatus::Critical);
            } else if wear > 80 {
                escalate(HealthStatus::Warning);
            }
        }
        if let Some(spare) = health.available_spare {
            if spare < 10 {
                escalate(HealthStatus::Critical);
            } else if spare < 20 {
                escalate(HealthStatus::Warning);
            }
        }
        if health.critical_warning.unwrap_or(0) > 0 {
            escalate(HealthStatus::Warning);
        }
        if let Some(temp) = health.temperature_celsius {
            if temp > 70 {
                escalate(HealthStatus::Critical);
            } else if temp > 60 {
                escalate(HealthStatus::Warning);
            }
        }

        status
    }

    /// Raw values come as "34", "0x0022" or "34 (Min/Max 20/45)"
    pub(crate) fn parse_raw_value(raw: &str) -> u64 {
        let first = raw.split_whitespace().next().unwrap_or("");
        if let Some(hex) = first.strip_prefix("0x") {
            return u64::from_str_radix(hex, 16).unwrap_or(0);
        }
        first.parse().unwrap_or(0)
    }

    /// Drives do not survive above 100°C; anything higher is a bad reading
    fn plausible_temperature(value: u64) -> Option<u32> {
        if value <= 100 {
            Some(value as u32)
        } else {
            tracing::debug!(value, "ignoring implausible temperature reading");
            None
        }
    }
}
