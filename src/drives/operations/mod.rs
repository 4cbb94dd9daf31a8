// Read-only drive probes and native erase commands
//
// Everything here shells out to hdparm / nvme-cli / smartctl. Output parsers are
// kept separate from the command invocation so they can be tested on captured text.

pub mod hpa_dco; // Host Protected Area / Device Configuration Overlay
pub mod secure_erase; // ATA SECURITY ERASE UNIT, NVMe Format
pub mod smart; // SMART health and temperature

pub use hpa_dco::HPADCOManager;
pub use secure_erase::SecureErase;
pub use smart::SMARTMonitor;
