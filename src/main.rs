use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use sayonara_engine::config::EngineConfig;
use sayonara_engine::drives::{SimulatedBackend, SysfsBackend};
use sayonara_engine::journal::OperationJournal;
use sayonara_engine::*;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "sayonara")]
#[command(about = "Secure erasure with signed wipe certificates")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine configuration file (TOML)
    #[arg(long, global = true, env = "SAYONARA_CONFIG")]
    config: Option<PathBuf>,

    /// Use the in-memory demo devices instead of real hardware
    #[arg(long, global = true)]
    simulate: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List detected devices
    List {
        /// Print descriptors as JSON
        #[arg(long)]
        json: bool,
    },

    /// List available sanitization methods
    Methods,

    /// Erase a device and issue a certificate
    Wipe {
        /// Device id as shown by `list`
        device_id: String,

        /// Sanitization method id
        #[arg(short, long, default_value = "NIST-800-88")]
        method: String,

        /// Write the certificate here instead of printing it
        #[arg(short = 'o', long)]
        cert_output: Option<PathBuf>,

        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Verify a certificate file
    Verify {
        certificate: PathBuf,

        /// Hex Ed25519 public key; defaults to the local signing key
        #[arg(long)]
        public_key: Option<String>,
    },

    /// Issue a certificate for a journaled terminal operation
    Attest {
        operation_id: String,

        #[arg(short = 'o', long)]
        cert_output: Option<PathBuf>,
    },

    /// Show journaled operations
    Journal,

    /// Create the signing key if needed and print its public half
    Keygen,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if !cfg!(feature = "color-output") {
        colored::control::set_override(false);
    }

    let mut config = EngineConfig::load(cli.config.as_deref())?;
    if cli.debug {
        config.log.level = "debug".to_string();
    }
    let _log_guard = logging::init(&config.log)?;

    match cli.command {
        Commands::List { json } => list_devices(&inventory(cli.simulate), json)?,
        Commands::Methods => list_methods(),
        Commands::Wipe {
            device_id,
            method,
            cert_output,
            yes,
        } => {
            wipe(
                &config,
                cli.simulate,
                &device_id,
                &method,
                cert_output.as_deref(),
                yes,
            )
            .await?
        }
        Commands::Verify {
            certificate,
            public_key,
        } => verify(&config, &certificate, public_key.as_deref())?,
        Commands::Attest {
            operation_id,
            cert_output,
        } => attest(&config, &operation_id, cert_output.as_deref())?,
        Commands::Journal => show_journal(&config)?,
        Commands::Keygen => {
            let key = SigningKey::load_or_generate(&config.signing_key_path)?;
            println!("{}", key.public_key_hex());
        }
    }

    Ok(())
}

fn inventory(simulate: bool) -> DeviceInventory {
    let backend: Arc<dyn DeviceBackend> = if simulate {
        Arc::new(SimulatedBackend::demo())
    } else {
        Arc::new(SysfsBackend::new())
    };
    DeviceInventory::new(backend)
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

fn list_devices(inventory: &DeviceInventory, json: bool) -> Result<()> {
    let devices = inventory.scan()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No devices detected.");
        return Ok(());
    }

    println!(
        "{:<22} {:<14} {:<26} {:<10} {:<6} {:<8} {:<6} {}",
        "Device ID", "Path", "Model", "Size", "Type", "Health", "Temp", "Flags"
    );
    println!("{}", "-".repeat(108));

    for device in devices {
        let health = match device.health.status {
            HealthStatus::Healthy => "healthy".green(),
            HealthStatus::Warning => "warning".yellow(),
            HealthStatus::Critical => "critical".red().bold(),
            HealthStatus::Unknown => "unknown".dimmed(),
        };
        let temp = device
            .health
            .temperature_celsius
            .map(|t| format!("{}°C", t))
            .unwrap_or_else(|| "-".to_string());

        let mut flags = Vec::new();
        if device.supports_hardware_secure_erase {
            flags.push("secure-erase");
        }
        if device.is_encrypted {
            flags.push("encrypted");
        }
        if device.has_host_protected_area {
            flags.push("HPA");
        }
        if device.has_device_configuration_overlay {
            flags.push("DCO");
        }

        println!(
            "{:<22} {:<14} {:<26} {:<10} {:<6} {:<8} {:<6} {}",
            device.device_id,
            device.path,
            truncate(&device.model, 26),
            format_size(device.capacity_bytes),
            device.device_type.to_string(),
            health,
            temp,
            flags.join(",")
        );
    }

    Ok(())
}

fn list_methods() {
    let registry = MethodRegistry::builtin();
    for method in registry.list() {
        let requirement = if method.requires_hardware_erase() {
            " (requires hardware secure erase)".yellow().to_string()
        } else {
            String::new()
        };
        println!(
            "{:<18} {} - {} pass(es){}",
            method.id.bold(),
            method.name,
            method.pass_count(),
            requirement
        );
        for (i, pass) in method.passes.iter().enumerate() {
            let verify = if pass.verify { ", verified" } else { "" };
            println!("    {:>2}. {}{}", i + 1, pass.pattern.describe(), verify);
        }
    }
}

fn confirm(device: &DeviceDescriptor, method: &str) -> Result<bool> {
    println!(
        "\n{}",
        "WARNING: this will PERMANENTLY DESTROY all data on:".red().bold()
    );
    println!("  Device: {} ({})", device.device_id, device.path);
    println!("  Model:  {}", device.model);
    println!("  Size:   {}", format_size(device.capacity_bytes));
    println!("  Method: {}", method);
    print!("\nType 'DESTROY' to confirm: ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim() == "DESTROY")
}

fn progress_bar(total: u64) -> Result<ProgressBar> {
    if !cfg!(feature = "progress-bars") {
        return Ok(ProgressBar::hidden());
    }
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}",
        )?
        .progress_chars("█▓░"),
    );
    Ok(bar)
}

fn install_interrupt_handler(executor: Arc<EraseExecutor>) -> Result<()> {
    use signal_hook::{consts::SIGINT, iterator::Signals};

    let mut signals = Signals::new([SIGINT])?;
    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            eprintln!("\nInterrupt received, aborting after the current chunk...");
            executor.abort_all();
        }
    });
    Ok(())
}

async fn wipe(
    config: &EngineConfig,
    simulate: bool,
    device_id: &str,
    method_id: &str,
    cert_output: Option<&Path>,
    assume_yes: bool,
) -> Result<()> {
    let inventory = Arc::new(inventory(simulate));
    inventory.scan()?;
    let device = inventory.lookup(device_id)?;

    let registry = Arc::new(MethodRegistry::builtin());
    let method = registry.resolve(method_id)?;
    registry.validate(method, &device)?;

    if !assume_yes && !confirm(&device, &method.id)? {
        println!("Operation cancelled");
        return Ok(());
    }

    // Key must load before anything is written
    let key = Arc::new(SigningKey::load_or_generate(&config.signing_key_path)?);
    let journal = OperationJournal::open(&config.journal_path)?;
    let executor = Arc::new(EraseExecutor::new(
        inventory,
        Arc::clone(&registry),
        journal,
        config.executor.clone(),
    )?);
    install_interrupt_handler(Arc::clone(&executor))?;

    let operation_id = executor.begin(device_id, method_id)?;
    let initial = executor.status(&operation_id)?;
    let capacity = initial.progress.bytes_total;
    let bar = progress_bar(capacity * initial.passes_total as u64)?;

    let operation = loop {
        let op = executor.status(&operation_id)?;
        let current = if op.progress.pass_index == op.passes_completed {
            op.progress.bytes_written
        } else {
            0
        };
        bar.set_position(op.passes_completed as u64 * capacity + current);
        bar.set_message(format!(
            "pass {}/{} {:?}",
            (op.progress.pass_index + 1).min(op.passes_total),
            op.passes_total,
            op.progress.phase
        ));
        if op.is_terminal() {
            break op;
        }
        tokio::time::sleep(executor.config().status_poll_interval()).await;
    };
    bar.finish_and_clear();
    executor.shutdown().await;

    let elapsed = operation
        .ended_at
        .map(|end| (end - operation.started_at).to_std().unwrap_or_default())
        .unwrap_or_default();
    let summary = format!(
        "{} {} on {}: {}/{} passes in {}",
        operation.method_id,
        operation.state,
        operation.device_id,
        operation.passes_completed,
        operation.passes_total,
        humantime::format_duration(Duration::from_secs(elapsed.as_secs()))
    );
    match operation.state {
        OperationState::Succeeded => println!("{}", summary.green().bold()),
        OperationState::Aborted => println!("{}", summary.yellow().bold()),
        _ => println!("{}", summary.red().bold()),
    }
    if let Some(cause) = &operation.failure {
        println!("  cause: {}", cause);
    }

    let certificate = CertificateIssuer::new(key).issue(&operation)?;
    write_certificate(&certificate, cert_output)?;

    if operation.state != OperationState::Succeeded {
        bail!("erase did not succeed ({})", operation.state);
    }
    Ok(())
}

fn write_certificate(certificate: &Certificate, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            certificate
                .save(path)
                .with_context(|| format!("Failed to write certificate to {}", path.display()))?;
            println!("Certificate written to {}", path.display());
        }
        None => println!("{}", certificate.to_json()?),
    }
    Ok(())
}

fn verify(config: &EngineConfig, path: &Path, public_key: Option<&str>) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read certificate {}", path.display()))?;

    let verifier = match public_key {
        Some(hex) => CertificateVerifier::from_hex(hex)?,
        None => SigningKey::load(&config.signing_key_path)?.verifier(),
    };

    match verifier.verify_json(&text) {
        Verdict::Valid => {
            println!("{}", "Certificate is valid".green().bold());
            Ok(())
        }
        Verdict::Invalid(reason) => {
            println!("{} {}", "Certificate is INVALID:".red().bold(), reason);
            bail!("certificate verification failed")
        }
    }
}

fn attest(config: &EngineConfig, operation_id: &str, output: Option<&Path>) -> Result<()> {
    let mut journal = OperationJournal::open(&config.journal_path)?;
    journal.recover_interrupted()?;
    let operation = journal
        .load(operation_id)?
        .ok_or_else(|| DriveError::OperationNotFound(operation_id.to_string()))?;

    let key = Arc::new(SigningKey::load_or_generate(&config.signing_key_path)?);
    let certificate = CertificateIssuer::new(key).issue(&operation)?;
    write_certificate(&certificate, output)
}

fn show_journal(config: &EngineConfig) -> Result<()> {
    let journal = OperationJournal::open(&config.journal_path)?;
    let operations = journal.load_all()?;
    if operations.is_empty() {
        println!("Journal is empty.");
        return Ok(());
    }

    println!(
        "{:<38} {:<22} {:<16} {:<10} {:<7} {}",
        "Operation", "Device", "Method", "State", "Passes", "Started"
    );
    println!("{}", "-".repeat(120));
    for op in operations {
        let state = match op.state {
            OperationState::Succeeded => op.state.to_string().green(),
            OperationState::Failed => op.state.to_string().red(),
            OperationState::Aborted => op.state.to_string().yellow(),
            _ => op.state.to_string().normal(),
        };
        println!(
            "{:<38} {:<22} {:<16} {:<10} {:<7} {}",
            op.operation_id,
            op.device_id,
            op.method_id,
            state,
            format!("{}/{}", op.passes_completed, op.passes_total),
            op.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        if let Some(cause) = op.failure {
            println!("    {}", cause.to_string().dimmed());
        }
    }
    Ok(())
}
