//! Threshold access launcher
//!
//! Usage:
//!   threshold-access simulate [-d <N>] [-g <N>] [-b <BITS>] [-p <MODULUS>] [-m <MODE>]
//!                             [-r <N>] [--interval <MS>] [-o <DIR>]
//!   threshold-access node <dealer|guard|relay|user> [--index <I>] [--key-file <FILE>] ...
//!   threshold-access keygen [-b <BITS>] [-o <FILE>]
//!
//! `node` reads peer addresses from `DEALER_ADDRESSES`, `GUARD_ADDRESSES`,
//! `RELAY_ADDRESS` and `USER_ADDRESS`.

use access_core::{BlindingKey, Modulus, OperatingMode, ParticipantId, TokenAssembler};
use access_node::{
    run_node, simulate, ClientHarness, ConnectPolicy, Fabric, HarnessConfig, HarnessReport,
    PeerAddresses, Role, SystemConfig, TcpFabric, Timeouts,
};
use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use num_bigint::BigUint;
use rand::rngs::OsRng;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "threshold-access")]
#[command(about = "Anonymous threshold access tokens", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every node and the client harness in one process
    Simulate {
        #[command(flatten)]
        system: SystemArgs,

        #[command(flatten)]
        harness: HarnessArgs,

        /// Directory to write the latency CSV into
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Run one node over TCP
    Node {
        /// Role of this process
        #[arg(value_enum)]
        role: RoleArg,

        /// Dealer or Guard index, starting at 1
        #[arg(long, default_value = "1")]
        index: u32,

        /// Blinding key written by `keygen` (user, anonymous mode)
        #[arg(long)]
        key_file: Option<PathBuf>,

        #[command(flatten)]
        system: SystemArgs,

        #[command(flatten)]
        harness: HarnessArgs,

        /// Directory to write the latency CSV into (user only)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Generate a blinding key for the anonymous mode
    Keygen {
        /// Modulus size in bits
        #[arg(long, short = 'b', default_value = "128")]
        bit_size: u64,

        /// Output file (JSON)
        #[arg(long, short = 'o', default_value = "blinding_key.json")]
        output: PathBuf,
    },
}

#[derive(Args)]
struct SystemArgs {
    /// Number of Dealers
    #[arg(long, short = 'd', default_value = "3")]
    dealers: u32,

    /// Number of Guards
    #[arg(long, short = 'g', default_value = "4")]
    guards: u32,

    /// Bit size of secrets and values
    #[arg(long, short = 'b', default_value = "128")]
    bit_size: u64,

    /// Modulus; in the anonymous mode, the `n` printed by `keygen`
    #[arg(long, short = 'p', default_value = "373587923")]
    modulus: BigUint,

    /// Operating mode
    #[arg(long, short = 'm', default_value = "distributed-multiplicative")]
    mode: OperatingMode,

    /// Seconds a Guard waits for its peers
    #[arg(long, default_value = "30")]
    timeout: u64,
}

impl SystemArgs {
    fn config(&self) -> anyhow::Result<SystemConfig> {
        let config = SystemConfig {
            num_dealers: self.dealers,
            num_guards: self.guards,
            bit_size: self.bit_size,
            modulus: Modulus::new(self.modulus.clone())?,
            mode: self.mode,
            timeouts: Timeouts::with_request_timeout(Duration::from_secs(self.timeout)),
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Args)]
struct HarnessArgs {
    /// Token requests the user sends
    #[arg(long, short = 'r', default_value = "10")]
    requests: usize,

    /// Milliseconds between token requests
    #[arg(long, default_value = "1000", value_parser = clap::value_parser!(u64).range(1..))]
    interval: u64,
}

impl HarnessArgs {
    fn config(&self, system: &SystemConfig) -> HarnessConfig {
        HarnessConfig {
            requests: self.requests,
            interval: Duration::from_millis(self.interval),
            bit_size: system.bit_size,
            reply_timeout: system.timeouts.relay * 2,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Dealer,
    Guard,
    Relay,
    User,
}

impl RoleArg {
    fn role(self, index: u32) -> anyhow::Result<Role> {
        let id = || ParticipantId::new(index).context("index must be at least 1");
        Ok(match self {
            RoleArg::Dealer => Role::Dealer(id()?),
            RoleArg::Guard => Role::Guard(id()?),
            RoleArg::Relay => Role::Relay,
            RoleArg::User => Role::User,
        })
    }
}

fn print_report(report: &HarnessReport) {
    println!("Accept: {}  Reject: {}", report.granted, report.denied);
    if report.stalled + report.incomplete + report.failed > 0 {
        println!(
            "Stalled: {}  Incomplete: {}  Failed: {}",
            report.stalled, report.incomplete, report.failed
        );
    }
    println!("Token:  {}", report.token_stats());
    println!("Access: {}", report.access_stats());
    println!("Total:  {}", report.total_stats());
}

fn save_report(
    report: &HarnessReport,
    output: Option<PathBuf>,
    system: &SystemConfig,
) -> anyhow::Result<()> {
    if let Some(dir) = output {
        let path = report.write_csv(&dir, system)?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}

async fn run_tcp(
    role: Role,
    key_file: Option<PathBuf>,
    system: SystemConfig,
    harness: HarnessConfig,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let addresses = PeerAddresses::from_env()?;
    addresses.check_counts(system.num_dealers, system.num_guards)?;
    let fabric = TcpFabric::bind(
        addresses.address_of(role)?,
        addresses.routes(system.num_dealers, system.num_guards),
        ConnectPolicy::default(),
    )
    .await?;
    log::info!("{} listening on {}", role, fabric.local_addr());
    let fabric: Arc<dyn Fabric> = Arc::new(fabric);

    if role != Role::User {
        run_node(role, fabric, &system, &system.modulus).await?;
        return Ok(());
    }

    let blinding = match key_file {
        Some(path) => {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            Some(serde_json::from_str::<BlindingKey>(&raw)?)
        }
        None if system.mode.is_anonymous() => bail!("{} needs --key-file", system.mode),
        None => None,
    };
    let modulus = match &blinding {
        Some(key) => key.modulus()?,
        None => system.modulus.clone(),
    };
    let assembler =
        TokenAssembler::new(system.mode, modulus, blinding, system.num_dealers as usize)?;

    let report = ClientHarness::start(fabric, assembler, harness).await?.run().await?;
    print_report(&report);
    save_report(&report, output, &system)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Simulate {
            system,
            harness,
            output,
        } => {
            let system = system.config()?;
            let report = simulate(&system, harness.config(&system)).await?;
            print_report(&report);
            save_report(&report, output, &system)?;
        }
        Commands::Node {
            role,
            index,
            key_file,
            system,
            harness,
            output,
        } => {
            let system = system.config()?;
            let harness = harness.config(&system);
            run_tcp(role.role(index)?, key_file, system, harness, output).await?;
        }
        Commands::Keygen { bit_size, output } => {
            let key = BlindingKey::generate(bit_size, &mut OsRng)?;
            fs::write(&output, serde_json::to_string_pretty(&key)?)?;
            println!("Wrote {}", output.display());
            println!("n = {}", key.n);
        }
    }
    Ok(())
}
