//! Computes the maximum of two parties' private integers without revealing them.
use std::{
    io,
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};
use yao_max::{
    channel::TcpChannel,
    circuit::{Circuit, CircuitFile},
    data::{self, PrivateData},
    garble::GarbledCircuit,
    group::{DEFAULT_MAX_PRIME_BITS, DEFAULT_PRIME_BITS},
    ot::OtMode,
    presentation::PresentationMode,
    protocol::{Evaluator, EvaluatorOpts, Garbler, GarblerOpts},
};

/// Exit status if the private data cannot be read.
const INPUT_ERROR: u8 = 10;

/// Yao's garbled circuits for computing the maximum of two parties' private integers.
///
/// Logging can be controlled with an EnvFilter via the `YAO_MAX_LOG` environment variable.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// The log level used unless `YAO_MAX_LOG` is set.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Garbles the circuits and connects to the evaluator.
    Garbler {
        /// The address of the evaluator.
        #[arg(long, short, default_value = "127.0.0.1:4080")]
        addr: String,
        /// A .txt file of whitespace separated integers, read from stdin if missing.
        #[arg(long, short)]
        input: Option<PathBuf>,
        /// The bit width of the inputs.
        #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u32).range(1..=63))]
        bit_width: u32,
        /// Sends the evaluator's wire keys in the clear. Insecure, for debugging only!
        #[arg(long)]
        no_ot: bool,
        /// How circuits are printed: 'circuit', 'table' or 'none'.
        #[arg(long, default_value = "none")]
        mode: PresentationMode,
        /// The size of the primes used for oblivious transfer.
        #[arg(long, default_value_t = DEFAULT_PRIME_BITS)]
        prime_bits: u64,
        /// A JSON file of circuits to run instead of the built-in maximum circuit.
        #[arg(long)]
        circuit: Option<PathBuf>,
    },
    /// Waits for the garbler and evaluates its circuits.
    Evaluator {
        /// The address to listen on.
        #[arg(long, short, default_value = "127.0.0.1:4080")]
        addr: String,
        /// A .txt file of whitespace separated integers, read from stdin if missing.
        #[arg(long, short)]
        input: Option<PathBuf>,
        /// Receives the wire keys in the clear. Must match the garbler.
        #[arg(long)]
        no_ot: bool,
        /// The size of the largest prime accepted for oblivious transfer.
        #[arg(long, default_value_t = DEFAULT_MAX_PRIME_BITS)]
        max_prime_bits: u64,
    },
    /// Garbles the circuits and prints them locally, without a second party.
    Local {
        /// The bit width of the built-in maximum circuit.
        #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u32).range(1..=63))]
        bit_width: u32,
        /// How circuits are printed: 'circuit', 'table' or 'none'.
        #[arg(long, default_value = "circuit")]
        mode: PresentationMode,
        /// A JSON file of circuits to print instead of the built-in maximum circuit.
        #[arg(long)]
        circuit: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level).context("tracing initialization")?;

    match cli.command {
        Commands::Garbler {
            addr,
            input,
            bit_width,
            no_ot,
            mode,
            prime_bits,
            circuit,
        } => {
            let circuits = load_circuits(circuit.as_deref(), bit_width)?;
            let Some(data) = load_data(input.as_deref())? else {
                return Ok(ExitCode::from(INPUT_ERROR));
            };
            let opts = GarblerOpts {
                bit_width,
                oblivious_transfer: ot_mode(no_ot),
                prime_bits,
                presentation: mode,
            };
            let channel = TcpChannel::connect(&addr)
                .await
                .with_context(|| format!("connecting to evaluator at {addr}"))?;
            let rng = ChaCha20Rng::from_rng(&mut rand::rng());
            let mut garbler = Garbler::new(channel, rng, data, opts);
            for (circuit, report) in circuits.iter().zip(garbler.run_all(&circuits).await?) {
                match report {
                    Ok(report) => {
                        print!("{}", report.presentation);
                        println!("Result of {} is {}", report.circuit_id, report.result);
                        println!("Result of verification: {}", report.verified);
                    }
                    Err(e) => println!("Running {} failed: {e}", circuit.id),
                }
                println!("-------------");
            }
            garbler.shutdown().await?;
        }
        Commands::Evaluator {
            addr,
            input,
            no_ot,
            max_prime_bits,
        } => {
            let Some(data) = load_data(input.as_deref())? else {
                return Ok(ExitCode::from(INPUT_ERROR));
            };
            let opts = EvaluatorOpts {
                oblivious_transfer: ot_mode(no_ot),
                max_prime_bits,
            };
            info!(%addr, "waiting for the garbler");
            let channel = TcpChannel::accept(&addr)
                .await
                .with_context(|| format!("listening on {addr}"))?;
            let rng = ChaCha20Rng::from_rng(&mut rand::rng());
            let mut evaluator = Evaluator::new(channel, rng, data, opts);
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("could not listen for ctrl-c: {e}");
                }
            };
            for report in evaluator.serve(shutdown).await? {
                println!("Result of {} is {}", report.circuit_id, report.result);
                match report.verification {
                    Some(v) if v.matches => println!("Verified correctly"),
                    Some(v) => println!(
                        "Error! Through transfer obtained: {}, correct value: {}",
                        v.disclosed, v.expected
                    ),
                    None => println!("Not verified"),
                }
            }
        }
        Commands::Local {
            bit_width,
            mode,
            circuit,
        } => {
            let mut rng = ChaCha20Rng::from_rng(&mut rand::rng());
            for circuit in load_circuits(circuit.as_deref(), bit_width)? {
                let garbled = GarbledCircuit::garble(circuit, &mut rng)?;
                print!("{}", mode.render(&garbled)?);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn ot_mode(no_ot: bool) -> OtMode {
    if no_ot {
        OtMode::Bypass
    } else {
        OtMode::Enabled
    }
}

fn load_circuits(path: Option<&Path>, bit_width: u32) -> anyhow::Result<Vec<Circuit>> {
    match path {
        Some(path) => {
            let file = CircuitFile::load(path)
                .with_context(|| format!("loading circuits from {}", path.display()))?;
            info!(name = %file.name, circuits = file.circuits.len(), "loaded circuits");
            Ok(file.circuits)
        }
        None => Ok(vec![Circuit::maximum(bit_width)?]),
    }
}

/// Reads the private data; `None` if the data file does not exist or cannot be read.
fn load_data(path: Option<&Path>) -> anyhow::Result<Option<PrivateData>> {
    let data = match path {
        Some(path) => PrivateData::from_file(path),
        None => PrivateData::from_reader(io::stdin().lock()),
    };
    match data {
        Ok(data) => Ok(Some(data)),
        Err(e @ data::Error::Io { .. }) => {
            error!("{e}");
            eprintln!("{e}");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn init_tracing(log_level: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::builder()
        .with_env_var("YAO_MAX_LOG")
        .with_default_directive(log_level.parse()?)
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(io::stderr)
        .init();

    Ok(())
}
