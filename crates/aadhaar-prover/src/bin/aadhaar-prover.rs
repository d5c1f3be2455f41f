//! Command line front end for decoding Aadhaar QR payloads and proving claims

use std::path::{Path, PathBuf};
use std::sync::Arc;

use aadhaar_prover::codec::decode_qr_payload;
use aadhaar_prover::fields::{split_signed_message, Field, FieldTable, QrLayout};
use aadhaar_prover::{
    serialize_claim, CircuitConfig, Groth16Engine, OrchestratorConfig, ProofOrchestrator,
    PublicKeyMaterial, RevealFlags, SerializedClaim, WitnessBuilder,
};
use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use num_bigint::BigUint;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "aadhaar-prover", version)]
#[command(about = "Decode Aadhaar secure QR codes and prove selective claims", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a QR numeral and print its fields
    Decode {
        /// File holding the decimal QR numeral
        #[arg(short, long)]
        qr: PathBuf,

        /// Payload layout
        #[arg(short, long, value_enum, default_value = "v2")]
        layout: LayoutArg,
    },

    /// Build the circuit witness and print it as JSON
    Witness {
        #[command(flatten)]
        input: ProofInput,

        /// Use the legacy V1 circuit constants
        #[arg(long)]
        legacy: bool,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate development proving keys and a matching config file
    Setup {
        /// Directory for the generated artifacts
        #[arg(short, long)]
        dir: PathBuf,

        /// Use the legacy V1 circuit constants
        #[arg(long)]
        legacy: bool,
    },

    /// Prove a claim and write it as JSON
    Prove {
        /// Orchestrator config (TOML)
        #[arg(short, long)]
        config: PathBuf,

        #[command(flatten)]
        input: ProofInput,

        /// Output file for the serialized claim
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Verify a serialized claim
    Verify {
        /// Orchestrator config (TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Serialized claim file
        #[arg(short = 'p', long)]
        claim: PathBuf,

        /// Expected signer key hash (decimal)
        #[arg(long)]
        pubkey_hash: Option<String>,
    },
}

#[derive(Args)]
struct ProofInput {
    /// File holding the decimal QR numeral
    #[arg(short, long)]
    qr: PathBuf,

    /// Signer certificate or public key (PEM)
    #[arg(long)]
    cert: PathBuf,

    /// Application signal bound to the proof
    #[arg(long, default_value = "1")]
    signal: String,

    /// Nullifier seed (decimal)
    #[arg(long)]
    seed: String,

    /// Attributes to reveal
    #[arg(long, value_enum, value_delimiter = ',')]
    reveal: Vec<RevealArg>,
}

impl ProofInput {
    fn read(&self) -> Result<(String, String, BigUint, RevealFlags)> {
        let qr = read_to_string(&self.qr)?;
        let cert = read_to_string(&self.cert)?;
        let seed = BigUint::parse_bytes(self.seed.trim().as_bytes(), 10)
            .ok_or_else(|| anyhow!("nullifier seed must be a decimal integer"))?;

        let mut reveal = RevealFlags::none();
        for flag in &self.reveal {
            match flag {
                RevealArg::Age => reveal.age_above_18 = true,
                RevealArg::Gender => reveal.gender = true,
                RevealArg::Pincode => reveal.pincode = true,
                RevealArg::State => reveal.state = true,
            }
        }
        Ok((qr, cert, seed, reveal))
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum LayoutArg {
    V1,
    V2,
}

#[derive(Clone, Copy, ValueEnum)]
enum RevealArg {
    Age,
    Gender,
    Pincode,
    State,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Decode { qr, layout } => decode(&qr, layout)?,
        Commands::Witness {
            input,
            legacy,
            output,
        } => witness(&input, legacy, output.as_deref())?,
        Commands::Setup { dir, legacy } => setup(&dir, legacy)?,
        Commands::Prove {
            config,
            input,
            output,
        } => prove(&config, &input, &output).await?,
        Commands::Verify {
            config,
            claim,
            pubkey_hash,
        } => verify(&config, &claim, pubkey_hash.as_deref()).await?,
    }

    Ok(())
}

fn decode(qr: &Path, layout: LayoutArg) -> Result<()> {
    let payload = decode_qr_payload(&read_to_string(qr)?)?;
    let layout = match layout {
        LayoutArg::V1 => QrLayout::V1,
        LayoutArg::V2 => QrLayout::V2,
    };
    if QrLayout::detect(&payload) != layout {
        tracing::warn!("Payload marker suggests {:?}", QrLayout::detect(&payload));
    }

    let (data, _) = split_signed_message(&payload)?;
    let table = FieldTable::from_signed_data(data, layout);

    let mut fields = serde_json::Map::new();
    for field in Field::ALL {
        if field == Field::Photo {
            continue;
        }
        if let Some(text) = table.text(field) {
            fields.insert(field.name().into(), text.into());
        }
    }

    let decoded = json!({
        "layout": layout,
        "dataLength": data.len(),
        "photoLength": table.get(Field::Photo).len(),
        "timestamp": table.timestamp()?,
        "dob": table.dob()?,
        "fields": fields,
    });
    println!("{}", serde_json::to_string_pretty(&decoded)?);
    Ok(())
}

fn witness(input: &ProofInput, legacy: bool, output: Option<&Path>) -> Result<()> {
    let (qr, cert, seed, reveal) = input.read()?;
    let config = if legacy {
        CircuitConfig::legacy()
    } else {
        CircuitConfig::v2()
    };

    let witness =
        WitnessBuilder::new(config).build(&qr, &cert, input.signal.as_bytes(), &seed, reveal)?;
    let json = serde_json::to_string_pretty(&witness.to_json())?;

    match output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            info!("Witness written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn setup(dir: &Path, legacy: bool) -> Result<()> {
    let circuit = if legacy {
        CircuitConfig::legacy()
    } else {
        CircuitConfig::v2()
    };

    let keys = Groth16Engine::setup(circuit, &mut rand::thread_rng())?;
    let locations = keys.write_to(dir)?;

    let mut config = OrchestratorConfig::new(locations);
    config.circuit = circuit;
    let path = dir.join("prover.toml");
    config.save(&path)?;

    println!("Development keys written to {}", dir.display());
    println!("Config: {}", path.display());
    println!("These keys come from a local setup and must not be used in production.");
    Ok(())
}

async fn prove(config: &Path, input: &ProofInput, output: &Path) -> Result<()> {
    let orchestrator = orchestrator(config)?;
    let (qr, cert, seed, reveal) = input.read()?;

    let keys = [PublicKeyMaterial::from_pem(&cert)?];
    let witness =
        orchestrator.build_witness(&qr, &keys, input.signal.as_bytes(), &seed, reveal)?;
    let result = orchestrator.prove(witness).await?;
    let claim = orchestrator.project_claim(&result.public_signals, &reveal);

    std::fs::write(output, serialize_claim(&claim, &result)?)
        .with_context(|| format!("writing {}", output.display()))?;

    println!("{}", serde_json::to_string_pretty(&claim)?);
    println!("Claim written to {}", output.display());
    Ok(())
}

async fn verify(config: &Path, claim: &Path, pubkey_hash: Option<&str>) -> Result<()> {
    let orchestrator = orchestrator(config)?;
    let serialized = SerializedClaim::parse(&read_to_string(claim)?)?;
    let result = serialized.to_proof_result()?;

    if orchestrator.verify_result(&result, pubkey_hash).await? {
        println!("Proof is valid");
        println!("{}", serde_json::to_string_pretty(&serialized.claim)?);
        Ok(())
    } else {
        Err(anyhow!("proof is invalid"))
    }
}

fn orchestrator(config: &Path) -> Result<ProofOrchestrator> {
    let config = OrchestratorConfig::load(config)
        .with_context(|| format!("loading {}", config.display()))?;
    Ok(ProofOrchestrator::from_config(
        &config,
        Arc::new(Groth16Engine::new()),
    )?)
}

fn read_to_string(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}
