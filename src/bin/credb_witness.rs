//! Binary entry point for the `credb-witness` verification tool: reads
//! an ASCII-armored witness and checks its signature and event list
//! offline, without a connection to any server.
#![forbid(unsafe_code)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use credb::crypto::signing::PublicKey;
use credb::ledger::witness::Witness;

#[derive(Parser, Debug)]
#[command(name = "credb-witness", version, about = "Inspect and verify CreDB witnesses")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a witness's server name and covered events.
    Show {
        /// Path to an ASCII-armored witness file.
        witness: PathBuf,
    },
    /// Verify a witness's signature against a server's public key.
    Verify {
        /// Path to an ASCII-armored witness file.
        witness: PathBuf,
        /// Path to the signing server's SEC1-encoded public key.
        pubkey: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Show { witness } => {
            let armored = std::fs::read_to_string(&witness)?;
            let witness = Witness::from_armor(&armored)?;
            println!("server: {}", witness.server_name());
            println!("events:");
            for event in witness.events() {
                println!(
                    "  shard={} block={} index={} key={} version={} op={}",
                    event.shard, event.block, event.index, event.key, event.version, event.operation
                );
            }
            for (shard, mark) in witness.shard_high_water_marks() {
                println!("shard {shard} high-water mark: {mark:#x}");
            }
        }
        Command::Verify { witness, pubkey } => {
            let armored = std::fs::read_to_string(&witness)?;
            let witness = Witness::from_armor(&armored)?;
            let pubkey_bytes = std::fs::read(&pubkey)?;
            let pubkey = PublicKey::from_sec1_bytes(&pubkey_bytes)?;
            if witness.verify(&pubkey) {
                println!("witness signature valid ({} events)", witness.events().len());
            } else {
                eprintln!("witness signature INVALID");
                std::process::exit(1);
            }
        }
    }
    Ok(())
}
