//! iom-sim: Run the I/O manager against an in-memory APEX fabric.
//!
//! Builds the demo configuration for the selected display-unit personality,
//! injects bus traffic, and prints one JSON snapshot of the application
//! parameter buffer per cycle.

use clap::{Parser, Subcommand};
use serde_json::json;

use iom_core::bytes::Endianness;
use iom_core::config::Config;
use iom_core::types::Validity;
use iom_partition::platform::display_unit_from_arg;
use iom_partition::{IoManager, IoManagerOptions, MemApex};

mod demo;

const APP_PERIOD_NS: u64 = 16_500_000;

#[derive(Parser)]
#[command(name = "iom-sim", version, about = "I/O manager cycle simulator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run N cycles of the demo configuration
    Run {
        /// Display unit identity, simulator syntax: DUID=<1..5>
        #[arg(long, default_value = "DUID=1")]
        duid: String,

        /// Number of periodic cycles to run
        #[arg(long, default_value_t = 16)]
        cycles: u32,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { duid, cycles } => cmd_run(&duid, cycles),
    }
}

fn cmd_run(duid: &str, cycles: u32) {
    let du = display_unit_from_arg(duid);
    eprintln!("Display unit: {du:?}, {cycles} cycles at 16.5 ms");

    let blobs = demo::personalities();
    let cfg = match Config::select(
        du,
        [
            blobs[0].as_slice(),
            blobs[1].as_slice(),
            blobs[2].as_slice(),
            blobs[3].as_slice(),
            blobs[4].as_slice(),
        ],
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let te = Endianness::native();
    let mut apex = MemApex::new();
    let options = IoManagerOptions {
        afdx_header_extra_padding: 0,
        ..IoManagerOptions::default()
    };
    let mut iom = IoManager::init(cfg, APP_PERIOD_NS, &mut apex, &demo::can_routing(), &[], options);

    // Application output: a status word the IOM echoes onto AFDX.
    let mut out_param = vec![0u8; 32];
    out_param[4..8].copy_from_slice(&4u32.to_ne_bytes()); // NORMALOP

    for cycle in 0..cycles {
        demo::inject_traffic(&mut apex, cycle, te);
        out_param[0..4].copy_from_slice(&(0xC0DE_0000u32 | cycle).to_ne_bytes());

        iom.step(&mut apex, &out_param);

        let params = iom.input_params();
        let altitude = u32::from_ne_bytes([
            params[demo::ALTITUDE_PAR],
            params[demo::ALTITUDE_PAR + 1],
            params[demo::ALTITUDE_PAR + 2],
            params[demo::ALTITUDE_PAR + 3],
        ]);
        let snapshot = json!({
            "cycle": cycle,
            "altitude_ft": altitude,
            "altitude_validity": Validity::read(params, demo::ALTITUDE_VAL),
            "pilot_count": params[demo::PILOT_PAR],
            "pilot_validity": Validity::read(params, demo::PILOT_VAL),
            "afdx_out": apex.sample(demo::AFDX_OUT_PORT).map(hex),
        });
        println!("{snapshot}");
    }

    eprintln!("Done.");
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02X}")).collect()
}
