//! Administrative client for the MRP daemon

use clap::{Parser, Subcommand};
use mrp::types::{MRP_DEFAULT_PRIO, RingRole};
use mrp_server::ControlClient;
use mrp_server::ctl::{AddRequest, RingLine};
use mrp_server::netif::{index_to_name, name_to_index};
use std::path::PathBuf;
use std::process::ExitCode;

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "mrpctl", version, about = "Configure MRP rings")]
struct Cli {
    /// Daemon control socket
    #[arg(short, long, default_value = "/var/run/mrp/mrp_server.sock")]
    socket: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create MRP instance
    Addmrp {
        bridge: String,
        ring_nr: u32,
        /// Primary ring port
        pport: String,
        /// Secondary ring port
        sport: String,
        /// mrm, mrc or mra
        role: String,
        #[arg(default_value_t = MRP_DEFAULT_PRIO)]
        prio: u16,
    },
    /// Delete MRP instance
    Delmrp { bridge: String, ring_nr: u32 },
    /// Show MRP instances
    Getmrp {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn parse_role(role: &str) -> anyhow::Result<RingRole> {
    match role.parse::<RingRole>()? {
        RingRole::Disabled => anyhow::bail!("ring role must be mrm, mrc or mra"),
        role => Ok(role),
    }
}

fn ring_nr(value: u32) -> anyhow::Result<u32> {
    if value == 0 {
        anyhow::bail!("ring_nr must not be 0");
    }
    Ok(value)
}

/// A checked command, ready to send
enum Action {
    Add(AddRequest),
    Del { bridge: u32, ring_nr: u32 },
    Get { json: bool },
}

impl Action {
    fn from_command(command: Command) -> anyhow::Result<Self> {
        Ok(match command {
            Command::Addmrp {
                bridge,
                ring_nr: nr,
                pport,
                sport,
                role,
                prio,
            } => Action::Add(AddRequest {
                bridge: name_to_index(&bridge)?,
                ring_nr: ring_nr(nr)?,
                primary: name_to_index(&pport)?,
                secondary: name_to_index(&sport)?,
                role: parse_role(&role)? as u32,
                priority: prio as u32,
            }),
            Command::Delmrp { bridge, ring_nr: nr } => Action::Del {
                bridge: name_to_index(&bridge)?,
                ring_nr: ring_nr(nr)?,
            },
            Command::Getmrp { json } => Action::Get { json },
        })
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let action = Action::from_command(cli.command)?;
    let client = ControlClient::connect(&cli.socket)?;

    match action {
        Action::Add(request) => client.add(request).await?,
        Action::Del { bridge, ring_nr } => client.delete(bridge, ring_nr).await?,
        Action::Get { json } => {
            let name = |ifindex: u32| index_to_name(ifindex).unwrap_or_else(|_| ifindex.to_string());
            let lines: Vec<RingLine> = client
                .list()
                .await?
                .iter()
                .map(|record| RingLine::new(record, &name))
                .collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&lines)?);
            } else {
                for line in lines {
                    println!("{line}");
                }
            }
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // help and version go to stdout and are not failures
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("mrpctl: {e:#}");
            ExitCode::FAILURE
        }
    }
}
