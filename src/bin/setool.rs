//! SmartElektra commissioning tool
//!
//! Usage:
//!   setool --host 192.168.1.50 read-coils --address 0 --count 8 --slave 1
//!   setool --config devices.yaml --endpoint hall assign-slave-id --new-slave 12
//!   setool --host 192.168.1.50 button-mode bi --slave 12

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use smartelektra_tools::{
    services, AssignOutcome, AssignSlaveId, ButtonMode, DeviceHub, DeviceTools, EndpointConfig,
    NumberKey, OutputLevel, ReadCoilsRequest, ToolsConfig, WriteCoilRequest,
    WriteRegisterRequest,
};
use tracing_subscriber::EnvFilter;

/// Configure and test SmartElektra Modbus TCP devices
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Modbus TCP gateway host
    #[arg(long, env = "SETOOL_HOST", conflicts_with = "config")]
    host: Option<String>,

    /// Modbus TCP port
    #[arg(long, default_value_t = 502)]
    port: u16,

    /// Response timeout in seconds
    #[arg(long, default_value_t = 5.0)]
    timeout: f64,

    /// YAML file listing endpoints
    #[arg(long, requires = "endpoint")]
    config: Option<std::path::PathBuf>,

    /// Endpoint name inside the config file
    #[arg(long)]
    endpoint: Option<String>,

    /// Hex-dump every Modbus frame
    #[arg(long)]
    packets: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read coils (FC01)
    ReadCoils {
        #[arg(long)]
        address: i64,
        #[arg(long, default_value_t = 1)]
        count: i64,
        #[arg(long)]
        slave: i64,
    },
    /// Write a single coil (FC05)
    WriteCoil {
        #[arg(long)]
        address: i64,
        #[arg(long, action = clap::ArgAction::Set)]
        value: bool,
        #[arg(long)]
        slave: i64,
    },
    /// Write a single holding register (FC06)
    WriteRegister {
        #[arg(long)]
        address: i64,
        #[arg(long)]
        value: i64,
        #[arg(long)]
        slave: i64,
    },
    /// Assign a new slave id; target 0 broadcasts and ignores failures
    AssignSlaveId {
        #[arg(long)]
        new_slave: i64,
        #[arg(long, default_value_t = 0)]
        target_slave: i64,
        #[arg(long)]
        register: Option<i64>,
    },
    /// Select the button mode (mono or bi)
    ButtonMode {
        mode: String,
        #[arg(long)]
        slave: i64,
    },
    /// Select the output level (low or high)
    OutputLevel {
        level: String,
        #[arg(long)]
        slave: i64,
    },
    /// Switch the test output, or read it back when no state is given
    TestOutput {
        #[arg(value_parser = ["on", "off"])]
        state: Option<String>,
        #[arg(long)]
        slave: i64,
    },
}

fn endpoint_config(args: &Args) -> Result<EndpointConfig> {
    if let Some(path) = &args.config {
        let config = ToolsConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?;
        let name = args.endpoint.as_deref().unwrap_or_default();
        return config
            .endpoint(name)
            .cloned()
            .with_context(|| format!("no endpoint named '{}' in {}", name, path.display()));
    }

    let Some(host) = &args.host else {
        bail!("either --host or --config/--endpoint is required");
    };
    let mut config = EndpointConfig::new("cli", host.as_str());
    config.port = args.port;
    config.timeout = args.timeout;
    Ok(config)
}

async fn run(args: Args, tools: &DeviceTools) -> Result<()> {
    let client = tools.client();
    match args.command {
        Command::ReadCoils {
            address,
            count,
            slave,
        } => {
            let request = ReadCoilsRequest::new(slave, address, count)?;
            let bits = services::read_coils(client, &request).await?;
            for (offset, bit) in bits.iter().enumerate() {
                println!("coil {:5}: {}", request.address() as usize + offset, *bit as u8);
            }
        }
        Command::WriteCoil {
            address,
            value,
            slave,
        } => {
            let request = WriteCoilRequest::new(slave, address, value)?;
            services::write_coil(client, &request).await?;
            println!("coil {} = {}", request.address(), value as u8);
        }
        Command::WriteRegister {
            address,
            value,
            slave,
        } => {
            let request = WriteRegisterRequest::new(slave, address, value)?;
            services::write_register(client, &request).await?;
            println!("register {} = {}", request.address(), request.value());
        }
        Command::AssignSlaveId {
            new_slave,
            target_slave,
            register,
        } => {
            let register = match register {
                Some(register) => register,
                None => tools.settings().await.hr_new_slave as i64,
            };
            let request = AssignSlaveId::new(new_slave, target_slave, register)?;
            match services::assign_slave_id(client, &request).await? {
                AssignOutcome::Confirmed => println!("slave id {} confirmed", new_slave),
                AssignOutcome::Unconfirmed => {
                    println!("slave id {} broadcast (unconfirmed)", new_slave)
                }
            }
        }
        Command::ButtonMode { mode, slave } => {
            let mode: ButtonMode = mode.parse()?;
            tools.set_number(NumberKey::TargetSlave, slave).await?;
            tools.select_button_mode(mode).await?;
            println!("button mode = {}", mode);
        }
        Command::OutputLevel { level, slave } => {
            let level: OutputLevel = level.parse()?;
            tools.set_number(NumberKey::TargetSlave, slave).await?;
            tools.select_output_level(level).await?;
            println!("output level = {}", level);
        }
        Command::TestOutput { state, slave } => {
            tools.set_number(NumberKey::TargetSlave, slave).await?;
            let on = match state.as_deref() {
                Some(state) => {
                    let on = state == "on";
                    tools.set_test_output(on).await?;
                    on
                }
                None => tools.refresh_test_output().await?,
            };
            println!("test output = {}", if on { "on" } else { "off" });
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = endpoint_config(&args)?;
    let mut hub = DeviceHub::new();
    let tools: Arc<DeviceTools> = hub.add(&config)?;
    if args.packets {
        tools.client().set_packet_logging(true).await;
    }

    let result = run(args, &tools).await;
    hub.shutdown_all().await;
    result
}
