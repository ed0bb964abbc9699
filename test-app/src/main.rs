// esb-bridge test application -- CLI tool for exercising the bridge
// against real hardware or a mock transport.
//
// Usage:
//   esb-bridge-test-app --port /dev/ttyACM0 version
//   esb-bridge-test-app --port /dev/ttyACM0 transfer --target 6F:6F:6F:6F:01 --payload 10
//   esb-bridge-test-app --port /dev/ttyACM0 send --target 6F:6F:6F:6F:01 --payload DEAD
//   esb-bridge-test-app --port /dev/ttyACM0 listen --address 6F:6F:6F:6F:01 --count 3
//   esb-bridge-test-app --mock version

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use esb_bridge::{CMD_WILDCARD, EsbAddress, EsbBridge, EsbBridgeBuilder, ListenFilter};
use esb_bridge_test_harness::MockTransport;
use esb_bridge_usb::frame::{encode_answer_frame, encode_frame};

/// esb-bridge test application -- exercises the bridge from the command line.
#[derive(Parser)]
#[command(name = "esb-bridge-test-app", version, about)]
struct Cli {
    /// Serial port path (e.g. /dev/ttyACM0, COM3).
    #[arg(long)]
    port: Option<String>,

    /// Use a mock transport instead of hardware (smoke testing only;
    /// supports the `version` command).
    #[arg(long)]
    mock: bool,

    /// Transaction timeout in milliseconds.
    #[arg(long, default_value_t = 500)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read the bridge firmware version.
    Version,

    /// Send an ESB message and print the answer.
    Transfer {
        /// Target pipeline address, e.g. 6F:6F:6F:6F:01.
        #[arg(long)]
        target: String,
        /// Payload as hex bytes, e.g. 10 or DEADBEEF.
        #[arg(long)]
        payload: String,
    },

    /// Send an ESB message without waiting for an answer.
    Send {
        /// Target pipeline address, e.g. 6F:6F:6F:6F:01.
        #[arg(long)]
        target: String,
        /// Payload as hex bytes.
        #[arg(long)]
        payload: String,
    },

    /// Print incoming ESB messages matching a filter.
    Listen {
        /// Source address filter; omit for any source.
        #[arg(long)]
        address: Option<String>,
        /// Command byte filter (hex); omit for any command.
        #[arg(long)]
        cmd: Option<String>,
        /// Number of messages to print before exiting (0 = forever).
        #[arg(long, default_value_t = 0)]
        count: u32,
    },
}

fn parse_address(s: &str) -> Result<EsbAddress> {
    let bytes = parse_hex(&s.replace(':', ""))?;
    let arr: [u8; 5] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("address must be exactly 5 bytes: {s}"))?;
    Ok(EsbAddress::new(arr))
}

fn parse_hex(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        bail!("hex string must have an even number of digits: {s}");
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).context("invalid hex digit"))
        .collect()
}

async fn connect(cli: &Cli) -> Result<EsbBridge> {
    let builder = EsbBridgeBuilder::new().transfer_timeout(Duration::from_millis(cli.timeout_ms));

    if cli.mock {
        // Script the version exchange so `version` works without hardware.
        let mut mock = MockTransport::new();
        let req = encode_frame(esb_bridge::CMD_VERSION, &[])?;
        let ans = encode_answer_frame(esb_bridge::CMD_VERSION, 0x00, &[0, 0, 0])?;
        mock.expect(&req, &[&ans]);
        return builder
            .build_with_transport(Box::new(mock))
            .await
            .context("failed to build bridge over mock transport");
    }

    let port = cli
        .port
        .as_deref()
        .context("--port is required unless --mock is given")?;
    builder
        .device(port)
        .build()
        .await
        .with_context(|| format!("failed to open bridge device {port}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let bridge = connect(&cli).await?;

    match &cli.command {
        Command::Version => {
            let version = bridge.firmware_version().await?;
            println!("firmware version: {version}");
        }

        Command::Transfer { target, payload } => {
            let target = parse_address(target)?;
            let payload = parse_hex(payload)?;
            let answer = bridge.transfer(target, &payload).await?;
            println!("answer: {answer:02X?}");
        }

        Command::Send { target, payload } => {
            let target = parse_address(target)?;
            let payload = parse_hex(payload)?;
            bridge.send(target, &payload).await?;
            println!("sent");
        }

        Command::Listen {
            address,
            cmd,
            count,
        } => {
            let address = match address {
                Some(a) => parse_address(a)?,
                None => EsbAddress::WILDCARD,
            };
            let cmd = match cmd {
                Some(c) => *parse_hex(c)?
                    .first()
                    .context("command filter must be one byte")?,
                None => CMD_WILDCARD,
            };

            let mut stream = bridge.listen(ListenFilter::new(address, cmd)).await?;
            let mut received = 0u32;
            while let Some(msg) = stream.recv().await {
                println!(
                    "{} cmd=0x{:02X} payload={:02X?}",
                    msg.source, msg.cmd, msg.payload
                );
                received += 1;
                if *count > 0 && received >= *count {
                    break;
                }
            }
        }
    }

    bridge.close();
    Ok(())
}
