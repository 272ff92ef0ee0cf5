use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use eps_app::config::{AppConfig, MessageIds};
use eps_app::device::sim::STATUS_SWITCH_SHIFT;
use eps_app::device::{SWITCH_COUNT, SWITCH_OFF, SWITCH_ON};
use eps_app::protocol::{
    DeviceDataRecord, GroundCode, HousekeepingRecord, LineCodec, Message, OutboundPacket,
    TelemetryCode,
};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "8090";
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("epsctl")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("🔋 Ground control for the EPS interface application")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("host")
                .short("H")
                .long("host")
                .value_name("HOST")
                .help("Application host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Application bus bridge port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table"])
                .default_value("table")
                .global(true),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Application config file, for non-default message ids")
                .takes_value(true)
                .global(true),
        )
        .subcommand(SubCommand::with_name("noop").about("📡 Send a no-op command"))
        .subcommand(SubCommand::with_name("reset").about("🔄 Reset application counters"))
        .subcommand(SubCommand::with_name("enable").about("🔌 Open the power board connection"))
        .subcommand(
            SubCommand::with_name("disable").about("⏏️  Close the power board connection"),
        )
        .subcommand(
            SubCommand::with_name("config")
                .about("⚙️  Write a configuration word to the power board")
                .arg(
                    Arg::with_name("word")
                        .help("Configuration word (decimal or 0x-prefixed hex)")
                        .required(true)
                        .validator(|v| {
                            parse_u32(&v)
                                .map(|_| ())
                                .ok_or_else(|| "Invalid configuration word".into())
                        }),
                ),
        )
        .subcommand(
            SubCommand::with_name("switch")
                .about("🔀 Turn a load switch on or off")
                .arg(
                    Arg::with_name("number")
                        .help("Switch number (0-7)")
                        .required(true)
                        .validator(|v| {
                            parse_switch_number(&v)
                                .map(|_| ())
                                .ok_or_else(|| "Switch number must be 0-7".into())
                        }),
                )
                .arg(
                    Arg::with_name("state")
                        .help("Requested state")
                        .required(true)
                        .possible_values(&["on", "off"]),
                ),
        )
        .subcommand(SubCommand::with_name("hk").about("📊 Request housekeeping telemetry"))
        .subcommand(SubCommand::with_name("data").about("📈 Request device data telemetry"))
        .subcommand(SubCommand::with_name("monitor").about("🛰️  Stream all telemetry"))
        .subcommand(
            SubCommand::with_name("raw")
                .about("🛠️  Send an arbitrary bus message")
                .arg(
                    Arg::with_name("mid")
                        .help("Message identifier")
                        .required(true)
                        .validator(|v| {
                            parse_u16(&v).map(|_| ()).ok_or_else(|| "Invalid message id".into())
                        }),
                )
                .arg(
                    Arg::with_name("cc")
                        .help("Command code")
                        .required(true)
                        .validator(|v| {
                            parse_u16(&v).map(|_| ()).ok_or_else(|| "Invalid command code".into())
                        }),
                )
                .arg(
                    Arg::with_name("payload")
                        .help("Payload bytes as hex, e.g. 00000003")
                        .required(false),
                ),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?;
    let format = matches.value_of("format").unwrap_or("table");
    let ids = match matches.value_of("config") {
        Some(path) => AppConfig::load(path)?.message_ids,
        None => MessageIds::default(),
    };

    let mut client = GroundClient::connect(host, port).await?;

    match matches.subcommand() {
        ("noop", Some(_)) => send_ground(&mut client, ids.cmd, GroundCode::Noop, "NOOP").await,
        ("reset", Some(_)) => {
            send_ground(&mut client, ids.cmd, GroundCode::ResetCounters, "Reset counters").await
        }
        ("enable", Some(_)) => {
            send_ground(&mut client, ids.cmd, GroundCode::Enable, "Enable").await
        }
        ("disable", Some(_)) => {
            send_ground(&mut client, ids.cmd, GroundCode::Disable, "Disable").await
        }
        ("config", Some(sub)) => handle_config(&mut client, sub, ids).await,
        ("switch", Some(sub)) => handle_switch(&mut client, sub, ids).await,
        ("hk", Some(_)) => {
            let request = Message::new(ids.req_hk, TelemetryCode::Housekeeping.code());
            let packet = client.request(&request, ids.hk_tlm).await?;
            print_packet(&packet, format);
            Ok(())
        }
        ("data", Some(_)) => {
            let request = Message::new(ids.req_hk, TelemetryCode::DeviceData.code());
            let packet = client.request(&request, ids.device_tlm).await?;
            print_packet(&packet, format);
            Ok(())
        }
        ("monitor", Some(_)) => {
            println!("{}", "🛰️  Streaming telemetry (Ctrl-C to stop)".bright_blue().bold());
            loop {
                let packet = client.next_packet().await?;
                print_packet(&packet, format);
            }
        }
        ("raw", Some(sub)) => handle_raw(&mut client, sub).await,
        _ => Ok(()),
    }
}

async fn send_ground(
    client: &mut GroundClient,
    msg_id: u16,
    code: GroundCode,
    label: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    client.send(&Message::new(msg_id, code.code())).await?;
    println!("{} {} command sent", "✅".green(), label.bright_white());
    println!("{} Check the outcome with: {}", "💡".yellow(), "epsctl hk".bright_cyan());
    Ok(())
}

async fn handle_config(
    client: &mut GroundClient,
    matches: &ArgMatches<'_>,
    ids: MessageIds,
) -> Result<(), Box<dyn std::error::Error>> {
    let word = matches
        .value_of("word")
        .and_then(parse_u32)
        .ok_or("Invalid configuration word")?;
    let message =
        Message::with_payload(ids.cmd, GroundCode::Configure.code(), word.to_be_bytes());
    client.send(&message).await?;
    println!(
        "{} Configuration {} sent",
        "✅".green(),
        format!("0x{:08X}", word).bright_cyan()
    );
    Ok(())
}

async fn handle_switch(
    client: &mut GroundClient,
    matches: &ArgMatches<'_>,
    ids: MessageIds,
) -> Result<(), Box<dyn std::error::Error>> {
    let switch = matches
        .value_of("number")
        .and_then(parse_switch_number)
        .ok_or("Invalid switch number")?;
    let (state, label) = match matches.value_of("state") {
        Some("on") => (SWITCH_ON, "ON".bright_green()),
        _ => (SWITCH_OFF, "OFF".bright_red()),
    };
    let message = Message::with_payload(ids.cmd, GroundCode::Switch.code(), [switch, state]);
    client.send(&message).await?;
    println!("{} Switch {} {} command sent", "✅".green(), switch, label);
    Ok(())
}

async fn handle_raw(
    client: &mut GroundClient,
    matches: &ArgMatches<'_>,
) -> Result<(), Box<dyn std::error::Error>> {
    let msg_id = matches.value_of("mid").and_then(parse_u16).ok_or("Invalid message id")?;
    let code = matches.value_of("cc").and_then(parse_u16).ok_or("Invalid command code")?;
    let payload = match matches.value_of("payload") {
        Some(hex) => parse_hex(hex).ok_or("Payload must be an even number of hex digits")?,
        None => Vec::new(),
    };
    client.send(&Message::with_payload(msg_id, code, payload)).await?;
    println!(
        "{} Raw message MID {} CC {} sent",
        "✅".green(),
        format!("0x{:04X}", msg_id).bright_cyan(),
        code.to_string().bright_cyan()
    );
    Ok(())
}

/// Line-oriented connection to the application's bus bridge.
struct GroundClient {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
    codec: LineCodec,
    line: String,
}

impl GroundClient {
    async fn connect(host: &str, port: u16) -> Result<Self, Box<dyn std::error::Error>> {
        let addr = format!("{}:{}", host, port);
        let stream = match TcpStream::connect(&addr).await {
            Ok(stream) => stream,
            Err(e) => {
                eprintln!(
                    "{} Failed to connect to EPS application at {}",
                    "❌".red(),
                    addr.bright_white()
                );
                if e.kind() == std::io::ErrorKind::ConnectionRefused {
                    eprintln!("{} Application is not running. Start it with:", "💡".yellow());
                    eprintln!("   {}", "cargo run --bin eps-app".bright_cyan());
                } else {
                    eprintln!("{} Network error: {}", "🔌".yellow(), e.to_string().bright_red());
                }
                return Err(e.into());
            }
        };
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
            codec: LineCodec::new(),
            line: String::new(),
        })
    }

    async fn send(&mut self, message: &Message) -> Result<(), Box<dyn std::error::Error>> {
        let json = self.codec.serialize_message(message)?.to_string();
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        Ok(())
    }

    async fn next_packet(&mut self) -> Result<OutboundPacket, Box<dyn std::error::Error>> {
        loop {
            self.line.clear();
            let n = self.reader.read_line(&mut self.line).await?;
            if n == 0 {
                return Err("Application closed the connection".into());
            }
            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match self.codec.parse_packet(trimmed) {
                Ok(packet) => return Ok(packet),
                // Delivery rejections share the stream with telemetry
                Err(_) => return Err(format!("Application replied: {}", trimmed).into()),
            }
        }
    }

    /// Sends a telemetry request and waits for the first packet carrying
    /// `expect_mid`.
    async fn request(
        &mut self,
        message: &Message,
        expect_mid: u16,
    ) -> Result<OutboundPacket, Box<dyn std::error::Error>> {
        self.send(message).await?;
        let wait = async {
            loop {
                let packet = self.next_packet().await?;
                if packet.header.msg_id == expect_mid {
                    return Ok::<_, Box<dyn std::error::Error>>(packet);
                }
            }
        };
        match tokio::time::timeout(RESPONSE_TIMEOUT, wait).await {
            Ok(result) => result,
            Err(_) => {
                eprintln!(
                    "{} No telemetry after {} seconds",
                    "⏰".yellow(),
                    RESPONSE_TIMEOUT.as_secs()
                );
                eprintln!(
                    "{} Device data is only produced while the board is enabled",
                    "💡".yellow()
                );
                Err("Telemetry timeout".into())
            }
        }
    }
}

fn print_packet(packet: &OutboundPacket, format: &str) {
    if format == "json" {
        match serde_json::to_string(packet) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("{} {}", "❌".red(), e),
        }
        return;
    }

    println!(
        "{} MID {}  seq {}  t+{} ms",
        "📡".bright_blue(),
        format!("0x{:04X}", packet.header.msg_id).bright_white(),
        packet.header.sequence,
        packet.header.timestamp_ms
    );
    if let Some(hk) = packet.housekeeping() {
        print_housekeeping(hk);
    } else if let Some(data) = packet.device_data() {
        print_device_data(data);
    }
}

fn print_housekeeping(hk: &HousekeepingRecord) {
    println!("{}", "🔋 EPS Housekeeping".bright_blue().bold());
    println!("{}", "═══════════════════".bright_blue());
    let device = if hk.device_enabled.is_enabled() {
        "ENABLED".bright_green()
    } else {
        "DISABLED".bright_red()
    };
    println!("Device:          {}", device);
    println!(
        "Commands:        {} ok / {} err",
        hk.command_count.to_string().bright_green(),
        colorize_errors(hk.command_error_count)
    );
    println!(
        "Device ops:      {} ok / {} err",
        hk.device_count.to_string().bright_green(),
        colorize_errors(hk.device_error_count)
    );
    println!("Board counter:   {}", hk.device_hk.counter);
    println!("Board config:    0x{:08X}", hk.device_hk.config);
    println!("Board status:    0x{:08X}", hk.device_hk.status);
    let switches = (hk.device_hk.status >> STATUS_SWITCH_SHIFT) as u8;
    let outputs: String = (0..SWITCH_COUNT)
        .map(|n| if switches & (1 << n) != 0 { '●' } else { '○' })
        .collect();
    println!("Switches 0-7:    {}", outputs.bright_cyan());
}

fn print_device_data(data: &DeviceDataRecord) {
    println!("{}", "📈 EPS Device Data".bright_blue().bold());
    println!("{}", "══════════════════".bright_blue());
    println!("Board counter:   {}", data.counter);
    println!("Battery:         {} mV", data.x.to_string().bright_cyan());
    println!("Solar:           {} mV", data.y.to_string().bright_cyan());
    println!("Load:            {} mA", data.z.to_string().bright_cyan());
}

fn colorize_errors(count: u32) -> ColoredString {
    if count == 0 {
        count.to_string().bright_green()
    } else {
        count.to_string().bright_red()
    }
}

fn parse_u32(value: &str) -> Option<u32> {
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

fn parse_switch_number(value: &str) -> Option<u8> {
    value.parse::<u8>().ok().filter(|n| *n < SWITCH_COUNT)
}

fn parse_u16(value: &str) -> Option<u16> {
    parse_u32(value).and_then(|v| u16::try_from(v).ok())
}

fn parse_hex(value: &str) -> Option<Vec<u8>> {
    if value.len() % 2 != 0 {
        return None;
    }
    (0..value.len())
        .step_by(2)
        .map(|i| value.get(i..i + 2).and_then(|byte| u8::from_str_radix(byte, 16).ok()))
        .collect()
}
