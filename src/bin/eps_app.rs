use clap::{App, Arg};
use eps_app::bus::{BusSender, ChannelBus};
use eps_app::config::AppConfig;
use eps_app::device::{SerialGateway, SimulatedEps};
use eps_app::events::EventLog;
use eps_app::executive::{ProcessExecutive, RunStatus};
use eps_app::protocol::{LineCodec, OutboundPacket};
use eps_app::EpsApp;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};

const TELEMETRY_BROADCAST_BUFFER_SIZE: usize = 256;
// Bounded pend so a shutdown request is noticed even with an idle pipe
const DEFAULT_RECEIVE_POLL_MS: u64 = 250;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let version = AppConfig::version_string();
    let matches = App::new("eps-app")
        .version(version.as_str())
        .author("Space Systems Engineering Team")
        .about("EPS interface application hosted against a simulated power board")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("listen")
                .short("l")
                .long("listen")
                .value_name("ADDR")
                .help("Address the software bus bridge listens on")
                .takes_value(true),
        )
        .get_matches();

    let mut config = match matches.value_of("config") {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if let Some(addr) = matches.value_of("listen") {
        config.listen_addr = addr.to_string();
    }
    let poll_ms = *config.receive_timeout_ms.get_or_insert(DEFAULT_RECEIVE_POLL_MS);

    println!("🔋 EPS Interface Application v{}", version);
    println!("==================================");

    let (telemetry_tx, _) = broadcast::channel(TELEMETRY_BROADCAST_BUFFER_SIZE);
    let (bus, sender) = ChannelBus::new(
        config.pipe_depth,
        Some(Duration::from_millis(poll_ms)),
        telemetry_tx.clone(),
    );
    let gateway = SerialGateway::new(SimulatedEps::new(), config.device.clone());
    let listen_addr = config.listen_addr.clone();

    let mut app = EpsApp::new(config, gateway, bus, EventLog::new());
    app.init()?;

    let mut executive = ProcessExecutive::new();
    let shutdown = executive.shutdown_handle();
    let mut app_task = tokio::task::spawn_blocking(move || app.run(&mut executive));

    let tcp_server = tokio::spawn(async move {
        if let Err(e) = start_tcp_server(&listen_addr, sender, telemetry_tx).await {
            error!("TCP server error: {}", e);
        }
    });

    let status = tokio::select! {
        result = &mut app_task => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            shutdown.store(true, Ordering::SeqCst);
            app_task.await?
        }
    };

    tcp_server.abort();
    println!("🛑 EPS application stopped ({:?})", status);

    if status == RunStatus::Error {
        std::process::exit(1);
    }
    Ok(())
}

async fn start_tcp_server(
    addr: &str,
    sender: BusSender,
    telemetry_tx: broadcast::Sender<OutboundPacket>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    info!("🌐 software bus bridge listening on {}", addr);

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                info!("🔗 ground client connected: {}", peer);
                let client_sender = sender.clone();
                let client_telemetry_rx = telemetry_tx.subscribe();

                tokio::spawn(async move {
                    if let Err(e) =
                        handle_client(stream, client_sender, client_telemetry_rx).await
                    {
                        warn!("client {} error: {}", peer, e);
                    }
                    info!("🔌 client {} disconnected", peer);
                });
            }
            Err(e) => {
                error!("failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    sender: BusSender,
    mut telemetry_rx: broadcast::Receiver<OutboundPacket>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (reader, writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let writer = Arc::new(Mutex::new(writer));

    let telemetry_writer = Arc::clone(&writer);
    let telemetry_task = tokio::spawn(async move {
        let mut codec = LineCodec::new();
        loop {
            let packet = match telemetry_rx.recv().await {
                Ok(packet) => packet,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("telemetry stream lagged, {} packets skipped", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let line = match codec.serialize_packet(&packet) {
                Ok(line) => line,
                Err(e) => {
                    warn!("failed to serialize telemetry: {}", e);
                    continue;
                }
            };
            let mut writer_guard = telemetry_writer.lock().await;
            if let Err(e) = writer_guard.write_all(line.as_bytes()).await {
                warn!("failed to send telemetry: {}", e);
                break;
            }
            if let Err(e) = writer_guard.write_all(b"\n").await {
                warn!("failed to send telemetry newline: {}", e);
                break;
            }
        }
    });

    let mut codec = LineCodec::new();
    let mut line = String::new();
    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let reply = match codec.parse_message(trimmed) {
                    Ok(message) => {
                        info!(
                            msg_id = message.msg_id,
                            command_code = message.command_code,
                            "📨 message received"
                        );
                        match sender.send(message) {
                            Ok(()) => None,
                            Err(e) => Some(serde_json::json!({
                                "status": "Rejected",
                                "message": e.to_string(),
                            })),
                        }
                    }
                    Err(e) => Some(serde_json::json!({
                        "status": "ParseError",
                        "message": e.to_string(),
                    })),
                };

                if let Some(reply) = reply {
                    warn!("message not delivered: {}", reply);
                    let mut writer_guard = writer.lock().await;
                    writer_guard.write_all(reply.to_string().as_bytes()).await?;
                    writer_guard.write_all(b"\n").await?;
                }
            }
            Err(e) => {
                error!("error reading from client: {}", e);
                break;
            }
        }
    }

    telemetry_task.abort();
    Ok(())
}
