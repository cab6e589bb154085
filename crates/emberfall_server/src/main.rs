//! Emberfall RTS - Dedicated Relay Server

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use emberfall_core::game::{PlayerNumber, TICK_DURATION_MS};
use emberfall_server::host::Host;
use emberfall_server::lobby::Lobby;
use emberfall_server::protocol::{
    decode, encode, ClientMessage, PlayerInfo, ServerMessage, MAX_FRAME_SIZE, PROTOCOL_VERSION,
};
use emberfall_server::ServerConfig;

const CONFIG_PATH: &str = "server.ron";

/// Everything the connection tasks share.
struct Relay {
    lobby: Lobby,
    host: Host,
    peers: HashMap<PlayerNumber, mpsc::UnboundedSender<Vec<u8>>>,
}

impl Relay {
    fn broadcast(&self, message: &ServerMessage) {
        let Ok(frame) = encode(message) else {
            tracing::error!("failed to encode broadcast");
            return;
        };
        for sender in self.peers.values() {
            // A closed channel means the peer task is shutting down; its
            // disconnect path cleans up the slot.
            let _ = sender.send(frame.clone());
        }
    }
}

type Shared = Arc<Mutex<Relay>>;

fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!("Starting Emberfall RTS Relay Server");

    let config = if Path::new(CONFIG_PATH).exists() {
        match ServerConfig::load(CONFIG_PATH) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("could not load {CONFIG_PATH}: {e}");
                return;
            }
        }
    } else {
        ServerConfig::default()
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("failed to start runtime: {e}");
            return;
        }
    };

    if let Err(e) = runtime.block_on(run(config)) {
        tracing::error!("server terminated: {e}");
    }
}

async fn run(config: ServerConfig) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!("Listening on port {}", config.port);

    let relay: Shared = Arc::new(Mutex::new(Relay {
        lobby: Lobby::new(config.max_players),
        host: Host::new(config.command_latency_ticks),
        peers: HashMap::new(),
    }));

    // Tick driver: the host clock advances in real time so acked commands
    // get monotonically growing due ticks.
    {
        let relay = Arc::clone(&relay);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(u64::from(TICK_DURATION_MS)));
            loop {
                interval.tick().await;
                let mut state = lock(&relay);
                let tick = state.host.advance_tick();
                // Checksums this far back can no longer mismatch anything.
                if tick > 200 {
                    state.host.prune_checksums(tick - 200);
                }
            }
        });
    }

    loop {
        let (stream, addr) = listener.accept().await?;
        tracing::debug!(%addr, "incoming connection");
        let relay = Arc::clone(&relay);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, relay).await {
                tracing::debug!("connection closed: {e}");
            }
        });
    }
}

fn lock(relay: &Shared) -> std::sync::MutexGuard<'_, Relay> {
    relay.lock().expect("relay state mutex poisoned")
}

async fn handle_connection(stream: TcpStream, relay: Shared) -> std::io::Result<()> {
    let (mut reader, writer) = stream.into_split();

    // Handshake: the first frame must be a join.
    let first = read_frame_async(&mut reader).await?;
    let number = match decode::<ClientMessage>(&first)? {
        ClientMessage::Join {
            protocol_version,
            name,
        } => {
            if protocol_version != PROTOCOL_VERSION {
                reject(
                    writer,
                    format!("protocol version mismatch: server speaks {PROTOCOL_VERSION}"),
                )
                .await;
                return Ok(());
            }
            let joined = lock(&relay).lobby.join(name.clone());
            match joined {
                Ok(number) => {
                    spawn_writer_and_welcome(&relay, writer, number, &name);
                    number
                }
                Err(e) => {
                    reject(writer, e.to_string()).await;
                    return Ok(());
                }
            }
        }
        _ => {
            reject(writer, "expected join handshake".to_owned()).await;
            return Ok(());
        }
    };

    let result = peer_loop(&mut reader, &relay, number).await;

    // Disconnect cleanup, graceful or not.
    {
        let mut state = lock(&relay);
        state.peers.remove(&number);
        if let Some(info) = state.lobby.leave(number) {
            state.broadcast(&ServerMessage::PlayerLeft {
                number,
                name: info.name,
            });
        }
    }

    result
}

fn spawn_writer_and_welcome(
    relay: &Shared,
    writer: OwnedWriteHalf,
    number: PlayerNumber,
    name: &str,
) {
    let (tx, rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let mut state = lock(relay);
    state.peers.insert(number, tx.clone());
    state.broadcast(&ServerMessage::PlayerJoined {
        player: PlayerInfo {
            number,
            name: name.to_owned(),
        },
    });
    let welcome = ServerMessage::Welcome {
        number,
        players: state.lobby.players(),
    };
    if let Ok(frame) = encode(&welcome) {
        let _ = tx.send(frame);
    }
    drop(state);

    tokio::spawn(writer_loop(writer, rx));
}

async fn writer_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(frame) = rx.recv().await {
        if write_frame_async(&mut writer, &frame).await.is_err() {
            break;
        }
    }
}

async fn peer_loop(
    reader: &mut OwnedReadHalf,
    relay: &Shared,
    number: PlayerNumber,
) -> std::io::Result<()> {
    loop {
        let frame = read_frame_async(reader).await?;
        match decode::<ClientMessage>(&frame)? {
            ClientMessage::Command { payload } => {
                let mut state = lock(relay);
                match state.host.ack_command(&payload) {
                    Ok(acked) => {
                        state.broadcast(&ServerMessage::Turn {
                            due: acked.duetime,
                            commands: vec![acked.frame],
                        });
                    }
                    Err(e) => {
                        tracing::warn!(player = number, "dropping undecodable command: {e}");
                    }
                }
            }
            ClientMessage::Checksum { tick, hash } => {
                let mut state = lock(relay);
                if let Some(desync_tick) = state.host.record_checksum(number, tick, hash) {
                    state.broadcast(&ServerMessage::DesyncDetected { tick: desync_tick });
                }
            }
            ClientMessage::Goodbye => return Ok(()),
            ClientMessage::Join { .. } => {
                tracing::warn!(player = number, "duplicate join ignored");
            }
        }
    }
}

async fn reject(mut writer: OwnedWriteHalf, reason: String) {
    if let Ok(frame) = encode(&ServerMessage::Rejected { reason }) {
        let _ = write_frame_async(&mut writer, &frame).await;
    }
}

async fn read_frame_async(reader: &mut OwnedReadHalf) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame too large: {len} bytes"),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

async fn write_frame_async(writer: &mut OwnedWriteHalf, frame: &[u8]) -> std::io::Result<()> {
    #[allow(clippy::cast_possible_truncation)]
    let len_bytes = (frame.len() as u32).to_be_bytes();
    writer.write_all(&len_bytes).await?;
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}
