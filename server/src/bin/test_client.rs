use clap::Parser;
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use shared::{decode_message, encode_message, ClientMessage, Direction, PlayerInput, ServerMessage};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{interval, sleep, Instant};

/// Scripted participant: joins, readies up and drives randomly
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address to connect to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port
    #[clap(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,
    /// Username to join with
    #[clap(short, long, default_value = "bot")]
    username: String,
    /// Seconds to stay connected
    #[clap(short, long, default_value_t = 60)]
    duration: u64,
}

fn random_input<R: Rng>(rng: &mut R) -> PlayerInput {
    PlayerInput {
        movement: if rng.gen_bool(0.7) {
            Direction::ALL.choose(rng).copied()
        } else {
            None
        },
        shoot: rng.gen_bool(0.3),
        stop: rng.gen_bool(0.05),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let address = format!("{}:{}", args.host, args.port);
    info!("Connecting to {}", address);
    let stream = TcpStream::connect(&address).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let join = ClientMessage::JoinGame {
        username: Some(args.username.clone()),
    };
    write_half.write_all(encode_message(&join)?.as_bytes()).await?;

    let mut rng = rand::thread_rng();
    let mut inputs = interval(Duration::from_millis(100));
    let deadline = sleep(Duration::from_secs(args.duration));
    tokio::pin!(deadline);
    let started = Instant::now();
    let mut playing = false;
    let mut snapshots = 0u64;

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = inputs.tick(), if playing => {
                let message = ClientMessage::PlayerInput { inputs: random_input(&mut rng) };
                write_half.write_all(encode_message(&message)?.as_bytes()).await?;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    warn!("Server closed the connection");
                    break;
                };
                let message: ServerMessage = match decode_message(&line) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("Unreadable message from server: {}", e);
                        continue;
                    }
                };

                let reply = match message {
                    ServerMessage::JoinAccepted { player_id, username } => {
                        info!("Joined as {} in slot {}", username, player_id);
                        Some(ClientMessage::Ready { ready: true })
                    }
                    ServerMessage::JoinRejected { reason } | ServerMessage::ConnectionRejected { reason } => {
                        warn!("Rejected: {}", reason);
                        break;
                    }
                    ServerMessage::GameStart { level } => {
                        info!("Game started on level {}", level);
                        playing = true;
                        None
                    }
                    ServerMessage::GameState { state } => {
                        snapshots += 1;
                        if snapshots % 30 == 0 {
                            debug!(
                                "Tick {}: {} objects, {} lives",
                                state.tick,
                                state.objects.len(),
                                state.player_lives
                            );
                        }
                        None
                    }
                    ServerMessage::GameOver { reason } => {
                        info!("Game over: {}", reason);
                        playing = false;
                        None
                    }
                    ServerMessage::Victory { message } => {
                        info!("Victory: {}", message);
                        playing = false;
                        None
                    }
                    ServerMessage::ReturnToLobby => Some(ClientMessage::Ready { ready: true }),
                    ServerMessage::Ping => Some(ClientMessage::Pong),
                    other => {
                        debug!("{:?}", other);
                        None
                    }
                };

                if let Some(reply) = reply {
                    write_half.write_all(encode_message(&reply)?.as_bytes()).await?;
                }
            }
        }
    }

    info!(
        "Test client finished after {:.1}s, {} snapshots received",
        started.elapsed().as_secs_f32(),
        snapshots
    );
    Ok(())
}
