//! Headless bot that joins a server, drives its car around at random and
//! prints the events it observes. Handy for watching a real client react to
//! another participant.

use clap::Parser;
use rand::Rng;
use shared::{read_packet, round_highscore, write_packet, Packet, Vec3, SPAWN_POSITION};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{interval, timeout};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:25565")]
    server: String,

    /// Seconds to drive before disconnecting
    #[arg(short = 'd', long, default_value = "10")]
    duration: u64,

    /// Username shown to other players
    #[arg(short = 'u', long, default_value = "Bot")]
    username: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    println!("Connecting to {}", args.server);
    let stream = timeout(Duration::from_secs(10), TcpStream::connect(&args.server)).await??;
    let (mut reader, mut writer) = stream.into_split();

    let client_id = match read_packet(&mut reader).await? {
        Packet::AssignId { client_id } => client_id,
        Packet::Disconnected { reason } => {
            println!("Server refused connection: {}", reason);
            return Ok(());
        }
        other => return Err(format!("expected AssignId, got {:?}", other).into()),
    };
    println!("Connected with client ID {}", client_id);

    // Print every store event in the background
    let events = tokio::spawn(async move {
        let mut count = 0u64;
        loop {
            match read_packet(&mut reader).await {
                Ok(Packet::Created { key, record }) => {
                    println!("+ {} {} at {}", key, record.username, record.position)
                }
                Ok(Packet::Updated { key, record }) => {
                    count += 1;
                    if count % 20 == 0 {
                        println!("~ {} at {} ({} updates so far)", key, record.position, count);
                    }
                }
                Ok(Packet::Removed { key }) => println!("- {}", key),
                Ok(Packet::Disconnected { reason }) => {
                    println!("Disconnected by server: {}", reason);
                    break;
                }
                Ok(other) => println!("Unexpected packet: {:?}", other),
                Err(e) => {
                    println!("Stream ended: {}", e);
                    break;
                }
            }
        }
    });

    write_packet(&mut writer, &Packet::SetUsername(args.username.clone())).await?;

    let mut rng = rand::thread_rng();
    let mut position = SPAWN_POSITION;
    let mut heading: f32 = 0.0;
    let mut score = 0.0f64;
    let mut ticker = interval(Duration::from_millis(100));
    let ticks = args.duration * 10;

    for tick in 0..ticks {
        ticker.tick().await;

        heading += rng.gen_range(-0.3..0.3);
        position += Vec3::new(heading.sin(), 0.0, heading.cos()) * 2.0;
        write_packet(&mut writer, &Packet::SetPosition(position)).await?;
        write_packet(
            &mut writer,
            &Packet::SetRotation(Vec3::new(0.0, heading.to_degrees(), 0.0)),
        )
        .await?;

        if tick % 10 == 9 {
            score += rng.gen_range(0.0..5.0);
            let score = round_highscore(score);
            write_packet(&mut writer, &Packet::SetHighscore(format!("{:.2}", score))).await?;
        }
    }

    println!("Sending disconnect");
    write_packet(&mut writer, &Packet::Disconnect).await?;
    let _ = timeout(Duration::from_secs(2), events).await;

    println!("Test client finished");
    Ok(())
}
