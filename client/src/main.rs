use clap::Parser;
use client::config::ClientConfig;
use client::input::{InputManager, LocalCar};
use client::interpolation::Smoothing;
use client::leaderboard::leaderboard;
use client::mirror::ClientMirror;
use client::network::{ConnectionStatus, NetworkEvent, NetworkHandle, StateSync};
use client::rendering::Renderer;
use log::{error, info};
use macroquad::prelude::*;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:25565")]
    server: String,

    /// Name shown to other players
    #[arg(short = 'u', long, default_value = shared::DEFAULT_USERNAME)]
    username: String,

    /// Car texture, also picks the car colour
    #[arg(short = 't', long, default_value = shared::DEFAULT_TEXTURE)]
    texture: String,

    /// Seconds to wait for the server before giving up
    #[arg(long, default_value = "10")]
    connect_timeout: u64,

    /// Smooth remote cars per frame instead of per second
    #[arg(long)]
    per_tick: bool,

    /// Window width
    #[arg(short = 'w', long, default_value = "1024")]
    width: usize,

    /// Window height (no short flag to avoid conflict with --help)
    #[arg(long, default_value = "768")]
    height: usize,
}

impl Args {
    fn into_config(self) -> ClientConfig {
        let smoothing = if self.per_tick {
            Smoothing::default()
        } else {
            Smoothing::time_scaled()
        };

        ClientConfig {
            server_addr: self.server,
            username: self.username,
            texture: self.texture,
            connect_timeout: Duration::from_secs(self.connect_timeout),
            smoothing,
            width: self.width,
            height: self.height,
            ..ClientConfig::default()
        }
    }
}

fn window_conf() -> Conf {
    let args = Args::parse();
    Conf {
        window_title: "Rally Sync".to_owned(),
        window_width: args.width as i32,
        window_height: args.height as i32,
        ..Default::default()
    }
}

fn start_session(config: &ClientConfig) -> (Option<NetworkHandle>, ConnectionStatus) {
    match NetworkHandle::connect(config) {
        Ok(handle) => (Some(handle), ConnectionStatus::Connecting),
        Err(e) => {
            error!("Failed to start network thread: {}", e);
            (None, ConnectionStatus::Failed(e.to_string()))
        }
    }
}

#[macroquad::main(window_conf)]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config();
    info!("Starting client...");
    info!("Controls: WASD/arrows to drive, R to reconnect, Esc to quit");

    let mut input = InputManager::new();
    let mut car = LocalCar::new(&config);
    let mut mirror = ClientMirror::new();
    let mut renderer = Renderer::new(config.width, config.height);
    let mut sync = StateSync::new(&config);
    let (mut network, mut status) = start_session(&config);

    loop {
        let dt = get_frame_time();
        let (drive, controls) = input.update();

        if controls.quit {
            break;
        }

        if controls.reconnect && !status.is_connected() && status != ConnectionStatus::Connecting {
            info!("Reconnecting to {}", config.server_addr);
            mirror.clear(&mut renderer);
            sync.reset();
            // The new slot starts at the spawn pose, so does the car
            car.respawn();
            (network, status) = start_session(&config);
        }

        if let Some(handle) = network.as_mut() {
            for event in handle.poll() {
                match event {
                    NetworkEvent::Status(new_status) => {
                        if let ConnectionStatus::Connected(client_id) = new_status {
                            car.set_id(client_id);
                        } else if new_status != ConnectionStatus::Connecting {
                            mirror.clear(&mut renderer);
                        }
                        status = new_status;
                    }
                    NetworkEvent::Packet(packet) => mirror.apply(packet, &mut renderer),
                }
            }
        }

        car.step(drive, dt);

        if status.is_connected() {
            if let Some(handle) = network.as_ref() {
                for packet in sync.changes(&car.record, Instant::now()) {
                    if let Err(e) = handle.send(packet) {
                        error!("Error sending update: {}", e);
                        break;
                    }
                }
            }
        }

        mirror.interpolate(&config.smoothing, dt, &mut renderer);

        let rows = leaderboard(
            mirror.remote_entries().map(|(_, entry)| &entry.target),
            Some(&car.record),
        );
        renderer.render(&car, &rows, &status);

        next_frame().await;
    }

    if let Some(handle) = network.take() {
        handle.disconnect();
    }
}
