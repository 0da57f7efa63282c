use std::sync::Arc;

use clap::Parser;
use log::{error, info};

use sampnet::{Listener, NullHandler, ServerConfig};

#[derive(Parser, Debug)]
#[clap(author, version, about = "SA-MP 0.3.7 RakNet server")]
struct Args {
    /// Address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// UDP port to listen on
    #[clap(short, long, default_value = "7777")]
    port: u16,

    /// Player slot limit
    #[clap(short, long, default_value = "100")]
    max_players: u32,

    /// Hostname shown in the server browser
    #[clap(long, default_value = "SA-MP Server")]
    server_name: String,

    /// Game mode text
    #[clap(long, default_value = "Freeroam")]
    game_mode: String,

    #[clap(long, default_value = "English")]
    language: String,

    /// Weather id
    #[clap(long, default_value = "10")]
    weather: u8,

    /// Hour of day (0-23)
    #[clap(long, default_value = "12")]
    world_time: u8,

    #[clap(long, default_value = "San Andreas")]
    map_name: String,

    #[clap(long, default_value = "www.sa-mp.com")]
    web_url: String,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            max_players: args.max_players,
            server_name: args.server_name,
            game_mode: args.game_mode,
            language: args.language,
            weather: args.weather,
            world_time: args.world_time,
            map_name: args.map_name,
            web_url: args.web_url,
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    if std::env::var("RUST_LOG").is_err() {
        eprintln!("note: set RUST_LOG=info to see server logs");
    }

    let config: ServerConfig = Args::parse().into();

    let listener = match Listener::bind(config, Arc::new(NullHandler)).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("{}", err);
            std::process::exit(1);
        }
    };
    listener.start().await;

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutting down"),
        Err(err) => error!("failed to wait for ctrl-c: {}", err),
    }
    listener.stop().await;
}
