use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::Arc;

use clap::{
    builder::{PossibleValuesParser, TypedValueParser},
    Parser,
};
use log::info;
use simple_logger::SimpleLogger;

use slimcore::{MediaRenderer, Player, PlayerConfig, TrackInfo, TrackMetadata};

#[derive(Parser)]
#[command(version)]
struct Cli {
    #[arg(short, name = "SERVER", help = "Connect to the specified server, otherwise use autodiscovery")]
    server: Option<String>,

    #[arg(short, default_value = "slimcore-demo", help = "Set the player name")]
    name: String,

    #[arg(long,
        default_value = "off",
        value_parser = PossibleValuesParser::new(["trace", "debug", "error", "warn", "info", "off"])
            .map(|s| s.parse::<log::LevelFilter>().unwrap()),
        help = "Set the highest log level")]
    loglevel: log::LevelFilter,
}

/// A `MediaRenderer` that only logs what it's told; there is no audio
/// output behind it. Useful for exercising the protocol core against a
/// real server without an audio stack.
struct NullRenderer;

impl MediaRenderer for NullRenderer {
    fn on_off(&self, on: bool) {
        info!("on_off({on})");
    }
    fn volume(&self, gain: u16) {
        info!("volume({gain})");
    }
    fn play(&self) {
        info!("play");
    }
    fn pause(&self) {
        info!("pause");
    }
    fn unpause(&self, at_jiffies: u32) {
        info!("unpause({at_jiffies})");
    }
    fn stop(&self) {
        info!("stop");
    }
    fn set_name(&self, name: &str) {
        info!("set_name({name})");
    }
    fn set_server(&self, ip: Ipv4Addr) {
        info!("set_server({ip})");
    }
    fn set_track(&self, track: &TrackInfo) -> bool {
        info!("set_track({} {})", track.mimetype, track.uri);
        true
    }
    fn metadata(&self, offset: i64) -> TrackMetadata {
        info!("metadata({offset})");
        TrackMetadata::default()
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    SimpleLogger::new()
        .with_colors(true)
        .with_level(cli.loglevel)
        .init()?;

    let fixed_server = cli
        .server
        .map(|s| Ipv4Addr::from_str(&s))
        .transpose()?;

    let config = PlayerConfig {
        name: cli.name,
        fixed_server,
        ..Default::default()
    };

    info!("starting slimcore-demo, fixed_server={fixed_server:?}");
    // held for the life of the process; Player::spawn's thread does the work.
    let _player = Player::spawn(config, Arc::new(NullRenderer));

    loop {
        std::thread::sleep(std::time::Duration::from_secs(3600));
    }
}
