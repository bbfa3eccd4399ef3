//! Voice Client Application
//!
//! Terminal front end: joins a room, relays microphone audio while unmuted
//! and turns typed lines into chat.
//!
//! Usage: `voice-client [NAME] [ROOM] [SERVER_ADDR]`
//!
//! Commands: `/mute`, `/volume N`, `/devices`, `/input NAME`,
//! `/output NAME`, `/quit`. `default` selects the host default device.

use anyhow::{Context, Result};
use std::io::{self, BufRead};
use std::sync::Arc;

use lan_voice_rooms::{
    audio::CpalBackend,
    config::AppConfig,
    error::AudioError,
    logging::init_logging,
    protocol::AudioDeviceInfo,
    ui::{Presenter, VoiceSession},
};

struct ConsolePresenter;

impl Presenter for ConsolePresenter {
    fn on_chat_received(&self, sender: &str, text: &str) {
        println!("<{}> {}", sender, text);
    }

    fn on_presence_changed(&self, name: &str, joined: bool) {
        if joined {
            println!("* {} joined", name);
        } else {
            println!("* {} left", name);
        }
    }

    fn on_audio_started(&self) {
        println!("* microphone live");
    }

    fn on_audio_stopped(&self) {
        println!("* microphone muted");
    }

    fn on_audio_error(&self, error: &AudioError) {
        println!("! audio error: {}", error);
    }
}

fn print_devices(devices: &[AudioDeviceInfo]) {
    println!("\n=== Available Audio Devices ===");
    for device in devices {
        let device_type = match (device.is_input(), device.is_output()) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default_input || device.is_default_output {
            " [DEFAULT]"
        } else {
            ""
        };
        println!("  {} ({}){}", device.name, device_type, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
    }
    println!();
}

fn device_arg(arg: &str) -> Option<String> {
    match arg.trim() {
        "" | "default" => None,
        name => Some(name.to_string()),
    }
}

fn main() -> Result<()> {
    let mut config = AppConfig::load(None).context("Failed to load configuration")?;
    let mut args = std::env::args().skip(1);
    if let Some(name) = args.next() {
        config.client.display_name = name;
    }
    if let Some(room) = args.next() {
        config.client.room_code = room;
    }
    if let Some(addr) = args.next() {
        config.client.server_address = addr;
    }
    config.validate().context("Invalid configuration")?;
    init_logging(&config.logging);

    tracing::info!(
        name = %config.client.display_name,
        room = %config.client.room_code,
        server = %config.client.server_address,
        "Starting voice client"
    );

    let session = VoiceSession::new(&config, Arc::new(CpalBackend::new()), Arc::new(ConsolePresenter));
    print_devices(&session.list_devices());
    session.connect()?;

    println!("Muted. Type /mute to talk, /quit to exit.");
    for line in io::stdin().lock().lines() {
        let line = line?;
        let (command, rest) = match line.split_once(' ') {
            Some((command, rest)) => (command, rest),
            None => (line.as_str(), ""),
        };

        match command {
            "/quit" => break,
            "/mute" => {
                if let Err(e) = session.toggle_mute() {
                    println!("! could not start audio: {}", e);
                }
            }
            "/volume" => match rest.trim().parse::<u8>() {
                Ok(percent) => println!("* volume {}%", session.set_monitor_volume(percent)),
                Err(_) => println!("* volume {}%", session.monitor_volume()),
            },
            "/devices" => print_devices(&session.list_devices()),
            "/input" => {
                let output = session.audio_config().output_device;
                if let Err(e) = session.select_devices(device_arg(rest), output) {
                    println!("! could not switch input: {}", e);
                }
            }
            "/output" => {
                let input = session.audio_config().input_device;
                if let Err(e) = session.select_devices(input, device_arg(rest)) {
                    println!("! could not switch output: {}", e);
                }
            }
            _ => {
                session.send_chat(&line);
            }
        }
    }

    session.shutdown();
    Ok(())
}
