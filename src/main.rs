mod audio;
mod config;
mod controller;
mod error;
mod live_link;
mod protocol;
mod service;
mod session;
mod state;

use config::Config;
use controller::{ConsoleVoice, ControlEvent, Controller, MicFactory, SinkFactory, UserCommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// One parsed console line.
#[derive(Debug)]
enum ConsoleEvent {
    Command(UserCommand),
    Status,
    Quit,
}

fn parse_line(line: &str) -> Option<ConsoleEvent> {
    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let event = match verb {
        "think" => ConsoleEvent::Command(UserCommand::DeepThink(rest.to_string())),
        "search" => ConsoleEvent::Command(UserCommand::Search(rest.to_string())),
        "maps" => ConsoleEvent::Command(UserCommand::Maps(rest.to_string())),
        "scan" => ConsoleEvent::Command(UserCommand::ScanBio),
        "voice" => ConsoleEvent::Command(UserCommand::ToggleVoice),
        "live" => ConsoleEvent::Command(UserCommand::ToggleLive),
        "smile" => ConsoleEvent::Command(UserCommand::FakeSmile),
        "destruct" => ConsoleEvent::Command(UserCommand::SelfDestruct),
        "status" => ConsoleEvent::Status,
        "quit" | "exit" => ConsoleEvent::Quit,
        _ => return None,
    };
    Some(event)
}

fn spawn_console(tx: mpsc::Sender<ConsoleEvent>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_line(line) {
                Some(event) => {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                None => println!("commands: think|search|maps <q>, scan, voice, live, smile, destruct, status, quit"),
            }
        }
    });
}

#[cfg(feature = "alsa-audio")]
fn device_factories(config: &Config) -> (MicFactory, SinkFactory) {
    use crate::audio::alsa::{AlsaMic, AlsaSink};

    let capture_device = config.capture_device.clone();
    let input_rate = config.input_sample_rate;
    let mic: MicFactory = Box::new(move || {
        AlsaMic::open(&capture_device, input_rate).map(|m| Box::new(m) as _)
    });

    let playback_device = config.playback_device.clone();
    let output_rate = config.output_sample_rate;
    let sink: SinkFactory = Box::new(move || {
        AlsaSink::open(&playback_device, output_rate).map(|s| Box::new(s) as _)
    });

    (mic, sink)
}

#[cfg(not(feature = "alsa-audio"))]
fn device_factories(_config: &Config) -> (MicFactory, SinkFactory) {
    let mic: MicFactory = Box::new(|| {
        Err(anyhow::anyhow!("built without the alsa-audio feature; no microphone available").into())
    });
    let sink: SinkFactory = Box::new(|| {
        Err(anyhow::anyhow!("built without the alsa-audio feature; no audio output available")
            .into())
    });
    (mic, sink)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;
    info!(client_id = %config.client_id, "EmoBot core starting");

    let (console_tx, mut console_rx) = mpsc::channel::<ConsoleEvent>(16);
    let (evt_tx, mut evt_rx) = mpsc::channel::<ControlEvent>(100);

    let (mic_factory, sink_factory) = device_factories(&config);
    let mut controller = Controller::new(
        config,
        evt_tx,
        mic_factory,
        sink_factory,
        // No camera backend is wired in this front-end; `scan` answers with
        // the camera-error line.
        None,
        Box::new(ConsoleVoice),
    );

    spawn_console(console_tx);
    println!("EMOBOT V30.0: The Grumpy Companion");
    println!("{}", controller.state().status);

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("received ctrl-c, shutting down");
                break;
            }
            Some(event) = console_rx.recv() => {
                match event {
                    ConsoleEvent::Command(cmd) => controller.handle_command(cmd).await,
                    ConsoleEvent::Status => {
                        println!("{}", serde_json::to_string_pretty(controller.state())?);
                    }
                    ConsoleEvent::Quit => break,
                }
            }
            Some(event) = evt_rx.recv() => {
                controller.handle_event(event).await;
            }
        }

        if controller.is_dead() {
            println!("SYSTEM OFFLINE");
            println!("REASON: UNRECOVERABLE DISAPPOINTMENT");
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_with_arguments() {
        assert!(matches!(
            parse_line("think why are we here"),
            Some(ConsoleEvent::Command(UserCommand::DeepThink(q))) if q == "why are we here"
        ));
        assert!(matches!(
            parse_line("search rust schedulers"),
            Some(ConsoleEvent::Command(UserCommand::Search(_)))
        ));
        assert!(matches!(
            parse_line("maps coffee nearby"),
            Some(ConsoleEvent::Command(UserCommand::Maps(_)))
        ));
    }

    #[test]
    fn parses_bare_commands() {
        assert!(matches!(
            parse_line("live"),
            Some(ConsoleEvent::Command(UserCommand::ToggleLive))
        ));
        assert!(matches!(
            parse_line("destruct"),
            Some(ConsoleEvent::Command(UserCommand::SelfDestruct))
        ));
        assert!(matches!(parse_line("quit"), Some(ConsoleEvent::Quit)));
    }

    #[test]
    fn rejects_unknown_commands() {
        assert!(parse_line("dance").is_none());
    }
}
