use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use wakeline::api::{ApiServer, ApiState};
use wakeline::client::{
    ChunkTransport, ClientOrchestrator, ClientParts, OrchestratorSettings, PushToTalk,
    ReconnectPolicy, SpeechClient, UiEvent,
};
use wakeline::voice::{
    AudioCaptureSession, CaptureMode, CloudStt, CpalMicrophone, CuePlayer, Microphone, NoCue,
    SegmentingEngine, SilenceDetector, SilenceTracker, SpectrumAnalyser, ToneCue,
    WakeWordRecognizer, WarmMicrophone, average_volume, language_hint, volume_db,
};
use wakeline::Config;

/// Wakeline - wake-word voice assistant
#[derive(Parser)]
#[command(name = "wakeline", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the conversation server
    Serve {
        /// Port to listen on
        #[arg(long, env = "WAKELINE_PORT")]
        port: Option<u16>,

        /// Directory with a static UI to serve at /
        #[arg(long, env = "WAKELINE_STATIC_DIR")]
        static_dir: Option<PathBuf>,
    },
    /// Listen for the wake word and talk to the server
    Listen {
        /// WebSocket URL of the server
        #[arg(long, env = "WAKELINE_SERVER_URL")]
        server_url: Option<String>,

        /// Phrase that starts a recording
        #[arg(long, env = "WAKELINE_WAKE_WORD")]
        wake_word: Option<String>,

        /// Don't play a beep when the wake word is heard
        #[arg(long)]
        no_cue: bool,
    },
    /// Record on Enter and upload each utterance whole
    Talk {
        /// Base HTTP URL of the server
        #[arg(long, env = "WAKELINE_HTTP_URL")]
        url: Option<String>,
    },
    /// Upload a recording and print the reply
    Send {
        /// Audio file (wav, webm, ogg, mp3 or raw 16 kHz PCM16)
        file: PathBuf,

        /// Base HTTP URL of the server
        #[arg(long, env = "WAKELINE_HTTP_URL")]
        url: Option<String>,
    },
    /// Show microphone levels as the silence detector sees them
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,wakeline=info",
        1 => "info,wakeline=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;

    match cli.command {
        Command::Serve { port, static_dir } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if static_dir.is_some() {
                config.server.static_dir = static_dir;
            }
            serve(config).await
        }
        Command::Listen {
            server_url,
            wake_word,
            no_cue,
        } => {
            if let Some(url) = server_url {
                config.client.server_url = url;
            }
            if let Some(phrase) = wake_word {
                config.client.wake_word = phrase;
            }
            listen(config, no_cue).await
        }
        Command::Talk { url } => {
            if let Some(url) = url {
                config.client.http_url = url;
            }
            talk(&config).await
        }
        Command::Send { file, url } => {
            if let Some(url) = url {
                config.client.http_url = url;
            }
            send(&config, &file).await
        }
        Command::TestMic { duration } => test_mic(&config, duration).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let state = Arc::new(ApiState::from_config(&config)?);

    tracing::info!(
        port = config.server.port,
        window_secs = config.server.history_window.as_secs(),
        "starting wakeline server"
    );

    let server = ApiServer::new(state, config.server.port)
        .with_static_dir(config.server.static_dir.clone())
        .spawn();

    tokio::select! {
        result = server => result??,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    }

    Ok(())
}

async fn listen(config: Config, no_cue: bool) -> anyhow::Result<()> {
    let client = &config.client;

    let stt = CloudStt::from_config(
        &config.stt,
        config.api_keys.openai.as_deref(),
        config.api_keys.deepgram.as_deref(),
    )?
    .with_language(language_hint(&client.language));

    let microphone: Arc<dyn Microphone> =
        Arc::new(WarmMicrophone::new(Arc::new(CpalMicrophone::new())));

    let (server_tx, server_rx) = mpsc::unbounded_channel();
    let transport = ChunkTransport::new(
        client.server_url.clone(),
        ReconnectPolicy::with_base_delay(client.reconnect_delay),
        server_tx,
    );

    let capture = AudioCaptureSession::new(
        Arc::clone(&microphone),
        CaptureMode::Streaming(Arc::new(transport.clone())),
    );

    let (recognition_tx, recognition_rx) = mpsc::unbounded_channel();
    let engine = SegmentingEngine::new(
        Arc::clone(&microphone),
        Arc::new(stt),
        recognition_tx,
        client.language.clone(),
    );
    let recognizer = WakeWordRecognizer::new(Arc::new(engine), &client.wake_word);
    let pump = recognizer.spawn_event_pump(recognition_rx);

    let cue: Arc<dyn CuePlayer> = if no_cue {
        Arc::new(NoCue)
    } else {
        Arc::new(ToneCue::default())
    };

    let parts = ClientParts {
        recognizer,
        capture: Arc::new(capture),
        silence: Arc::new(SilenceDetector::new()),
        link: Arc::new(transport),
        cue,
    };
    let (handle, task) =
        ClientOrchestrator::spawn(parts, OrchestratorSettings::from(client), server_rx);

    let mut ui = handle.subscribe();
    handle.start_listening();

    tracing::info!(
        server = %client.server_url,
        wake_word = %client.wake_word,
        "listening"
    );
    println!("Say \"{}\" to start talking. Ctrl+C to quit.", client.wake_word);

    loop {
        tokio::select! {
            event = ui.recv() => match event {
                Ok(event) => render(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "console lagging");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                handle.shutdown();
                break;
            }
        }
    }

    task.await?;
    pump.abort();
    tracing::debug!("client stopped");
    Ok(())
}

/// Console renderer for UI events
fn render(event: &UiEvent) {
    let mut stdout = std::io::stdout();
    match event {
        UiEvent::WakeWord(_) => println!("\n[listening...]"),
        UiEvent::Transcription(text) => println!("> {text}"),
        UiEvent::ResponseDelta(text) => {
            print!("{text}");
            let _ = stdout.flush();
        }
        UiEvent::ReplyComplete => println!(),
        UiEvent::Error(message) => eprintln!("error: {message}"),
    }
}

async fn talk(config: &Config) -> anyhow::Result<()> {
    let microphone: Arc<dyn Microphone> =
        Arc::new(WarmMicrophone::new(Arc::new(CpalMicrophone::new())));
    let ptt = PushToTalk::new(
        microphone,
        &OrchestratorSettings::from(&config.client),
        SpeechClient::new(config.client.http_url.clone()),
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    tracing::info!(server = %config.client.http_url, "push-to-talk ready");

    loop {
        println!("Press Enter to talk, Ctrl+C to quit.");
        tokio::select! {
            line = lines.next_line() => {
                if line?.is_none() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }

        println!("[recording... pause or press Enter to finish]");
        let stop = async {
            if let Err(e) = lines.next_line().await {
                tracing::debug!(error = %e, "stdin closed");
            }
        };

        tokio::select! {
            reply = ptt.talk(stop) => match reply {
                Ok(reply) => {
                    println!("> {}", reply.transcription);
                    println!("{}", reply.response);
                }
                Err(e) => eprintln!("error: {e}"),
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    ptt.release().await?;
    Ok(())
}

async fn send(config: &Config, file: &Path) -> anyhow::Result<()> {
    let audio = tokio::fs::read(file).await?;
    let mime_type = match file.extension().and_then(|e| e.to_str()) {
        Some("wav") => "audio/wav",
        Some("webm") => "audio/webm",
        Some("ogg") => "audio/ogg",
        Some("mp3") => "audio/mpeg",
        _ => "application/octet-stream",
    };
    let file_name = file
        .file_name()
        .map_or_else(|| "recording.wav".to_string(), |n| n.to_string_lossy().into_owned());

    let client = SpeechClient::new(config.client.http_url.clone());
    let reply = client.send(audio, &file_name, mime_type).await?;

    println!("> {}", reply.transcription);
    println!("{}", reply.response);
    Ok(())
}

async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let stream = CpalMicrophone::new().acquire()?;
    let mut frames = stream.subscribe();
    println!("Sample rate: {} Hz", stream.sample_rate());
    println!(
        "Silence threshold: {} dB for {} ms",
        config.client.silence_threshold_db,
        config.client.silence_duration.as_millis()
    );
    println!("---");

    let mut analyser = SpectrumAnalyser::new();
    let mut tracker = SilenceTracker::new(
        config.client.silence_threshold_db,
        config.client.silence_duration,
    );
    let mut tick = tokio::time::interval(Duration::from_millis(250));
    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration);

    while tokio::time::Instant::now() < deadline {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(frame) => analyser.push(&frame),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            _ = tick.tick() => {
                let level = volume_db(average_volume(&analyser.byte_frequency_data()));
                let fired = tracker.observe(level, tokio::time::Instant::now());

                // Visual meter over -100..0 dB
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let meter_len = ((level + 100.0) / 2.0).clamp(0.0, 50.0) as usize;
                let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

                println!(
                    "{level:7.1} dB | [{meter}]{}",
                    if fired { " silence" } else { "" }
                );
            }
        }
    }

    println!("\n---");
    println!("If the meter moved while you spoke, your mic is working.");
    println!("Levels staying under the threshold while speaking mean the threshold is too high.");

    Ok(())
}
