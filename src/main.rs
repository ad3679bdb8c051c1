use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use stagebot::voice::{
    AudioCapture, AudioPlayback, CloudSynthesizer, ConsoleEngine, ConsoleSynthesizer,
    MicrophoneEngine, RecognitionEngine, SpeechToText, Synthesizer, TextToSpeech,
};
use stagebot::{
    CompletionClient, Settings, SettingsStore, VoiceBot, determine_stage, find_stage,
    parse_stage_command,
};

/// Stagebot - staged voice sales assistant
#[derive(Parser)]
#[command(name = "stagebot", version, about)]
struct Cli {
    /// Settings file (JSON)
    #[arg(short, long, env = "STAGEBOT_SETTINGS", global = true)]
    settings: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the bot until interrupted (default)
    Run(RunArgs),
    /// Send one utterance and print the reply
    Ask {
        /// What the user said
        text: String,
        /// Print the reply as it streams
        #[arg(long)]
        stream: bool,
    },
    /// Report whether streamed replies will be used
    Probe,
    /// Inspect or change saved settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print effective settings (API key redacted)
    Show,
    /// Print the settings file path
    Path,
    /// Restore defaults
    Reset,
    /// Merge a JSON document into the saved settings
    Import {
        /// JSON file to merge
        file: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Where utterances come from
    #[arg(long, value_enum, default_value_t = Input::Console)]
    input: Input,

    /// Where replies are spoken
    #[arg(long, value_enum, default_value_t = Output::Console)]
    output: Output,

    /// TTS voice for cloud output
    #[arg(long, env = "STAGEBOT_VOICE", default_value = "alloy")]
    voice: String,

    /// TTS speaking rate for cloud output
    #[arg(long, default_value = "1.0")]
    speed: f32,

    /// Whisper model for microphone input
    #[arg(long, default_value = "whisper-1")]
    stt_model: String,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            input: Input::Console,
            output: Output::Console,
            voice: "alloy".to_string(),
            speed: 1.0,
            stt_model: "whisper-1".to_string(),
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Input {
    /// One line of stdin per utterance
    Console,
    /// Default microphone, transcribed with Whisper
    Mic,
}

#[derive(Clone, Copy, ValueEnum)]
enum Output {
    /// Print replies
    Console,
    /// `OpenAI` TTS on the default speaker
    Cloud,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,stagebot=info",
        1 => "info,stagebot=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let store = cli
        .settings
        .map_or_else(SettingsStore::open_default, SettingsStore::new);

    let mut settings = store.load();
    settings.apply_env();

    match cli.command.unwrap_or_else(|| Command::Run(RunArgs::default())) {
        Command::Run(args) => run_bot(settings, args).await,
        Command::Ask { text, stream } => ask(&settings, &text, stream).await,
        Command::Probe => {
            probe(&settings);
            Ok(())
        }
        Command::Settings { action } => settings_command(&store, settings, action),
        Command::TestMic { duration } => test_mic(duration),
        Command::TestSpeaker => test_speaker(),
    }
}

/// Run a full session until Ctrl-C
async fn run_bot(settings: Settings, args: RunArgs) -> anyhow::Result<()> {
    let engine: Arc<dyn RecognitionEngine> = match args.input {
        Input::Console => Arc::new(ConsoleEngine::new()),
        Input::Mic => {
            let stt = SpeechToText::new_whisper(settings.api_key.clone(), args.stt_model)?;
            Arc::new(MicrophoneEngine::new(stt))
        }
    };

    let synthesizer: Arc<dyn Synthesizer> = match args.output {
        Output::Console => Arc::new(ConsoleSynthesizer::default()),
        Output::Cloud => {
            let tts = TextToSpeech::new_openai(
                settings.api_key.clone(),
                args.voice,
                args.speed,
                "tts-1".to_string(),
            )?;
            Arc::new(CloudSynthesizer::new(tts))
        }
    };

    tracing::info!(
        api_url = %settings.api_url,
        model = %settings.model_or_default(),
        language = %settings.language,
        stages = settings.conversation_stages.len(),
        "starting stagebot"
    );

    let bot = VoiceBot::new(settings, engine, synthesizer);

    let mut status = bot.subscribe_status();
    let watcher = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            eprintln!("[{current}]");
        }
    });

    bot.initialize().await;
    bot.start().await?;
    tracing::info!("stagebot ready - press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;

    bot.stop();
    watcher.abort();
    Ok(())
}

/// One-shot completion using the stage the text maps to
async fn ask(settings: &Settings, text: &str, stream: bool) -> anyhow::Result<()> {
    let stages = &settings.conversation_stages;
    let stage_number = parse_stage_command(text, &settings.command_markers)
        .filter(|&n| find_stage(stages, n).is_some())
        .or_else(|| determine_stage(text, stages, 1).map(|s| s.stage_number))
        .unwrap_or(1);

    tracing::debug!(stage = stage_number, "using stage instruction");
    let instruction = settings.instruction_for(stage_number);
    let client = CompletionClient::new(settings);

    if stream {
        if !client.supports_streaming() {
            tracing::warn!("endpoint is not expected to stream, trying anyway");
        }

        client
            .send_streaming_request(text, instruction, |chunk, _| {
                print!("{chunk}");
                let _ = std::io::stdout().flush();
            })
            .await?;
        println!();
    } else {
        println!("{}", client.send_request(text, instruction).await?);
    }

    Ok(())
}

/// Print streaming capability
fn probe(settings: &Settings) {
    let client = CompletionClient::new(settings);
    println!("api url:   {}", settings.api_url);
    println!("policy:    {:?}", settings.streaming_policy);
    println!("streaming: {}", client.supports_streaming());
    if !settings.use_streaming {
        println!("(streaming is disabled in settings)");
    }
}

fn settings_command(
    store: &SettingsStore,
    settings: Settings,
    action: SettingsAction,
) -> anyhow::Result<()> {
    match action {
        SettingsAction::Show => {
            let mut shown = settings;
            if !shown.api_key.is_empty() {
                shown.api_key = "[redacted]".to_string();
            }
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
        SettingsAction::Path => println!("{}", store.path().display()),
        SettingsAction::Reset => {
            store.reset()?;
            println!("Settings reset: {}", store.path().display());
        }
        SettingsAction::Import { file } => {
            let json = std::fs::read_to_string(&file)?;
            store.import(&json)?;
            println!("Imported {} into {}", file.display(), store.path().display());
        }
    }
    Ok(())
}

/// Print a live input level meter
fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::open()?;
    capture.start()?;

    for i in 0..duration {
        std::thread::sleep(Duration::from_secs(1));

        let samples = capture.take_buffer();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);
    }

    capture.stop();

    println!("\n---");
    println!("If the meter moved, the microphone works.");
    println!("If RMS stayed near 0, check the default input device and its level.");
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Play a two second 440Hz tone
fn test_speaker() -> anyhow::Result<()> {
    const RATE: f32 = 24000.0;
    const SECONDS: f32 = 2.0;

    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::open()?;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let count = (RATE * SECONDS) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..count)
        .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / RATE).sin() * 0.3)
        .collect();

    playback.play_samples(samples, &AtomicBool::new(false))?;

    println!("\n---");
    println!("If you heard the tone, the speaker works.");
    Ok(())
}
