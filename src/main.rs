//! mirai: wake-word gated voice assistant.

use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mirai_assistant::chat::OllamaChat;
use mirai_assistant::config::{ConfigStore, SessionConfig};
use mirai_assistant::controller::{OperatingMode, TurnController};
use mirai_assistant::devices;
use mirai_assistant::journal::Journal;
use mirai_assistant::menu::{InterruptWatcher, Menu};
use mirai_assistant::recorder::AudioRecorder;
use mirai_assistant::responder::LanguageResponder;
use mirai_assistant::synthesis::KokoroSynthesizer;
use mirai_assistant::transcriber::{WhisperListener, WhisperTranscriber};

#[derive(Parser, Debug)]
#[command(name = "mirai", about = "Wake-word gated voice assistant")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Start directly in a mode: wake, continuous or text (default: menu)
    #[arg(short, long)]
    mode: Option<String>,

    /// Skip loading Whisper and Kokoro (text chat only)
    #[arg(long)]
    no_voice: bool,

    /// List audio devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Print the conversation report for a date (YYYY-MM-DD, today, or list)
    #[arg(long, num_args = 0..=1, default_missing_value = "today")]
    report: Option<String>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging (suppress noisy ort/whisper internals)
    let filter = if args.verbose {
        EnvFilter::new("debug,ort=info,whisper_rs=info")
    } else {
        EnvFilter::new("info,ort=warn,whisper_rs=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if args.list_devices {
        print!("{}", devices::format_device_list("Output", &devices::output_devices()));
        print!("{}", devices::format_device_list("Input", &devices::input_devices()));
        return Ok(());
    }

    info!("Mirai starting");

    let store = ConfigStore::resolve(args.config.as_deref());
    let config = store.load();
    info!("Config loaded from {} (model: {})", store.path().display(), config.model);

    if let Some(date) = args.report.as_deref() {
        print_report(&config, date);
        return Ok(());
    }

    let mode = match args.mode.as_deref() {
        None | Some("menu") => None,
        Some(name) => match OperatingMode::from_name(name) {
            Some(mode) => Some(mode),
            None => return Err(format!("Unknown mode '{name}' (use wake, continuous or text)").into()),
        },
    };
    let voice = !args.no_voice && mode != Some(OperatingMode::TextOnly);

    let interrupts = InterruptWatcher::install();

    let chat = OllamaChat::new(&config.ollama)?;
    let responder = LanguageResponder::new(Box::new(chat), &config);
    let mut controller = TurnController::new(responder, &config);

    if let Some(journal) = Journal::from_config(&config.journal) {
        info!("Journal enabled: {}", journal.dir().display());
        controller = controller.with_journal(journal);
    }

    if voice {
        controller = load_voice(controller, &config).await;
    } else {
        info!("Voice disabled, text chat only");
    }

    match mode {
        Some(mode) => {
            let token = interrupts.guard();
            let result = controller.run(mode, &token).await;
            interrupts.release();
            result?;
        }
        None => {
            let auto_listen = config.auto_listen && controller.can_listen();
            let mut menu = Menu::new(controller, config, store, interrupts);
            if auto_listen {
                menu.run_mode(OperatingMode::WakeWordListening).await;
            }
            menu.run().await?;
        }
    }

    info!("Mirai stopped");
    Ok(())
}

/// Load Whisper and Kokoro. Either one failing only disables its half.
async fn load_voice(mut controller: TurnController, config: &SessionConfig) -> TurnController {
    info!("Loading Whisper model...");
    let whisper_config = config.whisper.clone();
    match tokio::task::spawn_blocking(move || WhisperTranscriber::load(&whisper_config)).await {
        Ok(Ok(whisper)) => {
            let recorder = AudioRecorder::new(config.audio.clone(), config.silence.clone());
            controller = controller.with_transcriber(Box::new(WhisperListener::new(recorder, whisper)));
        }
        Ok(Err(e)) => warn!("Speech recognition disabled: {e}"),
        Err(e) => warn!("Speech recognition disabled: {e}"),
    }

    if !config.tts.enabled {
        info!("TTS disabled in config");
        return controller;
    }

    info!("Loading Kokoro TTS model...");
    let tts_config = config.tts.clone();
    match tokio::task::spawn_blocking(move || KokoroSynthesizer::load(&tts_config)).await {
        Ok(Ok(tts)) => {
            info!("TTS ready (voice: {}, speed: {})", config.tts.voice, config.rate);
            controller = controller.with_synthesizer(Box::new(tts));
        }
        Ok(Err(e)) => warn!("TTS disabled, continuing without voice output: {e}"),
        Err(e) => warn!("TTS disabled, continuing without voice output: {e}"),
    }

    controller
}

fn print_report(config: &SessionConfig, date: &str) {
    let Some(dir) = config.journal.dir.clone().or_else(Journal::default_dir) else {
        warn!("No journal directory");
        return;
    };
    let journal = Journal::new(dir);

    if date == "list" {
        let dates = journal.list_available_dates();
        if dates.is_empty() {
            println!("No journal entries in {}", journal.dir().display());
        }
        for date in dates {
            println!("{date}");
        }
    } else {
        println!("{}", journal.generate_report(date));
    }
}
