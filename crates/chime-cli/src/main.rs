use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use chime_cli::cli::{prefs, resolve_config, run_listen, Overrides};
use chime_core::models::Preferences;

#[derive(Parser)]
#[command(name = "chime")]
#[command(about = "Real-time notification client")]
struct Cli {
    /// Path to JSON config file (serverUrl, authToken, historyUrl, reconnect, ...)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Directory holding preferences
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print notifications as they arrive
    Listen {
        /// WebSocket endpoint
        #[arg(long)]
        url: Option<String>,

        /// Bearer token for the feed and REST API
        #[arg(long)]
        token: Option<String>,

        /// REST base URL used for history and resync
        #[arg(long)]
        history_url: Option<String>,
    },

    /// Show or change notification preferences
    Prefs {
        #[command(subcommand)]
        action: Option<PrefsAction>,
    },

    /// Play the notification tone once
    Tone,
}

#[derive(Subcommand)]
enum PrefsAction {
    /// Print current preferences
    Show,
    /// Turn the notification sound on or off
    Sound { state: Toggle },
    /// Require a fresh interaction before the next session plays sound
    Relock,
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

fn print_prefs(prefs: &Preferences) {
    match serde_json::to_string_pretty(prefs) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to format preferences: {}", e),
    }
}

fn main() {
    let cli = Cli::parse();
    chime_core::tracing_setup::init_tracing_with_default("warn");

    let mut overrides = Overrides {
        data_dir: cli.data_dir,
        ..Default::default()
    };
    if let Commands::Listen {
        url,
        token,
        history_url,
    } = &cli.command
    {
        overrides.server_url = url.clone();
        overrides.auth_token = token.clone();
        overrides.history_url = history_url.clone();
    }

    let config = match resolve_config(cli.config.as_deref(), overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Listen { .. } => run_listen(config),
        Commands::Prefs { action } => {
            let prefs = match action.unwrap_or(PrefsAction::Show) {
                PrefsAction::Show => prefs::show(&config.data_dir),
                PrefsAction::Sound { state } => {
                    prefs::set_sound(&config.data_dir, matches!(state, Toggle::On))
                }
                PrefsAction::Relock => prefs::reset_interaction(&config.data_dir),
            };
            print_prefs(&prefs);
            Ok(())
        }
        Commands::Tone => prefs::play_tone(),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
