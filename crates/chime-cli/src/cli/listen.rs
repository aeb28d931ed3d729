use anyhow::{Context, Result};
use chime_core::models::NotificationRecord;
use chime_core::store::SharedNotificationStore;
use chime_core::{CoreConfig, CoreEvent, CoreHandle, CoreRuntime};
use tokio::io::{AsyncBufReadExt, BufReader};

use super::input::{InputCommand, HELP};

/// One-line rendering: read marker, local time, type, title and message.
pub fn format_record(record: &NotificationRecord) -> String {
    let marker = if record.is_read { " " } else { "*" };
    let when = record
        .created_at
        .with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M");
    let mut line = format!("{} [{}] {} {:<20}", marker, record.id, when, record.kind.as_str());
    if !record.title.is_empty() {
        line.push(' ');
        line.push_str(&record.title);
    }
    if !record.message.is_empty() {
        line.push_str(": ");
        line.push_str(&record.message);
    }
    if let Some(target) = &record.redirect_target {
        line.push_str(&format!(" -> {}", target));
    }
    line
}

fn print_records(records: &[NotificationRecord]) {
    if records.is_empty() {
        println!("(nothing)");
    }
    for record in records {
        println!("{}", format_record(record));
    }
}

fn print_event(event: &CoreEvent, store: &SharedNotificationStore) {
    match event {
        CoreEvent::NewNotification(record) => {
            println!("{}", format_record(record));
            eprintln!("  {} unread", store.unread_count());
        }
        CoreEvent::AudioBlocked => {
            eprintln!("(sound is locked until you type a command; 'unlock' works too)");
        }
        CoreEvent::ConnectionChanged(state) => eprintln!("connection: {}", state),
        CoreEvent::Offline { attempts } => {
            eprintln!("offline after {} attempts, still retrying", attempts)
        }
        CoreEvent::HistoryLoaded { added } => {
            eprintln!("loaded {} notifications from history", added)
        }
        CoreEvent::Resynced { inserted } => {
            eprintln!("resynced with server, {} missed notifications", inserted)
        }
    }
}

async fn execute(handle: &CoreHandle, store: &SharedNotificationStore, command: InputCommand) {
    let result: Result<()> = async {
        match command {
            InputCommand::List(limit) => print_records(&store.list(Some(limit))),
            InputCommand::Unread => {
                let unread: Vec<_> = store.read().unread(None).into_iter().cloned().collect();
                print_records(&unread);
            }
            InputCommand::Read(id) => {
                if handle.mark_read(id.as_str()).await? {
                    eprintln!("marked {} read", id);
                } else {
                    eprintln!("{} is unknown or already read", id);
                }
            }
            InputCommand::ReadAll => {
                let changed = handle.mark_all_read().await?;
                eprintln!("marked {} read", changed);
            }
            InputCommand::ReadType(kind) => {
                let changed = handle.mark_kind_read(kind.clone()).await?;
                eprintln!("marked {} {} notifications read", changed, kind);
            }
            InputCommand::Cleanup => {
                let removed = handle.cleanup_duplicates().await?;
                eprintln!("removed {} duplicates", removed);
            }
            InputCommand::Test(payload) => {
                handle.send_test_event(payload).await?;
                eprintln!("test event sent");
            }
            InputCommand::Sound(enabled) => {
                handle.set_sound_enabled(enabled)?;
                eprintln!("sound {}", if enabled { "on" } else { "off" });
            }
            InputCommand::Unlock => {
                handle.initialize_audio().await?;
                eprintln!("audio unlocked");
            }
            InputCommand::Resync => {
                let inserted = handle.resync().await?;
                eprintln!("{} new from server", inserted);
            }
            InputCommand::Help => println!("{}", HELP),
            InputCommand::Quit => {}
        }
        Ok(())
    }
    .await;

    if let Err(e) = result {
        eprintln!("error: {}", e);
    }
}

/// Connect, print notifications as they arrive and take commands on stdin
/// until `quit` or EOF.
#[tokio::main]
pub async fn run_listen(config: CoreConfig) -> Result<()> {
    eprintln!("Connecting to {}", config.server_url);
    let mut runtime = CoreRuntime::new(config)?;
    let mut events = runtime
        .take_events()
        .context("Core event stream already taken")?;
    let handle = runtime.handle();
    let store = runtime.store();
    runtime.start()?;
    eprintln!("Type 'help' for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut audio_attempted = false;

    loop {
        tokio::select! {
            Some(event) = events.recv() => print_event(&event, &store),
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                let command = match InputCommand::parse(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(e) => {
                        eprintln!("{}", e);
                        continue;
                    }
                };
                if command == InputCommand::Quit {
                    break;
                }

                // The first typed command is the user interaction that unlocks audio.
                if !audio_attempted && command != InputCommand::Unlock {
                    audio_attempted = true;
                    if let Err(e) = handle.initialize_audio().await {
                        tracing::warn!("Audio unavailable: {}", e);
                    }
                }
                execute(&handle, &store, command).await;
            }
        }
    }

    runtime.shutdown().await;
    eprintln!("Stopped");
    Ok(())
}
