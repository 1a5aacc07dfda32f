#![deny(clippy::all)]

//! Interactive console front-end for the briefing engine
//!
//! Wires the orchestrator to the real HTTP/WebSocket services and drives
//! it from stdin, printing session transitions as they happen.

use anyhow::Context;
use briefcast::briefing::{
    BriefingCommand, BriefingDeps, BriefingOrchestrator, BriefingStatus, HttpAnswerProvider,
    HttpContentProvider, LiteralPhraseClassifier,
};
use briefcast::capture::AudioCaptureSession;
use briefcast::channel::TranscriptionChannel;
use briefcast::config::EngineConfig;
use briefcast::persistence::CompletionStore;
use briefcast::playback::AudioPlaybackController;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let config = EngineConfig::load();
    info!(
        content_url = %config.content_url,
        stt_ws_url = %config.stt_ws_url,
        "Briefing engine starting"
    );

    let store = Arc::new(CompletionStore::open_default().context("opening completion store")?);

    let channel_session = format!("engine-{}", chrono::Utc::now().format("%Y%m%d%H%M%S"));
    let channel = TranscriptionChannel::connect(&config.stt_ws_url, &channel_session)
        .await
        .context("connecting transcription channel")?;
    let voice_events = channel.subscribe();
    let channel = Arc::new(channel);

    let player = Arc::new(AudioPlaybackController::new());

    let deps = BriefingDeps {
        content: Arc::new(HttpContentProvider::new(config.content_url.clone())),
        qa: Arc::new(HttpAnswerProvider::new(config.qa_url.clone())),
        player,
        capture: AudioCaptureSession::new(channel.clone()),
        voice_events,
        store,
        classifier: Box::new(LiteralPhraseClassifier),
    };

    let handle = BriefingOrchestrator::spawn(deps, config.silence_timeout());

    // Print session transitions while the command loop runs
    let mut watch_rx = handle.watch();
    let printer = tokio::spawn(async move {
        let mut last_status = BriefingStatus::Idle;
        while watch_rx.changed().await.is_ok() {
            let snapshot = watch_rx.borrow().clone();
            if snapshot.status != last_status {
                println!(
                    "[{:?}] section {}/{}",
                    snapshot.status, snapshot.current_section, snapshot.total_sections
                );
                last_status = snapshot.status;
            }
            if let Some(secs) = snapshot.silence_countdown {
                println!("  continuing in {}...", secs);
            }
            if let Some(error) = &snapshot.error {
                println!("  error: {}", error);
            }
        }
    });

    let user_id = std::env::args().nth(1).unwrap_or_else(|| "operator".to_string());
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut parts = line.split_whitespace();
        let command = match parts.next() {
            Some(word) => word,
            None => continue,
        };
        let sent = match command {
            "start" | "s" => {
                handle
                    .send(BriefingCommand::Start {
                        user_id: user_id.clone(),
                        area_order: parts.map(str::to_string).collect(),
                    })
                    .await
            }
            "continue" | "c" => handle.send(BriefingCommand::Continue).await,
            "next" | "n" => handle.send(BriefingCommand::NextSection).await,
            "prev" | "p" => handle.send(BriefingCommand::PreviousSection).await,
            "goto" | "g" => match parts.next().and_then(|n| n.parse().ok()) {
                Some(index) => handle.send(BriefingCommand::GoToSection(index)).await,
                None => {
                    println!("usage: goto <section>");
                    continue;
                }
            },
            "talk" | "t" => handle.send(BriefingCommand::PushToTalk).await,
            "release" | "r" => handle.send(BriefingCommand::ReleaseTalk).await,
            "retry" => handle.send(BriefingCommand::RetryVoiceInput).await,
            "end" | "e" => handle.send(BriefingCommand::End).await,
            "reset" => handle.send(BriefingCommand::Reset).await,
            "transcript" => {
                for entry in handle.transcript() {
                    println!("{:?}: {}", entry.kind, entry.text);
                    for citation in &entry.citations {
                        println!("    [{}] {}", citation.source, citation.data_point);
                    }
                }
                continue;
            }
            "quit" | "q" => break,
            "help" | "?" => {
                print_help();
                continue;
            }
            other => {
                println!("unknown command: {}", other);
                continue;
            }
        };
        if !sent {
            anyhow::bail!("orchestrator stopped unexpectedly");
        }
    }

    printer.abort();
    handle.shutdown();
    channel.close();
    info!("Briefing engine stopped");
    Ok(())
}

fn print_help() {
    println!("commands:");
    println!("  start [area ...]   begin a briefing");
    println!("  talk / release     hold-to-talk at a pause point");
    println!("  continue           advance past the current pause point");
    println!("  next / prev        navigate sections");
    println!("  goto <n>           jump to a section");
    println!("  retry              retry microphone access");
    println!("  transcript         print the session transcript");
    println!("  end                end the briefing");
    println!("  reset              clear session state");
    println!("  quit               exit");
}
