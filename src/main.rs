use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use lookout::config::LookoutConfig;
use lookout::services::llm::{RemoteSessionFactory, RemoteSettings};
use lookout::transcript::{Transcript, TranscriptLog};
use lookout::vision::ScreenCapture;
use lookout::Companion;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Prints every transcript line as it is appended, and keeps the log.
struct ConsoleTranscript {
    log: TranscriptLog,
}

impl Transcript for ConsoleTranscript {
    fn on_observation(&self, text: &str) {
        println!("[SEEN] {}", text);
        self.log.on_observation(text);
    }

    fn on_user_message(&self, text: &str) {
        self.log.on_user_message(text);
    }

    fn on_assistant_message(&self, text: &str) {
        println!("[ANSWER] {}", text);
        self.log.on_assistant_message(text);
    }

    fn on_system_message(&self, text: &str) {
        println!("[SYSTEM] {}", text);
        self.log.on_system_message(text);
    }
}

/// Asks `question` unless `interrupt` resolves first.
/// Returns `false` if the wait was interrupted.
async fn ask_unless_interrupted<I>(companion: &Companion, question: &str, interrupt: I) -> bool
where
    I: Future<Output = ()>,
{
    tokio::select! {
        _ = interrupt => {
            tracing::info!("Interrupted while waiting for an answer");
            false
        }
        result = companion.ask(question) => {
            // Failures are already in the transcript.
            if let Err(e) = result {
                tracing::debug!(error = %e, "Question failed");
            }
            true
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Setup Logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lookout=info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")?;

    let config = LookoutConfig::load().context("loading configuration")?;
    tracing::info!(base_url = %config.base_url, model = %config.model, "Lookout booting...");

    // 2. Session + Companion
    let factory = Arc::new(RemoteSessionFactory::new(RemoteSettings {
        base_url: config.base_url.clone(),
        model: config.model.clone(),
        api_key: config.api_key.clone(),
        system_prompt: config.system_prompt.clone(),
        request_timeout: config.request_timeout(),
    }));
    let transcript = Arc::new(ConsoleTranscript { log: TranscriptLog::new() });
    let companion = Companion::new(factory, transcript.clone(), &config);

    // 3. Background annotation
    let source = Arc::new(ScreenCapture::new(config.max_frame_edge, config.jpeg_quality));
    let annotator = companion
        .start_annotator(source, config.annotate_interval())
        .context("starting annotator")?;

    // 4. Foreground questions from stdin
    println!("Ask a question about what's on screen. '/reset' clears memory, '/stats' shows counters.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to read input");
                        break;
                    }
                };

                match line.trim() {
                    "" => continue,
                    "/reset" => companion.reset(),
                    "/stats" => {
                        let stats = companion.telemetry();
                        println!("{}", serde_json::to_string_pretty(&stats)?);
                        println!("appends since last reset: {}", companion.usage_count());
                    }
                    question => {
                        let interrupted = async {
                            let _ = tokio::signal::ctrl_c().await;
                        };
                        if !ask_unless_interrupted(&companion, question, interrupted).await {
                            break;
                        }
                    }
                }
            }
        }
    }

    annotator.stop().await;
    tracing::info!(entries = transcript.log.len(), "Lookout stopped");
    Ok(())
}
