//! Stdin/stdout JSON bridge between the transcript and a chat shell.
//!
//! Reads newline-delimited [`ChatInput`] lines from stdin and posts them to
//! the transcript as chat messages. Every transcript message is written back
//! to stdout as an [`Outbound`] JSON line.
//!
//! Stdout is exclusively reserved for the JSON protocol; all diagnostic
//! output (tracing, logs) must be routed to stderr.

use crate::error::{FusionError, Result};
use crate::host::contract::{ChatInput, Outbound};
use crate::stream::Subscription;
use crate::transcript::Transcript;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;

/// A bridge whose output side is already subscribed to the transcript.
///
/// Transcript subscribers run in subscription order, and the orchestrator
/// answers a typed line from inside its own subscriber. Attach the bridge
/// before building the orchestrator so each typed line is written out before
/// the agent is asked about it; attached later, the line appears only once
/// the answer is ready.
pub struct StdioBridge {
    transcript: Transcript,
    forward: Subscription,
    tx: mpsc::UnboundedSender<Outbound>,
    rx: mpsc::UnboundedReceiver<Outbound>,
}

impl StdioBridge {
    /// Start buffering every transcript message for output.
    pub fn attach(transcript: &Transcript) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<Outbound>();
        let forward = {
            let tx = tx.clone();
            transcript.subscribe(move |message| {
                // The writer is gone only after the bridge stopped reading.
                let _ = tx.send(Outbound::Message(message.clone()));
            })
        };
        Self {
            transcript: transcript.clone(),
            forward,
            tx,
            rx,
        }
    }

    /// Run over the process's stdin and stdout until stdin closes.
    pub async fn run_stdio(self, default_sender: String) -> Result<()> {
        let reader = BufReader::new(tokio::io::stdin());
        let writer = BufWriter::new(tokio::io::stdout());
        self.run(reader, writer, default_sender).await.map(|_| ())
    }

    /// Run over arbitrary line-oriented I/O and hand the writer back once
    /// every pending line has been flushed.
    ///
    /// Input lines are posted one at a time on the blocking pool, because a
    /// post may close a cycle and call the agent on the posting thread. A
    /// line typed while an answer is pending is therefore read after that
    /// answer.
    pub async fn run<R, W>(self, reader: R, writer: W, default_sender: String) -> Result<W>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let Self {
            transcript,
            forward,
            tx,
            rx,
        } = self;
        let writer_handle = tokio::spawn(write_lines(rx, writer));

        let read_result = read_lines(reader, &transcript, &default_sender, &tx).await;

        forward.unsubscribe();
        drop(tx);
        let writer = writer_handle
            .await
            .map_err(|e| FusionError::Transcript(format!("stdout writer task failed: {e}")))??;

        read_result?;
        Ok(writer)
    }
}

/// Attach a bridge to `transcript` and run it over `reader` and `writer`.
pub async fn run_bridge<R, W>(
    reader: R,
    writer: W,
    transcript: Transcript,
    default_sender: String,
) -> Result<W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    StdioBridge::attach(&transcript)
        .run(reader, writer, default_sender)
        .await
}

async fn read_lines<R>(
    mut reader: R,
    transcript: &Transcript,
    default_sender: &str,
    out: &mpsc::UnboundedSender<Outbound>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| FusionError::Transcript(format!("failed to read from stdin: {e}")))?;

        if bytes_read == 0 {
            tracing::info!("stdin closed (EOF); shutting down stdio bridge");
            return Ok(());
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let input: ChatInput = match serde_json::from_str(trimmed) {
            Ok(input) => input,
            Err(e) => {
                tracing::warn!(error = %e, raw_line = %trimmed, "failed to parse chat line from stdin");
                let _ = out.send(Outbound::Error {
                    message: format!("failed to parse chat line: {e}"),
                });
                continue;
            }
        };
        if input.text.trim().is_empty() {
            continue;
        }

        let sender = input.sender.unwrap_or_else(|| default_sender.to_owned());
        let transcript = transcript.clone();
        tokio::task::spawn_blocking(move || transcript.post(input.text, sender, true))
            .await
            .map_err(|e| FusionError::Transcript(format!("chat post task failed: {e}")))?;
    }
}

async fn write_lines<W>(mut rx: mpsc::UnboundedReceiver<Outbound>, mut writer: W) -> Result<W>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        match serde_json::to_string(&line) {
            Ok(json) => write_line(&mut writer, &json).await?,
            Err(e) => tracing::error!(error = %e, "failed to serialize outbound line; skipping"),
        }
    }
    Ok(writer)
}

/// Write a single JSON line and flush.
async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, json: &str) -> Result<()> {
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| FusionError::Transcript(format!("failed to write to stdout: {e}")))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| FusionError::Transcript(format!("failed to write newline to stdout: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| FusionError::Transcript(format!("failed to flush stdout: {e}")))?;
    Ok(())
}
