//! Console rendering of client session events.

use tokio::{
    io::{self, AsyncWriteExt},
    sync::mpsc,
};

use crate::client::SessionEvent;

const DIVIDER_WIDTH: usize = 60;

/// Prints events until the session drops its sender.
pub async fn render_events(mut events: mpsc::UnboundedReceiver<SessionEvent>) -> io::Result<()> {
    while let Some(event) = events.recv().await {
        write_stdout(&render_event(&event)).await?;
    }
    Ok(())
}

pub fn render_event(event: &SessionEvent) -> String {
    match event {
        SessionEvent::ConnectAttempt { attempt } => format!("Connection attempt {attempt}"),
        SessionEvent::Connected { peer, .. } => {
            let divider = "*".repeat(DIVIDER_WIDTH);
            format!("\n{divider}\nSocket connected to {peer}\n{divider}")
        }
        SessionEvent::MessageSent { .. } => "Message Sent".to_string(),
        SessionEvent::MessageReceived(message) => format!("Message Received: {message}"),
        SessionEvent::Disconnected => "Server Closed".to_string(),
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
