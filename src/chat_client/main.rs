/**
 * MediChat terminal client
 *
 * Opens the conversation with `CHAT_PEER_ID`, prints it, then sends every
 * stdin line and prints incoming messages until EOF or Ctrl-C.
 */

use std::sync::Arc;

use medichat::chat_client::connection::{ConnectionOptions, TungsteniteConnector};
use medichat::chat_client::offline::StoreEvent;
use medichat::chat_client::sync::{FallbackMode, NetworkMonitor, PresenceProbe};
use medichat::chat_client::ChatSession;
use medichat::shared::messaging::Message;
use medichat::shared::ClientConfig;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

fn print_message(message: &Message, local_user_id: &str) {
    let who = if message.sender_id == local_user_id {
        "you"
    } else {
        message.sender_id.as_str()
    };
    println!(
        "[{}] {}: {} ({})",
        message.timestamp.format("%H:%M:%S"),
        who,
        message.text,
        message.status
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match ClientConfig::default_path().filter(|path| path.exists()) {
        Some(path) if std::env::var("CHAT_SERVER_ADDRESS").is_err() => {
            tracing::info!(path = %path.display(), "Loading configuration file");
            ClientConfig::load_file(path)?
        }
        _ => ClientConfig::from_env()?,
    };
    let peer_id = config
        .peer_id
        .clone()
        .ok_or("CHAT_PEER_ID must name the conversation to open")?;
    let local_user_id = config.local_user_id.clone().unwrap_or_default();

    let fallback = FallbackMode::default();
    let probe = PresenceProbe::new(&config, fallback.clone());
    probe.start();

    let options = ConnectionOptions {
        network: Some(NetworkMonitor::default()),
        fallback: fallback.clone(),
        ..ConnectionOptions::default()
    };
    let mut session = ChatSession::with_options(config, Arc::new(TungsteniteConnector), options)?;

    let _notices = session.on_notice(|notice| eprintln!("! {}", notice.text));
    let _connection = session.on_connection_change(|up| {
        eprintln!("* {}", if *up { "connected" } else { "disconnected" });
    });
    let _fallback = fallback.on_change(|enabled| {
        if *enabled {
            eprintln!("* backend unreachable, running in simulated mode");
        }
    });

    for message in session.open_conversation(&peer_id).await? {
        print_message(&message, &local_user_id);
    }

    let store = session.store().clone();
    let printer_user = local_user_id.clone();
    let _updates = session.on_update(move |event| {
        if let StoreEvent::MessageAdded { peer_id, message_id } = event {
            if let Some(message) = store.message(peer_id, message_id) {
                if message.sender_id != printer_user {
                    print_message(&message, &printer_user);
                }
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if let Some(receipt) = session.send(&line) {
                        if !receipt.accepted {
                            eprintln!("! message not sent, waiting for the connection");
                        }
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    probe.stop();
    session.shutdown().await;
    Ok(())
}
