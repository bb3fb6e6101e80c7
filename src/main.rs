use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;
use voice_order_rs::{
    capture::{CaptureConfig, CaptureGate},
    config::load_config,
    controller::{SessionController, SessionHandle, SessionState, SessionUpdate},
    error::Result as SessionResult,
    ledger::{HttpOrderLedger, LogLedger, LogNotifier, OrderLedger, OrderNotifier},
    menu::{CustomerIdentity, MenuCatalog},
    order::DeliveryMethod,
    transcript::Speaker,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the restaurant menu JSON
    #[arg(long, default_value = "menu.json")]
    menu: PathBuf,

    /// Agent WebSocket endpoint (overrides ORDER_AGENT_URL)
    #[arg(long)]
    endpoint: Option<Url>,

    /// Input device name (default device when omitted)
    #[arg(long)]
    device: Option<String>,

    /// Run without a microphone; talk with the say command instead
    #[arg(long)]
    no_mic: bool,

    /// List available input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Returning customer name
    #[arg(long)]
    name: Option<String>,

    /// Returning customer phone number
    #[arg(long)]
    phone: Option<String>,

    /// Saved delivery address for the returning customer (repeatable)
    #[arg(long = "address")]
    addresses: Vec<String>,

    /// POST submitted orders to this URL instead of logging them
    #[arg(long)]
    ledger_url: Option<Url>,

    /// Record the agent's audio to a WAV file
    #[arg(long)]
    record: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> SessionResult<()> {
    env_logger::init();

    let args = Args::parse();
    log::info!("🚀 Starting voice-order with args: {:?}", args);

    if args.list_devices {
        match CaptureGate::list_devices() {
            Ok(devices) => {
                println!("🎤 Input devices:");
                for device in devices {
                    let marker = if device.is_default { " (default)" } else { "" };
                    println!("   {} [{} ch]{}", device.name, device.channel_count, marker);
                }
            }
            Err(e) => {
                eprintln!("❌ Could not enumerate input devices: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let config = match load_config(args.endpoint.clone()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Configuration error: {}", e);
            eprintln!("   Set ORDER_AGENT_URL and ORDER_AGENT_API_KEY (a .env file works too)");
            std::process::exit(1);
        }
    };

    let menu = match MenuCatalog::from_json_file(&args.menu) {
        Ok(menu) => menu,
        Err(e) => {
            eprintln!("❌ Could not load menu from {}: {}", args.menu.display(), e);
            std::process::exit(1);
        }
    };
    log::info!(
        "📖 Menu loaded: {} ({} items)",
        menu.restaurant,
        menu.item_count()
    );

    let ledger: Arc<dyn OrderLedger> = match args.ledger_url {
        Some(url) => match HttpOrderLedger::new(url) {
            Ok(ledger) => Arc::new(ledger),
            Err(e) => {
                eprintln!("❌ Could not set up the order ledger: {}", e);
                std::process::exit(1);
            }
        },
        None => Arc::new(LogLedger),
    };
    let notifier: Arc<dyn OrderNotifier> = Arc::new(LogNotifier);

    let mut controller = SessionController::new(config, menu, ledger, notifier);
    if let (Some(name), Some(phone)) = (args.name, args.phone) {
        controller = controller.with_customer(CustomerIdentity {
            name,
            phone,
            saved_addresses: args.addresses,
        });
    }
    controller = controller.with_capture_config(CaptureConfig {
        device_id: args.device,
        ..CaptureConfig::default()
    });
    if args.no_mic {
        controller = controller.without_microphone();
    }
    if let Some(path) = args.record {
        controller = controller.with_recording(path);
    }

    let handle = controller.start();

    println!("🎙️  Voice ordering session starting...");
    println!("   Speak to order; the agent hears you while unmuted.");
    println!("   Commands: mute | unmute | pickup | delivery <address> | confirm | hold | say <text> | quit");
    println!("   Press Ctrl+C to hang up");

    let mut updates = handle.subscribe_updates();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            update = updates.recv() => {
                match update {
                    Ok(update) => {
                        let done = matches!(
                            update,
                            SessionUpdate::State(SessionState::Closed)
                                | SessionUpdate::State(SessionState::Error)
                        );
                        print_update(&update);
                        if done {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        log::warn!("Dropped {} session updates", missed);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }

            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => {
                        if !dispatch_line(&handle, line.trim()) {
                            handle.close();
                        }
                    }
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        log::warn!("Could not read from stdin: {}", e);
                        stdin_open = false;
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                log::info!("Received Ctrl+C, hanging up...");
                handle.close();
            }
        }
    }

    // Give the controller a moment to release the devices and the socket.
    let mut state_rx = handle.state_receiver();
    let _ = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let state = *state_rx.borrow_and_update();
            if matches!(state, SessionState::Closed | SessionState::Error) {
                break;
            }
            if state_rx.changed().await.is_err() {
                break;
            }
        }
    })
    .await;

    println!("\n👋 Goodbye!");
    Ok(())
}

/// Applies one typed command. Returns false when the user asked to quit.
fn dispatch_line(handle: &SessionHandle, line: &str) -> bool {
    let (command, rest) = match line.split_once(' ') {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };
    match command {
        "" => {}
        "mute" => handle.mute(true),
        "unmute" => handle.mute(false),
        "pickup" => handle.select_delivery(DeliveryMethod::Pickup, None),
        "delivery" => {
            let address = if rest.is_empty() {
                None
            } else {
                Some(rest.to_string())
            };
            handle.select_delivery(DeliveryMethod::Delivery, address);
        }
        "confirm" => handle.confirm_submit(),
        "hold" => handle.cancel_auto_submit(),
        "say" => {
            if rest.is_empty() {
                println!("Usage: say <text>");
            } else {
                handle.send_text(rest);
            }
        }
        "quit" | "exit" => return false,
        _ => {
            println!("Commands: mute | unmute | pickup | delivery <address> | confirm | hold | say <text> | quit");
        }
    }
    true
}

fn print_update(update: &SessionUpdate) {
    match update {
        SessionUpdate::State(state) => println!("📟 Session: {}", state),
        SessionUpdate::Transcript(entry) => {
            let who = match entry.speaker {
                Speaker::Agent => "🗣️  agent",
                Speaker::Customer => "👤 you",
            };
            println!("{}: {}", who, entry.text);
        }
        SessionUpdate::Cart { lines, total } => {
            println!("🛒 Cart:");
            for line in lines {
                println!(
                    "   {}x {} ({}) - ${:.2}",
                    line.quantity,
                    line.item_name,
                    line.variation_label,
                    line.line_total()
                );
            }
            println!("   Total: ${:.2}", total);
        }
        SessionUpdate::Finalization(state) => println!("📋 Order status: {}", state),
        SessionUpdate::Submitted(record) => {
            println!("✅ Order sent to the kitchen!");
            println!("{}", record.summary());
        }
        SessionUpdate::Failed(message) => println!("❌ {}", message),
    }
}
