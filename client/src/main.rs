use clap::Parser;
use client::events::{ChannelDispatcher, ClientEvent};
use client::input::{parse_command, Command};
use client::network::ChatClient;
use client::rendering::{render_banner, render_event};
use log::{info, warn};
use shared::{DEFAULT_CLIENT_HOST, DEFAULT_PORT};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Chat server host to connect to
    #[arg(short = 'H', long, default_value = DEFAULT_CLIENT_HOST)]
    host: String,

    /// Chat server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Attach sender IP, id and timestamp to every message
    #[arg(short, long)]
    details: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let (dispatcher, mut events) = ChannelDispatcher::new();
    let client = ChatClient::new(dispatcher);

    info!("Connecting to: {}:{}", args.host, args.port);
    println!("{}", render_banner(client.client_id(), &args.host, args.port));
    client.connect_to_server(&args.host, args.port);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    // Events are drained here, on the main task, never on the network tasks
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                println!("{}", render_event(&event));

                // Input ended while the connection was still being set up
                if event == ClientEvent::Connected && !stdin_open {
                    client.disconnect_from_server().await;
                }

                let lost = matches!(event, ClientEvent::Disconnected)
                    || (matches!(event, ClientEvent::ErrorOccurred(_))
                        && !client.is_connected()
                        && !client.is_connecting());
                if lost {
                    break;
                }
            },

            line = stdin.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => match parse_command(&line, args.details) {
                        Command::Send(text) => {
                            let _ = client.send_message(&text).await;
                        }
                        Command::SendWithDetails(text) => {
                            let _ = client.send_message_with_details(&text).await;
                        }
                        Command::Quit => client.disconnect_from_server().await,
                        Command::Empty => {}
                    },
                    Ok(None) => {
                        stdin_open = false;
                        client.disconnect_from_server().await;
                    }
                    Err(e) => {
                        warn!("Error reading input: {}", e);
                        stdin_open = false;
                        client.disconnect_from_server().await;
                    }
                }

                if !stdin_open && !client.is_connected() && !client.is_connecting() {
                    break;
                }
            },
        }
    }

    Ok(())
}
