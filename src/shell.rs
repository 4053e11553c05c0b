//! Interactive command surface: parses user commands from stdin and dispatches
//! them to the subscription manager. Argument-presence validation happens here;
//! everything stateful lives behind the [`ManagerClient`].

use color_eyre::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::broker::ConnectOptions;
use crate::subscription::{ManagerClient, SubscriptionId};

const HELP: &str = "\
commands:
  connect [host[:port]] [user] [pass]  set the broker connection
  sub <topic>                          subscribe (one process per call)
  pub <topic> <payload...>             publish a single message
  stop <id>                            stop one subscription
  disconnect                           stop everything and reset the connection
  console                              open the aggregated console surface
  status                               show connection and live subscriptions
  help                                 this text
  quit                                 exit";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShellCommand {
    Connect(ConnectOptions),
    Subscribe(String),
    Publish { topic: String, payload: String },
    Stop(u32),
    Disconnect,
    Console,
    Status,
    Help,
    Quit,
    Empty,
}

/// Parses one input line. Errors are user-facing messages.
pub fn parse(line: &str) -> Result<ShellCommand, String> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(ShellCommand::Empty);
    };

    match command {
        "connect" => {
            let mut opts = ConnectOptions::default();
            if let Some(target) = words.next() {
                let (host, port) = split_host_port(target)?;
                opts.host = Some(host);
                opts.port = port;
            }
            opts.user = words.next().map(str::to_string);
            opts.pass = words.next().map(str::to_string);
            Ok(ShellCommand::Connect(opts))
        }
        "sub" | "subscribe" => match words.next() {
            Some(topic) => Ok(ShellCommand::Subscribe(topic.to_string())),
            None => Err("usage: sub <topic>".to_string()),
        },
        "pub" | "publish" => {
            let Some(topic) = words.next() else {
                return Err("usage: pub <topic> <payload...>".to_string());
            };
            let payload = words.collect::<Vec<_>>().join(" ");
            if payload.is_empty() {
                return Err("usage: pub <topic> <payload...>".to_string());
            }
            Ok(ShellCommand::Publish {
                topic: topic.to_string(),
                payload,
            })
        }
        "stop" => match words.next().map(str::parse::<u32>) {
            Some(Ok(id)) => Ok(ShellCommand::Stop(id)),
            Some(Err(_)) => Err("stop takes a numeric subscription id".to_string()),
            None => Err("usage: stop <id>".to_string()),
        },
        "disconnect" => Ok(ShellCommand::Disconnect),
        "console" => Ok(ShellCommand::Console),
        "status" => Ok(ShellCommand::Status),
        "help" => Ok(ShellCommand::Help),
        "quit" | "exit" => Ok(ShellCommand::Quit),
        other => Err(format!("unknown command '{}', try 'help'", other)),
    }
}

fn split_host_port(target: &str) -> Result<(String, Option<u16>), String> {
    match target.split_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| format!("invalid port '{}'", port))?;
            Ok((host.to_string(), Some(port)))
        }
        None => Ok((target.to_string(), None)),
    }
}

/// Reads commands from stdin until quit or EOF.
pub async fn run(client: ManagerClient) -> Result<()> {
    println!("mqttdeck ready, type 'help' for commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let command = match parse(&line) {
            Ok(command) => command,
            Err(message) => {
                println!("{}", message);
                continue;
            }
        };
        debug!("Dispatching shell command: {:?}", command);

        match command {
            ShellCommand::Connect(opts) => match client.connect(opts).await {
                Ok(connection) => println!("connected to {}", connection),
                Err(e) => println!("connect failed: {}", e),
            },
            ShellCommand::Subscribe(topic) => match client.subscribe(&topic).await {
                Ok(id) => println!("subscribed to '{}' as {}", topic, id),
                Err(e) => println!("subscribe failed: {}", e),
            },
            ShellCommand::Publish { topic, payload } => {
                match client.publish(&topic, &payload).await {
                    Ok(()) => println!("published to '{}'", topic),
                    Err(e) => println!("publish failed: {}", e),
                }
            }
            ShellCommand::Stop(id) => match client.stop(SubscriptionId::from(id)).await {
                Ok(true) => println!("stopped {}", id),
                Ok(false) => println!("no live subscription {}", id),
                Err(e) => println!("stop failed: {}", e),
            },
            ShellCommand::Disconnect => match client.disconnect().await {
                Ok(()) => println!("disconnected"),
                Err(e) => println!("disconnect failed: {}", e),
            },
            ShellCommand::Console => match client.open_console().await {
                Ok(()) => println!("console open"),
                Err(e) => println!("console failed: {}", e),
            },
            ShellCommand::Status => match client.status().await {
                Ok(status) => {
                    println!("broker: {}", status.connection);
                    if status.subscriptions.is_empty() {
                        println!("no live subscriptions");
                    }
                    for (id, topic) in status.subscriptions {
                        println!("  {} {}", id, topic);
                    }
                }
                Err(e) => println!("status failed: {}", e),
            },
            ShellCommand::Help => println!("{}", HELP),
            ShellCommand::Quit => break,
            ShellCommand::Empty => {}
        }
    }
    Ok(())
}
