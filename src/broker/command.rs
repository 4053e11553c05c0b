use tracing::debug;

use super::connection::BrokerConnection;

/// Which external client binary an invocation targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientRole {
    /// Streams one message per line to stdout until terminated.
    Subscribe,
    /// Sends a single message and exits.
    Publish,
}

/// Builds the full argv for an external client invocation.
///
/// Output order is stable: binary, `-h host`, `-p port`, optional `-u user`,
/// optional `-P pass`, pass-through options in given order, role arguments in
/// given order. Pass-through options are opaque and not validated.
pub fn build_command(
    binary: &str,
    connection: &BrokerConnection,
    client_opts: &[String],
    role_args: &[String],
) -> Vec<String> {
    let mut argv = Vec::with_capacity(5 + 4 + client_opts.len() + role_args.len());
    argv.push(binary.to_string());
    argv.push("-h".to_string());
    argv.push(connection.host.clone());
    argv.push("-p".to_string());
    argv.push(connection.port.to_string());
    if let Some(user) = &connection.user {
        argv.push("-u".to_string());
        argv.push(user.clone());
    }
    if let Some(pass) = &connection.pass {
        argv.push("-P".to_string());
        argv.push(pass.clone());
    }
    argv.extend(client_opts.iter().cloned());
    argv.extend(role_args.iter().cloned());

    debug!("Built client command: {:?}", argv);
    argv
}

/// Role arguments for a subscription: `-t <topic>`.
pub fn subscribe_args(topic: &str) -> Vec<String> {
    vec!["-t".to_string(), topic.to_string()]
}

/// Role arguments for a publish: `-t <topic> -m <payload>`.
pub fn publish_args(topic: &str, payload: &str) -> Vec<String> {
    vec![
        "-t".to_string(),
        topic.to_string(),
        "-m".to_string(),
        payload.to_string(),
    ]
}
