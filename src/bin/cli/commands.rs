use stomp_stream::{Connection, Frame, HeaderName};

/// Result of executing a command
pub enum CommandResult {
    /// Command executed successfully
    Ok,
    /// Command requests exit
    Quit,
    /// Informational output for the user
    Info(String),
    /// Error executing command
    Error(String),
}

/// Subscriptions opened during this session, by subscription id.
#[derive(Default)]
pub struct Subscriptions {
    next_id: u64,
    active: Vec<(String, String)>,
}

impl Subscriptions {
    /// Send SUBSCRIBE for `destination` under a fresh id and remember it.
    pub async fn subscribe(
        &mut self,
        conn: &Connection,
        destination: &str,
    ) -> Result<String, String> {
        self.next_id += 1;
        let id = format!("sub-{}", self.next_id);
        conn.send(Frame::subscribe(destination, id.as_str()))
            .await
            .map_err(|e| format!("Failed to subscribe to '{}': {}", destination, e))?;
        self.active.push((id.clone(), destination.to_string()));
        Ok(id)
    }

    /// Send UNSUBSCRIBE for `id`. Returns the destination it was bound to.
    pub async fn unsubscribe(&mut self, conn: &Connection, id: &str) -> Result<String, String> {
        let Some(pos) = self.active.iter().position(|(sub_id, _)| sub_id == id) else {
            return Err(format!("No subscription with id '{}'", id));
        };
        conn.send(Frame::unsubscribe(id))
            .await
            .map_err(|e| format!("Failed to unsubscribe '{}': {}", id, e))?;
        let (_, destination) = self.active.remove(pos);
        Ok(destination)
    }

    /// Destination of the subscription `id`, if it is still active.
    pub fn destination(&self, id: &str) -> Option<&str> {
        self.active
            .iter()
            .find(|(sub_id, _)| sub_id == id)
            .map(|(_, dest)| dest.as_str())
    }

    pub fn list(&self) -> String {
        if self.active.is_empty() {
            return "No active subscriptions".to_string();
        }
        self.active
            .iter()
            .map(|(id, dest)| format!("  {} -> {}", id, dest))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Parse and execute a command
pub async fn execute_command(
    line: &str,
    conn: &Connection,
    subs: &mut Subscriptions,
) -> CommandResult {
    let parts: Vec<&str> = line.trim().splitn(3, ' ').collect();
    if parts.is_empty() || parts[0].is_empty() {
        return CommandResult::Ok;
    }

    match parts[0] {
        "quit" | "exit" | "q" => CommandResult::Quit,

        "send" => {
            if parts.len() < 3 {
                return CommandResult::Error("Usage: send <destination> <message>".to_string());
            }
            let frame = Frame::send(parts[1], parts[2].as_bytes().to_vec())
                .header(HeaderName::ContentType, "text/plain");
            match conn.send(frame).await {
                Ok(()) => CommandResult::Ok,
                Err(e) => CommandResult::Error(format!("Send error: {}", e)),
            }
        }

        "sub" | "subscribe" => {
            if parts.len() < 2 {
                return CommandResult::Error("Usage: sub <destination>".to_string());
            }
            match subs.subscribe(conn, parts[1]).await {
                Ok(id) => {
                    CommandResult::Info(format!("Subscribed to: {} (id {})", parts[1], id))
                }
                Err(e) => CommandResult::Error(e),
            }
        }

        "unsub" | "unsubscribe" => {
            if parts.len() < 2 {
                return CommandResult::Error("Usage: unsub <id>".to_string());
            }
            match subs.unsubscribe(conn, parts[1]).await {
                Ok(dest) => CommandResult::Info(format!("Unsubscribed from: {}", dest)),
                Err(e) => CommandResult::Error(e),
            }
        }

        "subs" => CommandResult::Info(subs.list()),

        "state" => CommandResult::Info(format!("State: {}", conn.state())),

        "help" | "?" => {
            print_help();
            CommandResult::Ok
        }

        _ => CommandResult::Error(format!(
            "Unknown command: {}. Type 'help' for commands.",
            parts[0]
        )),
    }
}

/// Print help text
pub fn print_help() {
    println!("Commands:");
    println!("  send <destination> <message>  - Send a message");
    println!("  sub <destination>             - Subscribe to a destination");
    println!("  unsub <id>                    - Cancel a subscription");
    println!("  subs                          - List active subscriptions");
    println!("  state                         - Show the connection state");
    println!("  quit                          - Disconnect and exit");
}
