//! Text the server puts on the wire.

pub const LINE_END: &str = "\r\n";

/// Line a client sends to leave.
pub const QUIT: &str = "quit";

pub const SERVER_FULL: &str = "Server is full. Please try again later.";
pub const GOODBYE: &str = "Goodbye!";
pub const SHUTDOWN: &str = "[System] Server is shutting down.";

pub fn is_quit(line: &str) -> bool {
    line == QUIT
}

pub fn chat_line(name: &str, text: &str) -> String {
    format!("[{}]: {}", name, text)
}

pub fn welcome(name: &str, online: usize) -> String {
    [
        "=== Welcome to the chat server! ===".to_string(),
        format!("You are {}.", name),
        format!("Users online: {}", online),
        format!("Type '{}' to leave.", QUIT),
        "===================================".to_string(),
    ]
    .join(LINE_END)
}

pub fn joined(name: &str) -> String {
    format!("[System] {} joined the chat.", name)
}

pub fn left(name: &str) -> String {
    format!("[System] {} left the chat.", name)
}

pub fn truncated(limit: usize) -> String {
    format!("[System] Your line was longer than {} bytes and was cut.", limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quit_is_exact_and_case_sensitive() {
        assert!(is_quit("quit"));
        assert!(!is_quit("QUIT"));
        assert!(!is_quit("quit "));
        assert!(!is_quit(" quit"));
        assert!(!is_quit("quitting"));
    }

    #[test]
    fn chat_line_prefixes_sender() {
        assert_eq!(chat_line("Player_0", "hello"), "[Player_0]: hello");
    }

    #[test]
    fn welcome_spans_lines() {
        let banner = welcome("Player_3", 4);
        let lines: Vec<&str> = banner.split(LINE_END).collect();

        assert_eq!(lines.len(), 5);
        assert_eq!(lines[1], "You are Player_3.");
        assert_eq!(lines[2], "Users online: 4");
    }
}
