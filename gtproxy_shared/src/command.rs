//! Command registry.
//!
//! Chat lines beginning with the configured prefix are intercepted and
//! dispatched to registered handlers instead of being forwarded. The
//! registry is generic over the handler context so callers decide what a
//! command may touch.

use std::collections::HashMap;

use tracing::warn;

/// Handler signature. Errors are contained at the dispatch boundary.
pub type CommandHandler<C> = Box<dyn Fn(&[String], &mut C) -> anyhow::Result<()> + Send + Sync>;

pub struct CommandRegistry<C> {
    prefix: char,
    commands: HashMap<String, CommandHandler<C>>,
}

impl<C> CommandRegistry<C> {
    pub fn new(prefix: char) -> Self {
        Self {
            prefix,
            commands: HashMap::new(),
        }
    }

    pub fn prefix(&self) -> char {
        self.prefix
    }

    /// Registers a handler. Names are lowercased; re-registering replaces.
    pub fn register<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&[String], &mut C) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.commands.insert(name.to_lowercase(), Box::new(handler));
    }

    /// Registered command names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Dispatches `input`. Returns true iff a handler ran, whether or not
    /// it failed; the caller uses this to drop the line from the wire.
    pub fn execute(&self, input: &str, ctx: &mut C) -> bool {
        let Some((name, args)) = parse_command(input, self.prefix) else {
            return false;
        };
        let Some(handler) = self.commands.get(&name) else {
            return false;
        };
        if let Err(err) = handler(&args, ctx) {
            warn!(command = %name, error = %err, "command handler failed");
        }
        true
    }
}

/// Strips control bytes in `[0x00, 0x1F]`, one leading U+FEFF, and leading
/// whitespace.
pub fn normalize(input: &str) -> String {
    let cleaned: String = input.chars().filter(|c| (*c as u32) > 0x1F).collect();
    cleaned
        .strip_prefix('\u{feff}')
        .unwrap_or(&cleaned)
        .trim_start()
        .to_string()
}

/// Splits a normalized line into command name and arguments. The name is
/// the leading `[a-z0-9_-]` run of the first token, lowercased.
fn parse_command(input: &str, prefix: char) -> Option<(String, Vec<String>)> {
    let normalized = normalize(input);
    let rest = normalized.strip_prefix(prefix)?;
    let mut tokens = rest.split_whitespace();
    let first = tokens.next()?;
    let name: String = first
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect::<String>()
        .to_lowercase();
    if name.is_empty() {
        return None;
    }
    let args = tokens.map(str::to_string).collect();
    Some((name, args))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CommandRegistry<Vec<String>> {
        let mut reg = CommandRegistry::new('/');
        reg.register("warp", |args, log: &mut Vec<String>| {
            log.push(format!("warp:{}", args.join(",")));
            Ok(())
        });
        reg.register("fail", |_args, log: &mut Vec<String>| {
            log.push("fail".into());
            anyhow::bail!("boom")
        });
        reg
    }

    #[test]
    fn dispatches_with_args() {
        let reg = registry();
        let mut log = Vec::new();
        assert!(reg.execute("/warp FOO", &mut log));
        assert_eq!(log, vec!["warp:FOO"]);
    }

    #[test]
    fn control_bytes_and_bom_stripped() {
        let reg = registry();
        let mut log = Vec::new();
        assert!(reg.execute("\u{0}\u{feff}  /WARP foo bar", &mut log));
        assert_eq!(log, vec!["warp:foo,bar"]);
    }

    #[test]
    fn handler_error_still_counts_as_handled() {
        let reg = registry();
        let mut log = Vec::new();
        assert!(reg.execute("/fail", &mut log));
        assert_eq!(log, vec!["fail"]);
    }

    #[test]
    fn non_commands_fall_through() {
        let reg = registry();
        let mut log = Vec::new();
        assert!(!reg.execute("hello there", &mut log));
        assert!(!reg.execute("/unknown", &mut log));
        assert!(!reg.execute("/", &mut log));
        assert!(!reg.execute("/!!!", &mut log));
        assert!(log.is_empty());
    }

    #[test]
    fn name_keeps_leading_run_only() {
        let reg = registry();
        let mut log = Vec::new();
        // "warp!x" truncates to "warp"; the tail is discarded, not an arg.
        assert!(reg.execute("/warp!x FOO", &mut log));
        assert_eq!(log, vec!["warp:FOO"]);
    }
}
