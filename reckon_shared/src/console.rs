//! Console system.
//!
//! Typed console variables (cvars) plus registered commands, used by the
//! server and viewer binaries for runtime tuning of the DR thresholds and
//! smoothing windows without a restart.
//!
//! # Usage
//! ```ignore
//! let mut console = Console::new();
//! console.register_cvar("dr_heartbeat", CvarValue::Float(5.0), "Max quiet time", CvarFlags::NONE);
//! console.exec("dr_heartbeat 2.5")?;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{bail, Context};

/// Console variable value.
#[derive(Debug, Clone, PartialEq)]
pub enum CvarValue {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
}

impl CvarValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            CvarValue::Int(v) => Some(*v),
            CvarValue::Float(v) => Some(*v as i64),
            CvarValue::Bool(v) => Some(if *v { 1 } else { 0 }),
            CvarValue::String(s) => s.parse().ok(),
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            CvarValue::Float(v) => Some(*v),
            CvarValue::Int(v) => Some(*v as f64),
            CvarValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            CvarValue::Bool(v) => *v,
            CvarValue::Int(v) => *v != 0,
            CvarValue::Float(v) => *v != 0.0,
            CvarValue::String(s) => !s.is_empty() && s != "0" && s.to_lowercase() != "false",
        }
    }

    pub fn as_string(&self) -> String {
        match self {
            CvarValue::String(s) => s.clone(),
            CvarValue::Int(v) => v.to_string(),
            CvarValue::Float(v) => v.to_string(),
            CvarValue::Bool(v) => v.to_string(),
        }
    }
}

impl std::fmt::Display for CvarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CvarValue::Int(v) => write!(f, "{}", v),
            CvarValue::Float(v) => write!(f, "{}", v),
            CvarValue::String(v) => write!(f, "\"{}\"", v),
            CvarValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

/// Console variable metadata.
#[derive(Debug, Clone)]
pub struct Cvar {
    pub name: String,
    pub value: CvarValue,
    pub default: CvarValue,
    pub description: String,
    pub flags: CvarFlags,
}

bitflags::bitflags! {
    /// Cvar flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CvarFlags: u32 {
        const NONE = 0;
        /// Saved to config.
        const ARCHIVE = 1 << 0;
        /// Replicated server -> client.
        const REPLICATED = 1 << 1;
        /// Only meaningful on the server.
        const SERVER_ONLY = 1 << 2;
    }
}

impl Default for CvarFlags {
    fn default() -> Self {
        Self::NONE
    }
}

/// Command handler function type.
pub type CommandHandler =
    Box<dyn Fn(&[&str], &mut ConsoleContext) -> anyhow::Result<()> + Send + Sync>;

/// Context passed to command handlers.
pub struct ConsoleContext {
    /// Output buffer for command responses.
    pub output: Vec<String>,
    /// Reference to cvars (for commands that need to read/write them).
    pub cvars: Arc<RwLock<HashMap<String, Cvar>>>,
}

impl ConsoleContext {
    pub fn print(&mut self, msg: impl Into<String>) {
        self.output.push(msg.into());
    }

    pub fn get_cvar(&self, name: &str) -> Option<CvarValue> {
        self.cvars.read().ok()?.get(name).map(|c| c.value.clone())
    }

    pub fn set_cvar(&self, name: &str, value: CvarValue) -> anyhow::Result<()> {
        let mut cvars = self
            .cvars
            .write()
            .map_err(|_| anyhow::anyhow!("lock poisoned"))?;
        if let Some(cvar) = cvars.get_mut(name) {
            cvar.value = value;
            Ok(())
        } else {
            bail!("unknown cvar: {}", name);
        }
    }
}

/// The console.
pub struct Console {
    cvars: Arc<RwLock<HashMap<String, Cvar>>>,
    commands: HashMap<String, CommandHandler>,
    history: Vec<String>,
    max_history: usize,
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    pub fn new() -> Self {
        let mut console = Self {
            cvars: Arc::new(RwLock::new(HashMap::new())),
            commands: HashMap::new(),
            history: Vec::new(),
            max_history: 100,
        };
        console.register_builtin_commands();
        console
    }

    fn register_builtin_commands(&mut self) {
        self.register_command("echo", |args, ctx| {
            ctx.print(args.join(" "));
            Ok(())
        });

        self.register_command("cvarlist", |_args, ctx| {
            let cvars = ctx.cvars.read().map_err(|_| anyhow::anyhow!("lock"))?;
            let mut lines: Vec<String> = cvars
                .values()
                .map(|cvar| {
                    format!(
                        "  {} = {} (default: {}) - {}",
                        cvar.name, cvar.value, cvar.default, cvar.description
                    )
                })
                .collect();
            lines.sort();
            drop(cvars);
            for line in lines {
                ctx.print(line);
            }
            Ok(())
        });

        // set <cvar> <value>
        self.register_command("set", |args, ctx| {
            if args.len() < 2 {
                bail!("usage: set <cvar> <value>");
            }
            let name = args[0];
            let value_str = args[1..].join(" ");
            let value = parse_value(&value_str);
            let echo = value.clone();
            ctx.set_cvar(name, value)?;
            ctx.print(format!("{} = {}", name, echo));
            Ok(())
        });

        // reset <cvar>
        self.register_command("reset", |args, ctx| {
            if args.len() != 1 {
                bail!("usage: reset <cvar>");
            }
            let mut cvars = ctx.cvars.write().map_err(|_| anyhow::anyhow!("lock"))?;
            let Some(cvar) = cvars.get_mut(args[0]) else {
                bail!("unknown cvar: {}", args[0]);
            };
            cvar.value = cvar.default.clone();
            let msg = format!("{} = {}", cvar.name, cvar.value);
            drop(cvars);
            ctx.print(msg);
            Ok(())
        });
    }

    /// Registers a console variable.
    pub fn register_cvar(
        &mut self,
        name: &str,
        default: CvarValue,
        description: &str,
        flags: CvarFlags,
    ) {
        let cvar = Cvar {
            name: name.to_string(),
            value: default.clone(),
            default,
            description: description.to_string(),
            flags,
        };
        if let Ok(mut cvars) = self.cvars.write() {
            cvars.insert(name.to_string(), cvar);
        }
    }

    /// Registers a command.
    pub fn register_command<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&[&str], &mut ConsoleContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.commands.insert(name.to_string(), Box::new(handler));
    }

    /// Executes a console command line.
    pub fn exec(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") {
            return Ok(Vec::new());
        }

        self.history.push(line.to_string());
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }

        let tokens = tokenize(line);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let cmd_name = &tokens[0];
        let args: Vec<&str> = tokens[1..].iter().map(|s| s.as_str()).collect();

        let mut ctx = ConsoleContext {
            output: Vec::new(),
            cvars: Arc::clone(&self.cvars),
        };

        // Bare cvar name queries it; cvar name plus a value sets it.
        if !self.commands.contains_key(cmd_name.as_str()) {
            let known = self
                .cvars
                .read()
                .ok()
                .map(|cvars| cvars.contains_key(cmd_name.as_str()))
                .unwrap_or(false);
            if known {
                if args.is_empty() {
                    if let Ok(cvars) = self.cvars.read() {
                        if let Some(cvar) = cvars.get(cmd_name.as_str()) {
                            ctx.print(format!(
                                "{} = {} (default: {})",
                                cvar.name, cvar.value, cvar.default
                            ));
                        }
                    }
                    return Ok(ctx.output);
                }
                return self.exec(&format!("set {} {}", cmd_name, args.join(" ")));
            }
        }

        if let Some(handler) = self.commands.get(cmd_name.as_str()) {
            handler(&args, &mut ctx).with_context(|| format!("command '{}'", cmd_name))?;
        } else {
            ctx.print(format!("Unknown command: {}", cmd_name));
        }

        Ok(ctx.output)
    }

    /// Gets a cvar value.
    pub fn get_cvar(&self, name: &str) -> Option<CvarValue> {
        self.cvars.read().ok()?.get(name).map(|c| c.value.clone())
    }

    /// Gets a cvar as f32, falling back when unset or mistyped.
    pub fn cvar_f32(&self, name: &str, fallback: f32) -> f32 {
        self.get_cvar(name)
            .and_then(|v| v.as_float())
            .map(|v| v as f32)
            .unwrap_or(fallback)
    }

    /// Sets a cvar value.
    pub fn set_cvar(&self, name: &str, value: CvarValue) -> anyhow::Result<()> {
        let mut cvars = self.cvars.write().map_err(|_| anyhow::anyhow!("lock"))?;
        if let Some(cvar) = cvars.get_mut(name) {
            cvar.value = value;
            Ok(())
        } else {
            bail!("unknown cvar: {}", name);
        }
    }

    /// Gets command history.
    pub fn history(&self) -> &[String] {
        &self.history
    }
}

/// Guesses the typed value of a console argument.
fn parse_value(s: &str) -> CvarValue {
    if let Ok(v) = s.parse::<i64>() {
        CvarValue::Int(v)
    } else if let Ok(v) = s.parse::<f64>() {
        CvarValue::Float(v)
    } else if s == "true" {
        CvarValue::Bool(true)
    } else if s == "false" {
        CvarValue::Bool(false)
    } else {
        CvarValue::String(s.trim_matches('"').to_string())
    }
}

/// Splits a command line into tokens, respecting double quotes.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in line.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ' ' | '\t' if !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cvar_set_and_query() {
        let mut console = Console::new();
        console.register_cvar(
            "dr_heartbeat",
            CvarValue::Float(5.0),
            "Max quiet time",
            CvarFlags::SERVER_ONLY,
        );

        console.exec("dr_heartbeat 2.5").unwrap();
        assert_eq!(console.cvar_f32("dr_heartbeat", 0.0), 2.5);

        let out = console.exec("dr_heartbeat").unwrap();
        assert!(out[0].contains("2.5"));
    }

    #[test]
    fn reset_restores_default() {
        let mut console = Console::new();
        console.register_cvar("x", CvarValue::Int(7), "", CvarFlags::NONE);
        console.exec("set x 99").unwrap();
        console.exec("reset x").unwrap();
        assert_eq!(console.get_cvar("x"), Some(CvarValue::Int(7)));
    }

    #[test]
    fn tokenize_respects_quotes() {
        let tokens = tokenize(r#"echo "hello world" test"#);
        assert_eq!(tokens, vec!["echo", "hello world", "test"]);
    }

    #[test]
    fn unknown_command_reports() {
        let mut console = Console::new();
        let out = console.exec("frobnicate").unwrap();
        assert!(out[0].contains("Unknown command"));
    }
}
