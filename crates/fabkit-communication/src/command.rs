//! Command model
//!
//! Lines sent to a device are parsed into one of three shapes:
//! - G-code (`G1 X10 Y20`, `M104 S200 T1`, `T2`, `F3000`, `M23 file.gco`)
//! - At-commands (`@pause`, `@cancel now`), host-side directives
//! - Anything else, kept as a plain line
//!
//! Every command carries an optional command type and a set of tags that
//! callers use to correlate commands with their origin.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;

/// Free-form labels attached to commands and job operations
pub type Tags = BTreeSet<String>;

static COMMAND_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:(?P<gm>[GM](?P<number>\d+))(?:\.(?P<subcode>\d+))?|T(?P<tool>\d+)|F(?P<feedrate>\d+))",
    )
    .expect("invalid regex pattern")
});

static ARGUMENT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:^|\s)(?:(?P<fkey>[XYZESPR])(?P<fval>[-+]?[0-9]*\.?[0-9]+)|(?P<ikey>[FTN])(?P<ival>[-+]?\d+))",
    )
    .expect("invalid regex pattern")
});

/// A parsed G-code line
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GcodeCommand {
    /// `G1`, `M104`, ..., or `T`/`F` for bare tool and feed-rate words
    pub code: String,
    /// Subcode after the dot (`M123.4`)
    pub subcode: Option<u32>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub e: Option<f64>,
    pub s: Option<f64>,
    pub p: Option<f64>,
    pub r: Option<f64>,
    pub f: Option<i64>,
    pub t: Option<i64>,
    pub n: Option<i64>,
    /// Tool number of a bare `T<n>` word
    pub tool: Option<u32>,
    /// Free text following the code when no known argument is present
    pub param: Option<String>,
}

impl GcodeCommand {
    /// Create a command with the given code and no arguments
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }

    /// Create a command with a free-text parameter (`M23 file.gco`)
    pub fn with_param(code: impl Into<String>, param: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            param: Some(param.into()),
            ..Self::default()
        }
    }

    /// Tool selection (`T<n>`)
    pub fn tool(tool: u32) -> Self {
        Self {
            code: "T".to_string(),
            tool: Some(tool),
            ..Self::default()
        }
    }

    /// Parse a line, returning `None` if it does not start with a G-code word
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let caps = COMMAND_REGEX.captures(line)?;
        let mut command = GcodeCommand::default();

        if let Some(gm) = caps.name("gm") {
            command.code = gm.as_str().to_string();
            command.subcode = caps
                .name("subcode")
                .and_then(|m| m.as_str().parse().ok());

            let rest = caps
                .get(0)
                .map(|m| &line[m.end()..])
                .unwrap_or_default();
            let mut matched = false;
            for arg in ARGUMENT_REGEX.captures_iter(rest) {
                matched = true;
                if let (Some(key), Some(value)) = (arg.name("fkey"), arg.name("fval")) {
                    let value = value.as_str().parse::<f64>().ok();
                    match key.as_str() {
                        "X" => command.x = value,
                        "Y" => command.y = value,
                        "Z" => command.z = value,
                        "E" => command.e = value,
                        "S" => command.s = value,
                        "P" => command.p = value,
                        _ => command.r = value,
                    }
                } else if let (Some(key), Some(value)) = (arg.name("ikey"), arg.name("ival")) {
                    let value = value.as_str().parse::<i64>().ok();
                    match key.as_str() {
                        "F" => command.f = value,
                        "T" => command.t = value,
                        _ => command.n = value,
                    }
                }
            }

            if !matched {
                let param = rest.trim();
                if !param.is_empty() {
                    command.param = Some(param.to_string());
                }
            }
        } else if let Some(tool) = caps.name("tool") {
            command.code = "T".to_string();
            command.tool = tool.as_str().parse().ok();
        } else if let Some(feedrate) = caps.name("feedrate") {
            command.code = "F".to_string();
            command.f = feedrate.as_str().parse().ok();
        }

        Some(command)
    }

    /// `M105`
    pub fn is_get_temperature(&self) -> bool {
        self.code == "M105"
    }

    /// `M104`, `M109`, `M140` or `M190`
    pub fn is_set_temperature(&self) -> bool {
        matches!(self.code.as_str(), "M104" | "M109" | "M140" | "M190")
    }

    /// Bare `T<n>`
    pub fn is_select_tool(&self) -> bool {
        self.code == "T"
    }
}

impl fmt::Display for GcodeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code.as_str(), self.tool, self.f) {
            ("T", Some(tool), _) => return write!(f, "T{}", tool),
            ("F", _, Some(feedrate)) => return write!(f, "F{}", feedrate),
            _ => {}
        }

        write!(f, "{}", self.code)?;
        if let Some(subcode) = self.subcode {
            write!(f, ".{}", subcode)?;
        }

        let floats = [
            ('X', self.x),
            ('Y', self.y),
            ('Z', self.z),
            ('E', self.e),
            ('S', self.s),
            ('P', self.p),
            ('R', self.r),
        ];
        for (letter, value) in floats {
            if let Some(value) = value {
                write!(f, " {}{}", letter, format_number(value))?;
            }
        }

        let ints = [('F', self.f), ('T', self.t), ('N', self.n)];
        for (letter, value) in ints {
            if let Some(value) = value {
                write!(f, " {}{}", letter, value)?;
            }
        }

        if let Some(param) = &self.param {
            write!(f, " {}", param)?;
        }
        Ok(())
    }
}

/// Shortest decimal rendering with at most four fractional digits
fn format_number(value: f64) -> String {
    let formatted = format!("{:.4}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Shape of a command
#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    /// G-code line
    Gcode(GcodeCommand),
    /// Host directive starting with `@`
    At {
        /// Directive name without the `@`
        command: String,
        /// Remainder of the line
        parameters: String,
    },
    /// Anything else
    Plain,
}

/// A single line to be sent to a device
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// The line as it will be sent
    pub line: String,
    /// Parsed shape
    pub kind: CommandKind,
    /// Optional command type used to deduplicate or correlate commands
    pub command_type: Option<String>,
    /// Tags
    pub tags: Tags,
}

impl Command {
    /// Parse a line
    pub fn from_line(line: &str) -> Self {
        let line = line.trim();
        let kind = if let Some(gcode) = GcodeCommand::parse(line) {
            CommandKind::Gcode(gcode)
        } else if let Some(rest) = line.strip_prefix('@') {
            let (command, parameters) = match rest.split_once(char::is_whitespace) {
                Some((command, parameters)) => (command, parameters.trim()),
                None => (rest, ""),
            };
            CommandKind::At {
                command: command.to_string(),
                parameters: parameters.to_string(),
            }
        } else {
            CommandKind::Plain
        };

        Self {
            line: line.to_string(),
            kind,
            command_type: None,
            tags: Tags::new(),
        }
    }

    /// Wrap a built G-code command
    pub fn gcode(command: GcodeCommand) -> Self {
        Self {
            line: command.to_string(),
            kind: CommandKind::Gcode(command),
            command_type: None,
            tags: Tags::new(),
        }
    }

    /// Set the command type
    pub fn with_type(mut self, command_type: impl Into<String>) -> Self {
        self.command_type = Some(command_type.into());
        self
    }

    /// Set the tags
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    /// The G-code, if this is one
    pub fn as_gcode(&self) -> Option<&GcodeCommand> {
        match &self.kind {
            CommandKind::Gcode(gcode) => Some(gcode),
            _ => None,
        }
    }

    /// The G-code word (`G1`, `M105`, `T`), if this is G-code
    pub fn code(&self) -> Option<&str> {
        self.as_gcode().map(|gcode| gcode.code.as_str())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line)
    }
}

impl From<GcodeCommand> for Command {
    fn from(command: GcodeCommand) -> Self {
        Command::gcode(command)
    }
}

/// Remove a trailing `;` comment, honouring `\;` escapes, and trim the result
pub fn strip_comment(line: &str) -> String {
    if !line.contains(';') {
        return line.trim().to_string();
    }

    let mut result = String::with_capacity(line.len());
    let mut escaped = false;
    for c in line.chars() {
        if c == ';' && !escaped {
            break;
        }
        result.push(c);
        escaped = c == '\\' && !escaped;
    }
    result.trim().to_string()
}
