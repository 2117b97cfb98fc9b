// Command line construction
//
// argv order is fixed: binary, default arguments, target, extra arguments.
// Extra arguments can only append; they never replace a default.

use crate::tools::ToolDefinition;

/// Program plus argv for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn build(def: &ToolDefinition, target: &str, extra: &[String]) -> Self {
        let mut args = Vec::with_capacity(def.default_args.len() + 1 + extra.len());
        args.extend(def.default_args.iter().cloned());
        args.push(target.to_string());
        args.extend(extra.iter().cloned());
        Self {
            program: def.binary.clone(),
            args,
        }
    }

    /// Display form for history and audit; never fed to a shell
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(quote_arg)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn needs_quoting(arg: &str) -> bool {
    arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'')
}

/// Quote an argument only when it would otherwise read ambiguously
pub fn quote_arg(arg: &str) -> String {
    if needs_quoting(arg) {
        format!("{:?}", arg)
    } else {
        arg.to_string()
    }
}
