//! CLI Tool Registry
//!
//! Known local AI command-line tools, what each one supports in batch mode,
//! and detection on `PATH` plus well-known install directories.

use std::path::PathBuf;

/// What a tool supports when run non-interactively
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ToolCapabilities {
    /// Its own side-effecting tools (shell, file edits, web) can be turned off
    pub can_disable_side_effects: bool,
    pub reads_prompt_from_stdin: bool,
    pub emits_json: bool,
    pub single_invocation: bool,
}

impl ToolCapabilities {
    pub const FULL: ToolCapabilities = ToolCapabilities {
        can_disable_side_effects: true,
        reads_prompt_from_stdin: true,
        emits_json: true,
        single_invocation: true,
    };

    /// A tool is usable only if it supports every batch-mode requirement
    pub fn is_capable(&self) -> bool {
        self.can_disable_side_effects
            && self.reads_prompt_from_stdin
            && self.emits_json
            && self.single_invocation
    }
}

/// Static description of a known tool
#[derive(Debug, Clone, Copy)]
pub struct CliToolSpec {
    pub name: &'static str,
    pub binary_names: &'static [&'static str],
    pub capabilities: ToolCapabilities,
    /// Arguments for a one-shot, tool-less, JSON-emitting run reading stdin
    pub batch_args: &'static [&'static str],
}

pub const KNOWN_TOOLS: &[CliToolSpec] = &[
    CliToolSpec {
        name: "claude",
        binary_names: &["claude", "claude.cmd", "claude.exe"],
        capabilities: ToolCapabilities::FULL,
        batch_args: &[
            "-p",
            "--output-format",
            "json",
            "--no-session-persistence",
            "--strict-mcp-config",
            "--disallowedTools",
            "Bash,Edit,Write,MultiEdit,NotebookEdit,WebFetch,WebSearch,Task",
            "--max-turns",
            "1",
        ],
    },
    CliToolSpec {
        name: "codex",
        binary_names: &["codex", "codex.cmd", "codex.exe"],
        capabilities: ToolCapabilities::FULL,
        batch_args: &[
            "exec",
            "--json",
            "--skip-git-repo-check",
            "--sandbox",
            "read-only",
            "-",
        ],
    },
    // Tool use cannot be switched off in batch mode, so it is never selected.
    CliToolSpec {
        name: "gemini",
        binary_names: &["gemini", "gemini.cmd", "gemini.exe"],
        capabilities: ToolCapabilities {
            can_disable_side_effects: false,
            reads_prompt_from_stdin: true,
            emits_json: true,
            single_invocation: true,
        },
        batch_args: &["--output-format", "json"],
    },
];

/// Look up a registry entry by name
pub fn find_spec(name: &str) -> Option<&'static CliToolSpec> {
    KNOWN_TOOLS.iter().find(|t| t.name == name)
}

/// A tool found on this machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedTool {
    pub name: String,
    pub path: PathBuf,
    pub capabilities: ToolCapabilities,
    pub args: Vec<String>,
}

impl DetectedTool {
    pub fn from_spec(spec: &CliToolSpec, path: PathBuf) -> Self {
        Self {
            name: spec.name.to_string(),
            path,
            capabilities: spec.capabilities,
            args: spec.batch_args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Source of installed CLI tools
pub trait CliToolProbe: Send + Sync {
    fn detect(&self) -> Vec<DetectedTool>;
}

/// Probe that searches `PATH` and common install directories
#[derive(Debug, Clone)]
pub struct PathProbe {
    fallback_dirs: Vec<PathBuf>,
}

impl PathProbe {
    pub fn new() -> Self {
        let mut fallback_dirs = Vec::new();
        if let Some(home) = dirs::home_dir() {
            fallback_dirs.push(home.join(".claude").join("local"));
            fallback_dirs.push(home.join(".local").join("bin"));
            fallback_dirs.push(home.join(".npm-global").join("bin"));
            fallback_dirs.push(home.join(".bun").join("bin"));
            fallback_dirs.push(home.join(".volta").join("bin"));
        }
        fallback_dirs.push(PathBuf::from("/usr/local/bin"));
        fallback_dirs.push(PathBuf::from("/opt/homebrew/bin"));
        Self { fallback_dirs }
    }

    pub fn with_fallback_dirs(fallback_dirs: Vec<PathBuf>) -> Self {
        Self { fallback_dirs }
    }
}

impl Default for PathProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl CliToolProbe for PathProbe {
    fn detect(&self) -> Vec<DetectedTool> {
        KNOWN_TOOLS
            .iter()
            .filter_map(|spec| {
                find_binary(spec.binary_names, &self.fallback_dirs)
                    .map(|path| DetectedTool::from_spec(spec, path))
            })
            .collect()
    }
}

/// Probe returning a fixed tool set (explicit tool paths, tests)
#[derive(Debug, Clone, Default)]
pub struct FixedToolProbe {
    tools: Vec<DetectedTool>,
}

impl FixedToolProbe {
    pub fn new(tools: Vec<DetectedTool>) -> Self {
        Self { tools }
    }
}

impl CliToolProbe for FixedToolProbe {
    fn detect(&self) -> Vec<DetectedTool> {
        self.tools.clone()
    }
}

/// Find a binary by trying each name on PATH, then in the fallback directories.
fn find_binary(names: &[&str], fallback_dirs: &[PathBuf]) -> Option<PathBuf> {
    for name in names {
        if let Some(path) = which_binary(name) {
            return Some(path);
        }
    }

    for dir in fallback_dirs {
        for name in names {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    None
}

fn which_binary(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
