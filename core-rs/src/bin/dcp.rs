//! DCP - docker-compose port checker CLI
//!
//! Reports which host ports a compose project publishes and which of them
//! are already taken, and can rewrite the compose/.env files to move
//! conflicting ports onto free ones.

use anyhow::Context;
use clap::Parser;
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use dcp_core::{
    build_plan, classify, commit, exit_code, extract, has_conflicts, referenced_variables,
    render, report, summarize, ComposeFile, DcpError, EnvironmentInfo, EnvironmentMap,
    ExitPolicy, PortInventoryEntry, PortRange, PromptReply, Prompter, SystemProbe,
    EXIT_HARD_ERROR,
};

#[derive(Parser)]
#[command(name = "dcp")]
#[command(version = dcp_core::VERSION)]
#[command(about = "Check which ports of a docker-compose file are already in use", long_about = None)]
struct Cli {
    /// Path to the docker-compose file
    #[arg(short = 'f', long = "file", default_value = dcp_core::DEFAULT_COMPOSE_FILE)]
    file: PathBuf,

    /// Path to the .env file (auto-detected next to the compose file)
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Output results as JSON
    #[arg(long)]
    json: bool,

    /// Do not exit with an error when ports are in use
    #[arg(long)]
    warn_only: bool,

    /// Exit with code 1 when any port is in use
    #[arg(long)]
    exit_on_used: bool,

    /// Automatically reassign conflicting ports
    #[arg(long)]
    fix: bool,

    /// Interactively reassign conflicting ports
    #[arg(long)]
    fix_interactive: bool,

    /// Port range for automatic conflict resolution
    #[arg(long, default_value = "8000-65535")]
    port_range: String,

    /// Copy files to <path>.backup before rewriting them
    #[arg(long)]
    backup: bool,

    /// Enable verbose logging
    #[arg(long, short = 'v')]
    verbose: bool,
}

/// Interactive decision source reading operator replies from stdin
struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn choose(&mut self, entry: &PortInventoryEntry, suggestion: u16) -> PromptReply {
        let binding = &entry.binding;
        println!(
            "\nService '{}' port {}/{} needs a new port",
            binding.service, binding.host_port, binding.protocol
        );
        if let Some(process) = &entry.occupancy.process {
            let name = process.name.as_deref().unwrap_or("unknown");
            println!("  used by: {} (pid {})", name, process.pid);
        }
        if let Some(container) = &entry.occupancy.container {
            println!("  used by container: {} ({})", container.name, container.image);
        }

        let stdin = io::stdin();
        loop {
            print!("  new port [{}] (number / 'auto' / 'skip'): ", suggestion);
            let _ = io::stdout().flush();

            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => return PromptReply::Skip, // EOF
                Ok(_) => {}
            }

            let answer = line.trim();
            if answer.is_empty() || answer.eq_ignore_ascii_case("auto") {
                return PromptReply::Auto;
            }
            if answer.eq_ignore_ascii_case("skip") {
                return PromptReply::Skip;
            }
            match answer.parse::<u16>() {
                Ok(port) if port > 0 => return PromptReply::Port(port),
                _ => println!("  enter a port number, 'auto' or 'skip'"),
            }
        }
    }

    fn reject(&mut self, port: u16, reason: &str) {
        println!("  port {} rejected: {}", port, reason);
    }
}

/// Environment file state for one run
struct EnvState {
    map: EnvironmentMap,
    /// Raw text, present when a file was actually read
    text: Option<String>,
    /// Where reassigned variables get written
    write_path: PathBuf,
    /// Path shown in reports, only when a file was read
    read_path: Option<PathBuf>,
}

/// Load the explicit env file, or auto-detect one next to the compose file
fn load_env(cli: &Cli, compose_path: &Path) -> Result<EnvState, DcpError> {
    let sibling = compose_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(dcp_core::DEFAULT_ENV_FILE);

    let path = match &cli.env_file {
        Some(path) => {
            // Explicitly named files must be readable
            let text = fs::read_to_string(path).map_err(|e| {
                DcpError::EnvFile(format!("Failed to read '{}': {}", path.display(), e))
            })?;
            return Ok(EnvState {
                map: EnvironmentMap::parse(&text),
                text: Some(text),
                write_path: path.clone(),
                read_path: Some(path.clone()),
            });
        }
        None => sibling,
    };

    if path.exists() {
        let text = fs::read_to_string(&path).map_err(|e| {
            DcpError::EnvFile(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        Ok(EnvState {
            map: EnvironmentMap::parse(&text),
            text: Some(text),
            write_path: path.clone(),
            read_path: Some(path),
        })
    } else {
        // A missing auto-detected file is not an error
        Ok(EnvState {
            map: EnvironmentMap::default(),
            text: None,
            write_path: path,
            read_path: None,
        })
    }
}

fn run(cli: &Cli) -> anyhow::Result<i32> {
    let range: PortRange = cli
        .port_range
        .parse()
        .with_context(|| format!("invalid --port-range '{}'", cli.port_range))?;
    let compose = ComposeFile::load(&cli.file)?;
    let detected: BTreeSet<String> = referenced_variables(&compose)?;
    let env_state = load_env(cli, compose.path())?;

    if !cli.json && !detected.is_empty() {
        let names: Vec<&str> = detected.iter().map(String::as_str).collect();
        println!("Port variables referenced: {}", names.join(", "));
        if let Some(path) = &env_state.read_path {
            println!("Environment file: {}", path.display());
        }
        let unset: Vec<&str> = detected
            .iter()
            .filter(|name| !env_state.map.contains(name))
            .map(String::as_str)
            .collect();
        if !unset.is_empty() {
            println!("Not set in environment (defaults apply): {}", unset.join(", "));
        }
        println!();
    }

    let specs = extract(&compose, &env_state.map)?;
    let probe = SystemProbe::new();
    let mut entries = classify(&specs, &probe);

    let mut env_info = EnvironmentInfo {
        env_file_path: env_state.read_path.clone(),
        detected: detected.iter().cloned().collect(),
        loaded: env_state.map.len(),
    };

    let fixing = cli.fix || cli.fix_interactive;
    let mut specs = specs;
    let mut write_error = false;

    if fixing && has_conflicts(&entries) {
        let mut prompter = StdinPrompter;
        let prompter_opt: Option<&mut dyn Prompter> = if cli.fix_interactive {
            Some(&mut prompter)
        } else {
            None
        };

        let plan = build_plan(&entries, &range, &probe, prompter_opt);
        let rendered = render(&plan, compose.text(), env_state.text.as_deref())?;
        let reports = commit(
            &rendered,
            compose.path(),
            Some(&env_state.write_path),
            cli.backup,
        );
        write_error = reports.iter().any(|r| !r.succeeded());

        let changes = report::render_changes(&plan, &reports);
        if cli.json {
            eprintln!("{}", changes);
        } else {
            println!("{}\n", changes);
        }

        // Re-check against the rewritten sources so the report and exit
        // code reflect the post-fix state
        let compose_after = match &rendered.compose {
            Some(text) => ComposeFile::from_str(text)?,
            None => compose.clone(),
        };
        let env_after = match &rendered.env {
            Some(text) => EnvironmentMap::parse(text),
            None => env_state.map.clone(),
        };
        specs = extract(&compose_after, &env_after)?;
        entries = classify(&specs, &probe);
        env_info.loaded = env_after.len();
    }

    if cli.json {
        println!("{}", report::render_json(&specs, &entries, &env_info)?);
    } else {
        println!("{}", report::render_human(&specs, &entries, &env_info));
    }

    if write_error {
        return Ok(EXIT_HARD_ERROR);
    }

    let policy = if cli.warn_only {
        ExitPolicy::WarnOnly
    } else if cli.exit_on_used {
        ExitPolicy::ExitOnUsed
    } else {
        ExitPolicy::Default
    };
    Ok(exit_code(&summarize(&specs, &entries), policy))
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();

    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(EXIT_HARD_ERROR);
        }
    }
}
