//! qgate - operator CLI for query governance
//!
//! Exit codes: 0 success or valid query, 1 blocked query, 2 any error
//! (unreadable file, rule document that does not parse, bad configuration).

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use qg_core::OrchestratorConfig;
use qg_policy::{RuleSet, RuleSetParser, Validator, Verdict};
use std::fmt::Write as _;
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::{fmt, EnvFilter};

fn cli() -> Command {
    Command::new("qgate")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Query governance rule checker")
        .subcommand_required(true)
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .value_parser(["text", "json"])
                .default_value("text")
                .help("Diagnostic log format on stderr (filter with RUST_LOG)"),
        )
        .subcommand(
            Command::new("parse")
                .about("Parse a rule document and print its rules")
                .arg(rules_arg())
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("check")
                .about("Check one query against a rule document")
                .arg(rules_arg())
                .arg(
                    Arg::new("query")
                        .long("query")
                        .short('q')
                        .required(true)
                        .help("Query text, SQL or natural language"),
                )
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective orchestrator configuration as JSON")
                .arg(
                    Arg::new("path")
                        .long("path")
                        .help("TOML configuration file (defaults when omitted)"),
                ),
        )
}

fn rules_arg() -> Arg {
    Arg::new("rules")
        .long("rules")
        .short('r')
        .required(true)
        .help("Path to the business-rule document")
}

fn json_arg() -> Arg {
    Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Output as JSON")
}

fn init_logging(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> ExitCode {
    let matches = cli().get_matches();
    let format = matches
        .get_one::<String>("log-format")
        .map_or("text", String::as_str);
    init_logging(format);

    match run(&matches) {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{err:#}");
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}

fn run(matches: &ArgMatches) -> Result<ExitCode> {
    match matches.subcommand() {
        Some(("parse", args)) => {
            let rules = load_rules(required(args, "rules")?)?;
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&rules)?);
            } else {
                print!("{}", render_rules(&rules));
            }
            Ok(ExitCode::SUCCESS)
        }
        Some(("check", args)) => {
            let rules = load_rules(required(args, "rules")?)?;
            let query = required(args, "query")?;
            let verdict = Validator::new().validate(query, &rules);
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&verdict)?);
            } else {
                print!("{}", render_verdict(&verdict));
            }
            Ok(if verdict.is_valid() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
        Some(("config", args)) => {
            let config = match args.get_one::<String>("path") {
                Some(path) => OrchestratorConfig::load(path)
                    .with_context(|| format!("loading configuration from {path}"))?,
                None => OrchestratorConfig::default(),
            };
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
        _ => anyhow::bail!("unknown command"),
    }
}

fn required<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a str> {
    args.get_one::<String>(name)
        .map(String::as_str)
        .with_context(|| format!("missing --{name}"))
}

fn load_rules(path: impl AsRef<Path>) -> Result<RuleSet> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading rule document {}", path.display()))?;
    let rules = RuleSetParser::new()
        .parse(&text)
        .with_context(|| format!("parsing rule document {}", path.display()))?;
    tracing::debug!(version = rules.version().short(), rules = rules.len(), "rule document loaded");
    Ok(rules)
}

fn render_rules(rules: &RuleSet) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "version {}", rules.version().short());
    let _ = writeln!(out, "{} rule(s), {} annotation(s)", rules.len(), rules.annotations().len());
    for rule in rules.rules() {
        let _ = writeln!(
            out,
            "  {:<12} {:<20} {:<12} {}",
            rule.id(),
            rule.kind(),
            rule.pattern(),
            rule.message()
        );
    }
    for note in rules.annotations() {
        let _ = writeln!(out, "  line {:<7} {}", note.line, note.text);
    }
    out
}

fn render_verdict(verdict: &Verdict) -> String {
    let mut out = String::new();
    if verdict.is_valid() {
        out.push_str("valid\n");
        return out;
    }
    let _ = writeln!(out, "blocked: {} violation(s)", verdict.violations().len());
    for violation in verdict.violations() {
        let _ = writeln!(out, "  {} [{}] {}", violation.rule_id, violation.kind, violation.message);
    }
    out
}
