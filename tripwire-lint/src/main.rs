use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tripwire_lint::{analyze_paths, LintConfig, RuleId, Severity};

fn usage() {
    eprintln!(
        "usage: tripwire-lint [--deny RULE]... [--warn RULE]... [--allow RULE]... [--include-tests] [PATH]...\n\
         rules:"
    );
    for rule in RuleId::ALL {
        eprintln!("  {} {:<22} (default: {})", rule.code(), rule.name(), rule.default_severity());
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut config = LintConfig::default();
    let mut paths = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                usage();
                return Ok(());
            }
            "--deny" | "--warn" | "--allow" => {
                let rule = args.next().with_context(|| format!("{arg} expects a rule"))?;
                let rule: RuleId = rule.parse()?;
                let severity = match arg.as_str() {
                    "--deny" => Severity::Error,
                    "--warn" => Severity::Warning,
                    _ => Severity::Allow,
                };
                config.set_severity(rule, severity);
            }
            "--include-tests" => config.include_tests = true,
            flag if flag.starts_with('-') => {
                usage();
                bail!("unknown flag {flag}");
            }
            path => paths.push(PathBuf::from(path)),
        }
    }
    if paths.is_empty() {
        paths.push(PathBuf::from("."));
    }

    let diagnostics = analyze_paths(&paths, &config)?;
    for diagnostic in &diagnostics {
        println!("{diagnostic}");
    }
    let errors = diagnostics.iter().filter(|d| d.severity == Severity::Error).count();
    let warnings = diagnostics.len() - errors;
    if !diagnostics.is_empty() {
        eprintln!("tripwire-lint: {errors} error(s), {warnings} warning(s)");
    }
    if errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}
