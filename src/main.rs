use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, Level};

use eplq::ast::compile;
use eplq::config::Config;
use eplq::query::FieldMap;
use eplq::{rewrite_query, Mapping, Query, QueryParams};

/// Inspect and rewrite EPL continuous queries
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Config file (defaults to <config dir>/eplq/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level regardless of the configured level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print targets, aliases, subqueries and referenced fields
    Analyze {
        expression: String,
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Rewrite target names to registered names
    Rewrite {
        expression: String,
        /// Target mapping as TARGET=REGISTERED, merged over the config file
        #[arg(short, long = "map", value_parser = parse_mapping_entry)]
        map: Vec<(String, String)>,
    },
    /// Print the query descriptor as JSON
    Describe {
        expression: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        group: Option<String>,
    },
}

#[derive(Serialize)]
struct Analysis<'a> {
    targets: &'a [String],
    aliases: &'a [String],
    subqueries: Vec<String>,
    fields: FieldMap,
}

fn parse_mapping_entry(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((from, to)) if !from.is_empty() && !to.is_empty() => {
            Ok((from.to_string(), to.to_string()))
        }
        _ => Err(format!("expected TARGET=REGISTERED, got {:?}", s)),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        config.logging.level.parse().unwrap_or(Level::WARN)
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Analyze { expression, json } => analyze(&config, expression, json),
        Command::Rewrite { expression, map } => rewrite(&config, expression, map),
        Command::Describe {
            expression,
            name,
            group,
        } => {
            let query = Query::with_options(
                QueryParams {
                    name,
                    group,
                    expression,
                },
                config.parser,
            );
            println!("{}", serde_json::to_string_pretty(&query.to_descriptor()?)?);
            Ok(())
        }
    }
}

fn analyze(config: &Config, expression: String, json: bool) -> Result<()> {
    let query = Query::with_options(QueryParams::expression(expression), config.parser);
    let analysis = Analysis {
        targets: query.targets()?,
        aliases: query.aliases()?,
        subqueries: query
            .subqueries()?
            .iter()
            .map(|sub| sub.ast().map(compile))
            .collect::<eplq::Result<_>>()?,
        fields: query.explore(&[], &Default::default())?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
        return Ok(());
    }

    println!("targets:    {}", analysis.targets.join(", "));
    println!("aliases:    {}", analysis.aliases.join(", "));
    for sub in &analysis.subqueries {
        println!("subquery:   {}", sub);
    }
    for (target, fields) in &analysis.fields.targets {
        println!("fields[{}]: {}", target, fields.join(", "));
    }
    if !analysis.fields.unknown.is_empty() {
        println!("unresolved: {}", analysis.fields.unknown.join(", "));
    }
    Ok(())
}

fn rewrite(config: &Config, expression: String, map: Vec<(String, String)>) -> Result<()> {
    let mut mapping: Mapping = config.mapping.clone();
    mapping.extend(map);

    let query = Query::with_options(QueryParams::expression(expression), config.parser);
    let missing = query.missing_mappings(&mapping)?;
    if !missing.is_empty() {
        bail!("no mapping for target(s): {}", missing.join(", "));
    }
    debug!(targets = ?query.targets()?, "rewriting");

    let mut statement = query.ast()?.clone();
    rewrite_query(&mut statement, &mapping).context("Rewrite failed")?;
    println!("{}", compile(&statement));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mapping_entry() {
        assert_eq!(
            parse_mapping_entry("Target=Target_1"),
            Ok(("Target".to_string(), "Target_1".to_string()))
        );
        assert!(parse_mapping_entry("Target").is_err());
        assert!(parse_mapping_entry("=x").is_err());
    }

    #[test]
    fn test_cli_parses_repeated_maps() {
        let cli = Cli::try_parse_from([
            "eplq",
            "rewrite",
            "select a from A, B",
            "--map",
            "A=A1",
            "-m",
            "B=B1",
        ])
        .unwrap();
        match cli.command {
            Command::Rewrite { map, .. } => assert_eq!(map.len(), 2),
            _ => panic!("expected rewrite"),
        }
    }
}
