//! `weave` command-line driver
//!
//! Logs go to stderr; the run report is printed to stdout as JSON.

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use weave_core::prelude::*;

fn cli() -> Command {
    Command::new("weave")
        .version(weave_core::VERSION)
        .about("Synthesize cross-referenced user stories from design material")
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("run")
                .about("Run every pass and print the report")
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .required(true)
                        .action(ArgAction::Append)
                        .value_parser(value_parser!(PathBuf))
                        .help("Story seed file; the file stem names the story"),
                )
                .arg(
                    Arg::new("reference")
                        .long("reference")
                        .action(ArgAction::Append)
                        .value_parser(value_parser!(PathBuf))
                        .help("Reference architecture document"),
                )
                .arg(
                    Arg::new("product")
                        .long("product")
                        .required(true)
                        .help("Product description"),
                )
                .arg(mode_arg())
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("config")
                .about("Resolve the configuration and print it")
                .arg(mode_arg())
                .arg(config_arg()),
        )
}

fn mode_arg() -> Arg {
    Arg::new("evaluation-mode")
        .long("evaluation-mode")
        .value_parser(value_parser!(EvaluationMode))
        .help("strict | lenient (overrides the config file)")
}

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .value_parser(value_parser!(PathBuf))
        .help("TOML configuration file")
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn resolve_config(args: &ArgMatches) -> Result<PipelineConfig> {
    let path = args.get_one::<PathBuf>("config");
    let mode = args.get_one::<EvaluationMode>("evaluation-mode").copied();
    PipelineConfig::resolve(path.map(PathBuf::as_path), mode).context("loading configuration")
}

fn file_stem(path: &Path) -> Result<String> {
    match path.file_stem().and_then(|s| s.to_str()) {
        Some(stem) if !stem.trim().is_empty() => Ok(stem.to_string()),
        _ => bail!("cannot derive a story name from {}", path.display()),
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn load_bundle(args: &ArgMatches) -> Result<SourceBundle> {
    let product = args
        .get_one::<String>("product")
        .context("--product is required")?;
    let mut bundle = SourceBundle::new(product.clone());
    for path in args.get_many::<PathBuf>("seed").into_iter().flatten() {
        bundle = bundle.with_seed(StorySeed::new(file_stem(path)?, read(path)?));
    }
    for path in args.get_many::<PathBuf>("reference").into_iter().flatten() {
        let title = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        bundle = bundle.with_reference(ReferenceDoc::new(title, read(path)?));
    }
    Ok(bundle)
}

async fn run(args: &ArgMatches) -> Result<()> {
    let config = resolve_config(args)?;
    let bundle = load_bundle(args)?;
    let generator: Arc<dyn TextGenerator> =
        gateway_from_config(&config).context("building the generation gateway")?;
    let pipeline = Pipeline::new(generator, config)?;

    let report = pipeline.run(&bundle).await?;
    let meta = &report.metadata;
    tracing::info!(
        run_id = %meta.run_id,
        stories = report.stories.len(),
        rounds = meta.refinement_rounds,
        fixes_applied = meta.fixes_applied,
        fixes_flagged = meta.fixes_flagged_for_review,
        failures = meta.story_failures.len(),
        "report ready"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("run", args)) => run(args).await,
        Some(("config", args)) => {
            let config = resolve_config(args)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        _ => unreachable!("clap enforces a subcommand"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn command_definition_is_valid() {
        cli().debug_assert();
    }

    #[test]
    fn seeds_are_named_by_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let login = dir.path().join("login.md");
        let arch = dir.path().join("architecture.md");
        std::fs::write(&login, "Email and password form").unwrap();
        std::fs::write(&arch, "Sessions live in the auth store").unwrap();

        let matches = cli()
            .try_get_matches_from([
                "weave",
                "run",
                "--product",
                "Acme analytics",
                "--seed",
                login.to_str().unwrap(),
                "--reference",
                arch.to_str().unwrap(),
                "--evaluation-mode",
                "strict",
            ])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        let bundle = load_bundle(args).unwrap();

        assert_eq!(bundle.product, "Acme analytics");
        assert_eq!(bundle.seeds[0].name, "login");
        assert_eq!(bundle.seeds[0].text, "Email and password form");
        assert_eq!(bundle.references[0].title, "architecture.md");
        assert_eq!(resolve_config(args).unwrap().evaluation_mode, EvaluationMode::Strict);
    }

    #[test]
    fn mode_must_be_chosen() {
        let matches = cli().try_get_matches_from(["weave", "config"]).unwrap();
        let (_, args) = matches.subcommand().unwrap();
        assert!(resolve_config(args).is_err());
    }

    #[test]
    fn unknown_mode_is_a_usage_error() {
        assert!(cli()
            .try_get_matches_from(["weave", "config", "--evaluation-mode", "relaxed"])
            .is_err());
    }
}
