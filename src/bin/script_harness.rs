use std::env;
use std::fs::{self, File};
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use arcade_script::cli::CliOverrides;
use arcade_script::script_harness::{load_fixture, run_fixture, script_root_for, HarnessOutput};
use arcade_script::FsContentSource;

fn main() {
    tracing_subscriber::fmt().with_writer(std::io::stderr).with_target(false).init();
    if let Err(err) = run_cli() {
        tracing::error!("{err:?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let opts = parse_args()?;
    let mut fixture = load_fixture(&opts.fixture)?;
    if let Some(steps) = opts.overrides.steps {
        fixture.steps = steps;
    }
    if let Some(dt) = opts.overrides.dt {
        fixture.dt = dt;
    }
    let content = FsContentSource::new(script_root_for(&opts.fixture, &fixture));
    let output = run_fixture(&fixture, content, &opts.overrides.config_overrides())?;

    if let Some(path) = &opts.write_output {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating output directory '{}'", parent.display()))?;
            }
        }
        let file = File::create(path)
            .with_context(|| format!("writing harness output to '{}'", path.display()))?;
        serde_json::to_writer_pretty(file, &output).with_context(|| "serializing harness output")?;
        tracing::info!("wrote {}", path.display());
    }

    if let Some(path) = &opts.check_golden {
        let file = File::open(path).with_context(|| format!("opening golden file '{}'", path.display()))?;
        let expected: HarnessOutput = serde_json::from_reader(file).with_context(|| "parsing golden JSON")?;
        if expected != output {
            bail!(
                "golden mismatch for {} (use --write-output to refresh):\nexpected: {}\nactual:   {}",
                opts.fixture.display(),
                serde_json::to_string(&expected).unwrap_or_default(),
                serde_json::to_string(&output).unwrap_or_default(),
            );
        }
        tracing::info!("matched golden {}", path.display());
    } else if opts.write_output.is_none() {
        serde_json::to_writer_pretty(std::io::stdout(), &output)?;
        println!();
    }

    Ok(())
}

struct CliOptions {
    fixture: PathBuf,
    write_output: Option<PathBuf>,
    check_golden: Option<PathBuf>,
    overrides: CliOverrides,
}

fn parse_args() -> Result<CliOptions> {
    let mut fixture = None;
    let mut write_output = None;
    let mut check_golden = None;
    let mut passthrough = vec!["script_harness".to_string()];
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--fixture" | "-f" => fixture = args.next().map(PathBuf::from),
            "--write-output" | "-o" => write_output = args.next().map(PathBuf::from),
            "--golden" | "-g" => check_golden = args.next().map(PathBuf::from),
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                passthrough.push(arg);
                if let Some(value) = args.next() {
                    passthrough.push(value);
                }
            }
        }
    }
    let overrides = CliOverrides::parse(passthrough)?;
    let Some(fixture) = fixture else { return Err(anyhow!("--fixture <path> is required")) };
    Ok(CliOptions { fixture, write_output, check_golden, overrides })
}

fn print_help() {
    println!("Usage: script_harness --fixture <path> [--golden <path>] [--write-output <path>]");
    println!("                      [--steps <n>] [--dt <seconds>] [--seed <n>] [--max-ops <n>]");
    println!("  -f, --fixture        Path to a harness fixture JSON file");
    println!("  -g, --golden         Optional golden output file to compare against");
    println!("  -o, --write-output   Optional path to write the actual output JSON");
    println!("      --steps/--dt     Override the fixture's step count and step length");
    println!("      --seed/--max-ops Override the scripting seed and per-invocation operation budget");
}
