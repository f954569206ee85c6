mod annotations;
mod classfile;
mod classpath;
mod config;
mod constant_pool;
mod ir;
mod link;
mod reader;
mod scan;
mod signature;
mod telemetry;
#[cfg(test)]
mod test_harness;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use crate::classpath::ClasspathElement;
use crate::config::ScanConfig;
use crate::link::{link_all, ClassGraph};
use crate::telemetry::{init_logging, with_span, Telemetry};

/// CLI arguments for classweave execution.
#[derive(Parser, Debug)]
#[command(
    name = "classweave",
    about = "Scan JVM classpath elements and link their classfile metadata into a class graph.",
    version
)]
struct Cli {
    /// Classpath elements (directories or jars) to scan. Use @file to read
    /// paths (one per line).
    #[arg(long, value_name = "PATH", required = true, num_args = 1..)]
    input: Vec<String>,

    /// Lookup-only classpath elements, searched when extending scanning
    /// upwards. Use @file to read paths (one per line).
    #[arg(long, value_name = "PATH", num_args = 1..)]
    classpath: Vec<String>,

    /// Write the JSON report here instead of stdout.
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Suppress the summary line on stderr.
    #[arg(long)]
    quiet: bool,

    /// Print phase timings to stderr.
    #[arg(long)]
    timing: bool,

    /// Export scan-phase spans to this OTLP HTTP endpoint.
    #[arg(long, value_name = "URL")]
    otel: Option<String>,

    /// Number of parse workers (defaults to the number of CPUs).
    #[arg(long, value_name = "N")]
    threads: Option<usize>,

    /// Scan classes regardless of their visibility modifiers.
    #[arg(long)]
    ignore_class_visibility: bool,

    /// Record fields regardless of their visibility modifiers.
    #[arg(long)]
    ignore_field_visibility: bool,

    /// Record methods regardless of their visibility modifiers.
    #[arg(long)]
    ignore_method_visibility: bool,

    /// Record per-field metadata.
    #[arg(long)]
    enable_field_info: bool,

    /// Record per-method metadata.
    #[arg(long)]
    enable_method_info: bool,

    /// Decode class, field, method, and parameter annotations.
    #[arg(long)]
    enable_annotation_info: bool,

    /// Only decode RuntimeVisible* annotation attributes.
    #[arg(long)]
    disable_runtime_invisible_annotations: bool,

    /// Capture ConstantValue initializers of static final fields.
    #[arg(long)]
    enable_static_final_field_constant_initializer_values: bool,

    /// Collect the set of class names each classfile references.
    #[arg(long)]
    enable_inter_class_dependencies: bool,

    /// Follow superclass/interface/annotation references into external
    /// classes and schedule them for scanning.
    #[arg(long)]
    extend_scanning_upwards: bool,
}

/// JSON report: scan counters plus the linked graph.
#[derive(Serialize)]
struct ScanReport<'a> {
    enumerated_classfiles: usize,
    parsed_classes: usize,
    skipped_classfiles: usize,
    classfile_errors: usize,
    #[serde(flatten)]
    graph: &'a ClassGraph,
}

fn main() -> std::process::ExitCode {
    init_logging();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:?}");
            std::process::ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let telemetry = match &cli.otel {
        Some(url) => Some(Arc::new(Telemetry::new(url.clone())?)),
        None => None,
    };

    let result = with_span(telemetry.as_deref(), "execution", &[], || run_scan(&cli, telemetry.as_deref()));
    if let Some(telemetry) = &telemetry {
        telemetry.shutdown()?;
    }
    result
}

fn run_scan(cli: &Cli, telemetry: Option<&Telemetry>) -> Result<()> {
    let inputs = expand_paths(&cli.input)?;
    let lookups = expand_paths(&cli.classpath)?;
    anyhow::ensure!(!inputs.is_empty(), "at least one --input element is required");

    let mut elements = Vec::with_capacity(inputs.len() + lookups.len());
    for path in inputs.iter().chain(lookups.iter()) {
        elements.push(ClasspathElement::open(path)?);
    }
    let scan_targets = inputs.len();
    let config = scan_config(cli);
    let threads = cli.threads.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(1)
    });

    let scan_started = Instant::now();
    let outcome = scan::scan(&elements, scan_targets, &config, threads, telemetry)?;
    let scan_elapsed = scan_started.elapsed();

    let parsed_classes = outcome.records.len();
    let link_started = Instant::now();
    let graph = with_span(telemetry, "link", &[], || link_all(outcome.records, &elements));
    let link_elapsed = link_started.elapsed();

    let report = ScanReport {
        enumerated_classfiles: outcome.enumerated,
        parsed_classes,
        skipped_classfiles: outcome.skipped,
        classfile_errors: outcome.errors,
        graph: &graph,
    };
    let json = serde_json::to_string_pretty(&report).context("serialize report")?;
    match &cli.output {
        Some(path) => fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?,
        None => println!("{json}"),
    }

    if cli.timing {
        eprintln!(
            "scan: {} ms, link: {} ms",
            scan_elapsed.as_millis(),
            link_elapsed.as_millis()
        );
    }
    if !cli.quiet {
        eprintln!(
            "scanned {} classfiles ({} skipped, {} errors); linked {} classes, {} packages, {} modules",
            outcome.enumerated,
            outcome.skipped,
            outcome.errors,
            graph.classes.len(),
            graph.packages.len(),
            graph.modules.len()
        );
    }
    Ok(())
}

fn scan_config(cli: &Cli) -> ScanConfig {
    ScanConfig {
        ignore_class_visibility: cli.ignore_class_visibility,
        ignore_field_visibility: cli.ignore_field_visibility,
        ignore_method_visibility: cli.ignore_method_visibility,
        enable_field_info: cli.enable_field_info,
        enable_method_info: cli.enable_method_info,
        enable_annotation_info: cli.enable_annotation_info,
        disable_runtime_invisible_annotations: cli.disable_runtime_invisible_annotations,
        enable_static_final_field_constant_initializer_values: cli
            .enable_static_final_field_constant_initializer_values,
        enable_inter_class_dependencies: cli.enable_inter_class_dependencies,
        extend_scanning_upwards_to_external_classes: cli.extend_scanning_upwards,
    }
}

/// Expand `@file` references into the paths listed in the file, one per
/// line; plain arguments pass through.
fn expand_paths(args: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for arg in args {
        if let Some(list_path) = arg.strip_prefix('@') {
            let content = fs::read_to_string(list_path)
                .with_context(|| format!("failed to read path list {list_path}"))?;
            for line in content.lines() {
                let line = line.trim();
                if !line.is_empty() {
                    paths.push(PathBuf::from(line));
                }
            }
        } else {
            paths.push(PathBuf::from(arg));
        }
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn expand_paths_reads_at_files() {
        let mut list = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(list, "a.jar\n\n  b.jar  ").expect("write list");
        let args = vec![
            format!("@{}", list.path().display()),
            "c.jar".to_string(),
        ];
        let paths = expand_paths(&args).expect("expand");
        assert_eq!(
            paths,
            vec![
                PathBuf::from("a.jar"),
                PathBuf::from("b.jar"),
                PathBuf::from("c.jar"),
            ]
        );
    }

    #[test]
    fn missing_at_file_is_an_error() {
        let args = vec!["@/definitely/missing/list.txt".to_string()];
        assert!(expand_paths(&args).is_err());
    }
}
