use activity_report::{
    config::{load_config, CachePolicy, Config},
    explore::{self, Filter, DEFAULT_TOP_N},
    pipeline,
};
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "activity-report",
    version,
    about = "Builds a per-manager activity report from AE, PT and P exports",
    long_about = "\
Reconciles project-accounting exports into one Excel workbook:\n\
- AE (activities and estimates), PT (project transactions) and P (projects) files are found by name in the input folder;\n\
- CSV, Excel and tab/semicolon/pipe-delimited text exports are accepted, column names are matched loosely;\n\
- actual cost is summed per Activity Seq and Budget Remaining = Estimated Cost - Actual Cost;\n\
- the workbook holds the full report, one sheet per manager, totals and employee hours."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose logging (debug level). RUST_LOG overrides it.
    #[arg(long, global = true, default_value_t = false)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the activity report workbook.
    Build(BuildArgs),
    /// Collapse duplicate Activity Seq rows of one AE export, keeping every column.
    Consolidate {
        /// AE export (.xlsx/.xls/.csv/.txt/.dat)
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
        /// Output workbook; defaults to `<input>_consolidated.xlsx`
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Filter a written report, print metrics and the top projects.
    Explore(ExploreArgs),
}

#[derive(Args, Debug)]
struct BuildArgs {
    /// JSON config file; every field is optional and flags below override it.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Folder holding the AE / PT / P exports.
    #[arg(long, value_name = "DIR")]
    input: Option<PathBuf>,

    /// Output workbook; defaults to reportX.xlsx in the input folder.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Manager names left out of the per-manager sheets: --exclude A B
    #[arg(long, num_args = 1.., value_name = "NAME")]
    exclude: Vec<String>,

    /// Only use the most recently modified file of each family.
    #[arg(long, default_value_t = false)]
    latest: bool,

    /// Snapshot cache policy.
    #[arg(long, value_enum)]
    cache: Option<CachePolicy>,

    /// Snapshot cache location; defaults to .activity_report_cache.json in the input folder.
    #[arg(long, value_name = "FILE")]
    cache_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ExploreArgs {
    /// A workbook written by `build`.
    #[arg(long, value_name = "FILE")]
    report: PathBuf,

    /// Sheet to read; defaults to the first one.
    #[arg(long, value_name = "NAME")]
    sheet: Option<String>,

    /// Numeric range, inclusive: --range "Budget Remaining=0..1000"
    #[arg(long, value_name = "COL=LO..HI")]
    range: Vec<String>,

    /// Date range, inclusive: --dates "Start=2024-01-01..2024-06-30"
    #[arg(long, value_name = "COL=START..END")]
    dates: Vec<String>,

    /// Keep rows whose value is one of the list: --select "Manager Description=Alice,Bob"
    #[arg(long, value_name = "COL=V1,V2")]
    select: Vec<String>,

    /// Number of projects listed by summed Budget Remaining.
    #[arg(long, value_name = "N", default_value_t = DEFAULT_TOP_N)]
    top: usize,

    /// Write the filtered rows to a workbook.
    #[arg(long, value_name = "FILE")]
    export: Option<PathBuf>,
}

fn init_logging(verbose: bool) {
    let env = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    fmt().with_env_filter(env).with_target(false).with_writer(std::io::stderr).init();
}

fn build_config(args: BuildArgs) -> Result<Config> {
    let mut cfg = match &args.config {
        Some(p) => load_config(p).with_context(|| format!("failed to read config: {}", p.display()))?,
        None => Config::default(),
    };
    if let Some(dir) = args.input { cfg.input_dir = dir; }
    if args.output.is_some() { cfg.output = args.output; }
    cfg.excluded_managers.extend(args.exclude);
    cfg.latest_only |= args.latest;
    if let Some(policy) = args.cache { cfg.cache = policy; }
    if args.cache_file.is_some() { cfg.cache_file = args.cache_file; }

    if !cfg.input_dir.is_dir() {
        bail!("input folder does not exist: {}", cfg.input_dir.display());
    }
    Ok(cfg)
}

fn run_build(args: BuildArgs) -> Result<()> {
    let cfg = build_config(args)?;
    let summary = pipeline::run(&cfg).context("failed to build the activity report")?;
    if summary.outcome.is_none() {
        bail!("no report rows were produced from {}", cfg.input_dir.display());
    }
    println!("{}", summary.output.display());
    Ok(())
}

fn run_consolidate(input: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let output = output.unwrap_or_else(|| {
        let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("AE");
        input.with_file_name(format!("{stem}_consolidated.xlsx"))
    });
    if output == input { bail!("output would overwrite the input file: {}", input.display()); }
    pipeline::consolidate_file(&input, &output)
        .with_context(|| format!("failed to consolidate {}", input.display()))?;
    println!("{}", output.display());
    Ok(())
}

fn fmt_money(v: Option<f64>) -> String {
    v.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"))
}

fn run_explore(args: ExploreArgs) -> Result<()> {
    let mut filters = Vec::new();
    for s in &args.range { filters.push(Filter::parse_range(s)?); }
    for s in &args.dates { filters.push(Filter::parse_dates(s)?); }
    for s in &args.select { filters.push(Filter::parse_select(s)?); }

    let table = explore::load_report(&args.report, args.sheet.as_deref())
        .with_context(|| format!("failed to read report: {}", args.report.display()))?;
    let filtered = explore::apply_filters(&table, &filters)?;

    let m = explore::metrics(&filtered);
    println!("Rows: {}", m.rows);
    println!("Estimated Cost: {}", fmt_money(m.estimated_cost));
    println!("Actual Cost: {}", fmt_money(m.actual_cost));
    println!("Budget Remaining: {}", fmt_money(m.budget_remaining));

    let top = explore::top_projects(&filtered, args.top);
    if !top.is_empty() {
        println!();
        println!("Top {} projects by Budget Remaining:", top.len());
        for (project, total) in &top {
            println!("  {project:<20} {total:>14.2}");
        }
    }

    if let Some(path) = &args.export {
        explore::export(&filtered, path).with_context(|| format!("failed to export to {}", path.display()))?;
        info!(export = %path.display(), rows = filtered.len(), "filtered rows exported");
        println!("{}", path.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Build(args) => run_build(args),
        Command::Consolidate { input, output } => run_consolidate(input, output),
        Command::Explore(args) => run_explore(args),
    }
}
