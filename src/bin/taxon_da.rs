//! taxon-da - per-taxon differential abundance testing CLI

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use taxon_da::community::{permanova, PermanovaConfig};
use taxon_da::correct::CorrectionMethod;
use taxon_da::data::{CountMatrix, Metadata, ResultTable};
use taxon_da::error::Result;
use taxon_da::filter::{filter_prevalence, Comparison, Detection, PrevalenceFilter};
use taxon_da::normalize::Transform;
use taxon_da::pipeline::{Pipeline, PipelineConfig};
use taxon_da::test::TestSpec;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Per-taxon differential abundance testing for microbiome count tables
#[derive(Parser)]
#[command(name = "taxon-da")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Tsv,
    Csv,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliTest {
    /// Welch two-sample t-test
    Welch,
    /// Student two-sample t-test (pooled variance)
    Student,
    /// Wilcoxon rank-sum test
    Wilcoxon,
    /// Kruskal-Wallis rank test
    Kruskal,
    /// Negative binomial GLM with size factors (needs --coefficient)
    Deseq,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliTransform {
    Identity,
    Log1p,
    /// Relative abundance (proportion of library size)
    Relative,
}

impl From<CliTransform> for Transform {
    fn from(t: CliTransform) -> Self {
        match t {
            CliTransform::Identity => Transform::Identity,
            CliTransform::Log1p => Transform::Log1p,
            CliTransform::Relative => Transform::Relative { scale: 1.0 },
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline from a YAML configuration file
    Run {
        /// Path to pipeline configuration YAML
        #[arg(short = 'C', long)]
        config: PathBuf,

        /// Path to count matrix TSV
        #[arg(short = 'c', long)]
        counts: PathBuf,

        /// Path to metadata TSV
        #[arg(short, long)]
        metadata: PathBuf,

        /// Output path for results
        #[arg(short, long)]
        output: PathBuf,

        #[arg(long, value_enum, default_value = "tsv")]
        format: OutputFormat,
    },

    /// Test every taxon between the levels of a metadata column
    Test {
        /// Path to count matrix TSV
        #[arg(short = 'c', long)]
        counts: PathBuf,

        /// Path to metadata TSV
        #[arg(short, long)]
        metadata: PathBuf,

        /// Grouping column
        #[arg(short, long)]
        group: String,

        /// Tests to run (comma-separated)
        #[arg(short, long, value_enum, value_delimiter = ',', default_value = "welch,wilcoxon")]
        tests: Vec<CliTest>,

        /// Coefficient tested by model-based tests (e.g. "grouptreatment")
        #[arg(long)]
        coefficient: Option<String>,

        /// Levels to compare, reference first (comma-separated)
        #[arg(long, value_delimiter = ',')]
        levels: Option<Vec<String>>,

        /// Only test these taxa, in this order (comma-separated)
        #[arg(long, value_delimiter = ',')]
        taxa: Option<Vec<String>>,

        /// Keep taxa detected in at least this fraction of samples
        #[arg(long)]
        prevalence: Option<f64>,

        /// Transform applied before parametric tests
        #[arg(long, value_enum, default_value = "identity")]
        transform: CliTransform,

        /// Correction method: bh, by, holm, bonferroni, none
        #[arg(long, default_value = "bh")]
        correction: String,

        /// Output path for results
        #[arg(short, long)]
        output: PathBuf,

        #[arg(long, value_enum, default_value = "tsv")]
        format: OutputFormat,
    },

    /// Keep taxa passing a prevalence threshold
    Filter {
        /// Path to count matrix TSV
        #[arg(short = 'c', long)]
        counts: PathBuf,

        /// Prevalence threshold as a fraction
        #[arg(short, long)]
        prevalence: f64,

        /// Minimum count for a taxon to count as detected
        #[arg(long, default_value = "1")]
        detection: f64,

        /// Use strict > comparisons instead of >=
        #[arg(long)]
        strict: bool,

        /// Output path for the filtered count matrix TSV
        #[arg(short, long)]
        output: PathBuf,
    },

    /// PERMANOVA on Bray-Curtis dissimilarities
    Permanova {
        /// Path to count matrix TSV
        #[arg(short = 'c', long)]
        counts: PathBuf,

        /// Path to metadata TSV
        #[arg(short, long)]
        metadata: PathBuf,

        /// Grouping column
        #[arg(short, long)]
        group: String,

        #[arg(long, default_value = "999")]
        permutations: usize,

        #[arg(long, default_value = "42")]
        seed: u64,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate an example pipeline configuration
    Example {
        /// Output path for the example YAML
        #[arg(short, long, default_value = "pipeline.yaml")]
        output: PathBuf,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run {
            config,
            counts,
            metadata,
            output,
            format,
        } => cmd_run(&config, &counts, &metadata, &output, format),

        Commands::Test {
            counts,
            metadata,
            group,
            tests,
            coefficient,
            levels,
            taxa,
            prevalence,
            transform,
            correction,
            output,
            format,
        } => build_quick_config(
            &group,
            &tests,
            coefficient,
            levels,
            taxa,
            prevalence,
            transform,
            &correction,
        )
        .and_then(|config| run_config(&config, &counts, &metadata, &output, format)),

        Commands::Filter {
            counts,
            prevalence,
            detection,
            strict,
            output,
        } => cmd_filter(&counts, prevalence, detection, strict, &output),

        Commands::Permanova {
            counts,
            metadata,
            group,
            permutations,
            seed,
            json,
        } => cmd_permanova(&counts, &metadata, &group, permutations, seed, json),

        Commands::Example { output } => cmd_example(&output),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Run a pipeline from configuration
fn cmd_run(
    config_path: &Path,
    counts_path: &Path,
    metadata_path: &Path,
    output_path: &Path,
    format: OutputFormat,
) -> Result<()> {
    eprintln!("Loading pipeline configuration from {:?}...", config_path);
    let config_str = std::fs::read_to_string(config_path)?;
    let config = PipelineConfig::from_yaml(&config_str)?;
    run_config(&config, counts_path, metadata_path, output_path, format)
}

fn run_config(
    config: &PipelineConfig,
    counts_path: &Path,
    metadata_path: &Path,
    output_path: &Path,
    format: OutputFormat,
) -> Result<()> {
    eprintln!("Loading data...");
    let counts = CountMatrix::from_tsv(counts_path)?;
    let metadata = Metadata::from_tsv(metadata_path)?;
    eprintln!(
        "Loaded {} taxa x {} samples",
        counts.n_taxa(),
        counts.n_samples()
    );

    eprintln!("Running pipeline '{}'...", config.name);
    let results = Pipeline::from_config(config).run(&counts, &metadata)?;

    eprintln!("Writing results to {:?}...", output_path);
    write_results(&results, output_path, format)?;

    eprintln!("Done! {} taxa tested", results.len());
    for method in &results.methods {
        let summary = results.summary(method)?;
        eprintln!(
            "  {}: {} significant at q < 0.05, {} failed",
            method, summary.significant_05, summary.failed
        );
    }
    Ok(())
}

fn write_results(results: &ResultTable, path: &Path, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Tsv => results.to_tsv(path),
        OutputFormat::Csv => results.to_csv(path),
        OutputFormat::Json => results.to_json(path),
    }
}

#[allow(clippy::too_many_arguments)]
fn build_quick_config(
    group: &str,
    tests: &[CliTest],
    coefficient: Option<String>,
    levels: Option<Vec<String>>,
    taxa: Option<Vec<String>>,
    prevalence: Option<f64>,
    transform: CliTransform,
    correction: &str,
) -> Result<PipelineConfig> {
    let mut pipeline = Pipeline::new(group)
        .name("quick")
        .transform(transform.into())
        .correct(correction.parse::<CorrectionMethod>()?);
    if let Some(threshold) = prevalence {
        pipeline = pipeline.filter_prevalence(threshold);
    }

    for test in tests {
        let spec = match test {
            CliTest::Welch => TestSpec::TTest {
                equal_variance: false,
            },
            CliTest::Student => TestSpec::TTest {
                equal_variance: true,
            },
            CliTest::Wilcoxon => TestSpec::Wilcoxon,
            CliTest::Kruskal => TestSpec::KruskalWallis,
            CliTest::Deseq => TestSpec::Deseq {
                coefficient: coefficient.clone().ok_or_else(|| {
                    taxon_da::error::DaaError::InvalidParameter(
                        "--coefficient is required for deseq".to_string(),
                    )
                })?,
                covariates: Vec::new(),
            },
        };
        pipeline = pipeline.test(spec);
    }

    let mut config = pipeline.to_config();
    config.levels = levels;
    config.taxa = taxa;
    Ok(config)
}

fn cmd_filter(
    counts_path: &Path,
    prevalence: f64,
    detection: f64,
    strict: bool,
    output_path: &Path,
) -> Result<()> {
    let comparison = if strict {
        Comparison::Above
    } else {
        Comparison::AtLeast
    };
    let filter = PrevalenceFilter::new(prevalence)
        .with_comparison(comparison)
        .with_detection(Detection::new(detection, comparison));

    let counts = CountMatrix::from_tsv(counts_path)?;
    let (filtered, result) = filter_prevalence(&counts, &filter)?;
    filtered.to_tsv(output_path)?;
    eprint!("{}", result);
    Ok(())
}

fn cmd_permanova(
    counts_path: &Path,
    metadata_path: &Path,
    group: &str,
    permutations: usize,
    seed: u64,
    json: bool,
) -> Result<()> {
    let counts = CountMatrix::from_tsv(counts_path)?;
    let metadata = Metadata::from_tsv(metadata_path)?;
    let config = PermanovaConfig {
        n_permutations: permutations,
        seed,
    };
    info!(permutations, seed, "running PERMANOVA");
    let result = permanova(&counts, &metadata, group, &config)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result);
    }
    Ok(())
}

fn cmd_example(output_path: &Path) -> Result<()> {
    let pipeline = Pipeline::new("group")
        .name("example-two-group")
        .description("Welch t-test on log1p counts, Wilcoxon and DESeq-style NB per taxon")
        .filter_prevalence(0.1)
        .transform(Transform::Log1p)
        .t_test()
        .wilcoxon()
        .deseq("grouptreatment")
        .correct(CorrectionMethod::BenjaminiHochberg);

    let yaml = pipeline.to_config().to_yaml()?;
    std::fs::write(output_path, &yaml)?;
    eprintln!("Wrote example pipeline to {:?}", output_path);
    eprintln!();
    eprintln!("Contents:");
    println!("{}", yaml);
    Ok(())
}
