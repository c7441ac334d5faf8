use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::Path;
use std::process;
use stoma::artifact::{ClusteringArtifact, PipelineParams};
use stoma::data::load_patient_series;
use stoma::pipeline::{CacheStatus, load_or_compute};

#[derive(Parser)]
#[command(
    name = "stoma",
    about = "Cluster oral-mucositis severity trajectories",
    long_about = "A tool for assigning patients to oral-mucositis severity trajectory clusters: \
                 per-patient linear interpolation onto a shared time grid, missing-aware pairwise \
                 distances, gap-statistic cluster-count selection, and a Ward-linkage cut."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cluster patient severity trajectories from a TSV table
    #[command(about = "Run the clustering pipeline (outputs: assignments.tsv, cluster_means.tsv)")]
    Cluster {
        /// Path to severity TSV file with patient_id, timepoint, om_score columns
        input: String,

        /// Step between interpolation grid timepoints
        #[arg(long, default_value = "1.0")]
        step: f64,

        /// Maximum candidate cluster count for the gap statistic
        #[arg(long, default_value = "6")]
        k_max: usize,

        /// Number of uniform reference datasets for the gap statistic
        #[arg(long, default_value = "50")]
        bootstraps: usize,

        /// RNG seed for the reference resamples (explicit; there is no hidden default)
        #[arg(long)]
        seed: u64,

        /// Minimum shared grid points for a pairwise distance to be defined
        #[arg(long, default_value = "2")]
        min_overlap: usize,

        /// Path of the cached clustering artifact
        #[arg(long, default_value = "clusters.toml")]
        artifact: String,
    },

    /// Inspect a saved clustering artifact
    #[command(about = "Print an artifact's parameters, gap curve, and cluster sizes")]
    Show {
        /// Path to a clustering artifact (.toml)
        artifact: String,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Cluster {
            input,
            step,
            k_max,
            bootstraps,
            seed,
            min_overlap,
            artifact,
        } => cluster_command(&input, step, k_max, bootstraps, seed, min_overlap, &artifact),
        Commands::Show { artifact } => show_command(&artifact),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn cluster_command(
    input: &str,
    step: f64,
    k_max: usize,
    bootstraps: usize,
    seed: u64,
    min_overlap: usize,
    artifact_path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading severity data from: {}", input);
    let series = load_patient_series(input)?;
    println!("Loaded {} patients", series.len());

    let params = PipelineParams {
        grid_step: step,
        k_max,
        bootstraps,
        seed,
        min_overlap,
    };

    let (artifact, status) = load_or_compute(Path::new(artifact_path), &series, &params)?;
    match status {
        CacheStatus::Hit => println!("Reused cached clustering from: {}", artifact_path),
        CacheStatus::Stale => println!(
            "Cached artifact was stale; recomputed and rewrote: {}",
            artifact_path
        ),
        CacheStatus::Miss => println!("Clustering artifact saved to: {}", artifact_path),
    }

    println!(
        "Selected k = {} over a {}-point grid [{}, {}]",
        artifact.selected_k,
        artifact.grid.len(),
        artifact.grid[0],
        artifact.grid[artifact.grid.len() - 1]
    );
    println!("Cluster sizes: {:?}", artifact.cluster_sizes);

    let assignments_path = "assignments.tsv";
    save_assignments(&artifact, assignments_path)?;
    println!("Assignments saved to: {}", assignments_path);

    let means_path = "cluster_means.tsv";
    save_cluster_means(&artifact, means_path)?;
    println!("Cluster mean trajectories saved to: {}", means_path);

    Ok(())
}

fn show_command(artifact_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let artifact = ClusteringArtifact::load(Path::new(artifact_path))?;

    println!("Artifact: {}", artifact_path);
    println!(
        "Parameters: step={}, k_max={}, bootstraps={}, seed={}, min_overlap={}",
        artifact.params.grid_step,
        artifact.params.k_max,
        artifact.params.bootstraps,
        artifact.params.seed,
        artifact.params.min_overlap
    );
    println!(
        "Input: {} patients over [{}, {}]",
        artifact.fingerprint.n_patients,
        artifact.fingerprint.time_span.0,
        artifact.fingerprint.time_span.1
    );

    println!("Gap curve:");
    println!("k\tgap\tstd_err\tlog_w_obs\tlog_w_ref");
    for i in 0..artifact.gap.len() {
        println!(
            "{}\t{:.4}\t{:.4}\t{:.4}\t{:.4}",
            i + 1,
            artifact.gap[i],
            artifact.std_err[i],
            artifact.log_w_obs[i],
            artifact.log_w_ref_mean[i]
        );
    }

    println!("Selected k = {}", artifact.selected_k);
    println!("Cluster sizes: {:?}", artifact.cluster_sizes);
    Ok(())
}

/// Save per-patient cluster assignments to a TSV file
fn save_assignments(artifact: &ClusteringArtifact, output_path: &str) -> Result<(), std::io::Error> {
    let mut file = std::fs::File::create(output_path)?;
    writeln!(file, "patient_id\tcluster")?;
    for (id, label) in artifact
        .fingerprint
        .patient_ids
        .iter()
        .zip(artifact.labels.iter())
    {
        writeln!(file, "{}\t{}", id, label)?;
    }
    Ok(())
}

/// Save long-format cluster mean trajectories to a TSV file; grid points no
/// cluster member covers are written as NA
fn save_cluster_means(
    artifact: &ClusteringArtifact,
    output_path: &str,
) -> Result<(), std::io::Error> {
    let mut file = std::fs::File::create(output_path)?;
    writeln!(file, "cluster\ttimepoint\tmean_score")?;
    for (r, means) in artifact.cluster_means.iter().enumerate() {
        for (t, &mean) in artifact.grid.iter().zip(means.iter()) {
            if mean.is_nan() {
                writeln!(file, "{}\t{}\tNA", r + 1, t)?;
            } else {
                writeln!(file, "{}\t{}\t{:.6}", r + 1, t, mean)?;
            }
        }
    }
    Ok(())
}
