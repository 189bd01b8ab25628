//! Pipeline library tree verification binary
//!
//! This binary builds every unique stage assignment of the predefined trees (or
//! of a single YAML tree manifest) on the GPU, renders the scenario with each
//! linked pipeline and compares the output with the reference images.
//!
//! # Usage
//! ```bash
//! verify_trees --group optimize --name 1_1_1_1 --dump-dir failures
//! ```

use clap::Parser;
use pipelink::engine::{BuildOptions, TestResult, build_and_verify_all};
use pipelink::harness::quantize_depth;
use pipelink::predefined::{TestCase, TestGroup, test_cases};
use pipelink::tree::TreeConfiguration;
use pipelink_verification::{WgpuDevice, wgsl_shaders};
use std::path::{Path, PathBuf};

/// Command-line arguments for the tree verifier
#[derive(Parser)]
#[command(version, about = "Verifies pipeline library trees on the GPU")]
struct Args {
    /// Only run test cases of this group (fast, optimize)
    #[arg(long, short)]
    group: Option<String>,

    /// Only run trees with this name, e.g. 0_1111
    #[arg(long, short)]
    name: Option<String>,

    /// Verify a YAML tree manifest instead of the predefined trees
    #[arg(long, short)]
    tree: Option<PathBuf>,

    /// Link with link-time optimisation when verifying a manifest
    #[arg(long)]
    optimize: bool,

    /// Directory receiving the rendered images of mismatching configurations
    #[arg(long, short)]
    dump_dir: Option<PathBuf>,

    /// Log every built fragment
    #[arg(long, short)]
    verbose: bool,
}

/// Selects the test cases to run
fn select_cases(args: &Args) -> Result<Vec<TestCase>, Box<dyn std::error::Error>> {
    if let Some(path) = &args.tree {
        let tree = TreeConfiguration::from_file(path)?;
        let group = if args.optimize { TestGroup::Optimize } else { TestGroup::Fast };
        return Ok(vec![TestCase {
            group,
            name: tree.name(),
            tree,
            options: BuildOptions { optimize: args.optimize, delayed_shader_create: true },
        }]);
    }

    let group = match args.group.as_deref().map(str::to_lowercase).as_deref() {
        None => None,
        Some("fast") => Some(TestGroup::Fast),
        Some("optimize") => Some(TestGroup::Optimize),
        Some(other) => return Err(format!("Unknown group '{other}', expected fast or optimize").into()),
    };

    Ok(test_cases()?
        .into_iter()
        .filter(|case| group.is_none_or(|group| case.group == group))
        .filter(|case| args.name.as_ref().is_none_or(|name| &case.name == name))
        .collect())
}

/// Writes the images of every mismatching configuration of a result
fn dump_failures(dump_dir: &Path, case: &TestCase, result: &TestResult) -> Result<(), Box<dyn std::error::Error>> {
    for failure in &result.failures {
        let Some(output) = &failure.output else { continue };

        let directory = dump_dir.join(case.group.name()).join(&case.name);
        std::fs::create_dir_all(&directory)?;

        let stem = format!("permutation_{:02}", failure.permutation_index);
        output.color.save(directory.join(format!("{stem}_color.png")))?;
        quantize_depth(&output.depth).save(directory.join(format!("{stem}_depth.png")))?;
        std::fs::write(directory.join(format!("{stem}_tree.txt")), &failure.dump)?;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Set up logging for debugging and monitoring
    let level = if args.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let subscriber = tracing_subscriber::fmt().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cases = select_cases(&args)?;
    if cases.is_empty() {
        eprintln!("No test cases selected");
        return Ok(());
    }

    let mut device = WgpuDevice::new().await?;
    let shaders = wgsl_shaders();
    let mut failed = 0;

    for case in &cases {
        let result = match build_and_verify_all(&mut device, &shaders, &case.tree, case.options) {
            Ok(result) => result,
            Err(e) => {
                eprintln!("✗ {}/{}: {e}", case.group, case.name);
                failed += 1;
                continue;
            }
        };

        if result.pass {
            println!("✓ {}/{}: {} configurations verified", case.group, case.name, result.configurations_verified);
            continue;
        }

        failed += 1;
        let permutation = result.failing_permutation_index.map_or_else(|| "-".to_string(), |index| index.to_string());
        eprintln!("✗ {}/{}: {} failures, first at permutation {permutation}", case.group, case.name, result.failures.len());
        if let Some(dump) = &result.diagnostic_tree_dump {
            eprint!("{dump}");
        }

        if let Some(dump_dir) = &args.dump_dir {
            if let Err(e) = dump_failures(dump_dir, case, &result) {
                eprintln!("  Failed to dump images: {e}");
            }
        }
    }

    println!("{} of {} test cases passed", cases.len() - failed, cases.len());

    if failed > 0 {
        return Err(format!("{failed} test cases failed").into());
    }

    Ok(())
}
