//! Stage assignment dumping tool
//!
//! This binary enumerates the unique stage assignments of either a YAML tree
//! manifest or every predefined tree, and dumps them to a single JSON file.

use pipelink::{StageAssignment, TreeConfiguration, predefined_trees, unique_assignments};
use serde::Serialize;
use std::{collections::BTreeMap, env, fs, process};

/// Where a dumped tree came from
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
enum TreeSource {
    Predefined,
    Manifest,
}

/// Every unique assignment of one tree
#[derive(Debug, Serialize)]
struct TreeDump {
    source: TreeSource,
    tree: TreeConfiguration,
    /// Permutations skipped because they produced an already seen signature
    skipped: usize,
    assignments: Vec<StageAssignment>,
}

impl TreeDump {
    fn new(source: TreeSource, tree: TreeConfiguration) -> Self {
        let mut unique = unique_assignments(&tree);
        let assignments: Vec<StageAssignment> = unique.by_ref().collect();
        let skipped = unique.skipped();

        Self { source, tree, skipped, assignments }
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();

    if args.len() != 2 && args.len() != 3 {
        eprintln!("Usage: {} <output_file> [tree_manifest]", args[0]);
        eprintln!("Enumerates the unique stage assignments of pipeline library trees and dumps them to a JSON file");
        eprintln!("  output_file:   Path to the output JSON file");
        eprintln!("  tree_manifest: Optional YAML tree manifest (default is every predefined tree)");
        process::exit(1);
    }

    let output_file = &args[1];
    let mut dumps = BTreeMap::new();

    match args.get(2) {
        Some(manifest) => match TreeConfiguration::from_file(manifest) {
            Ok(tree) => {
                dumps.insert(tree.name(), TreeDump::new(TreeSource::Manifest, tree));
            }
            Err(e) => {
                eprintln!("Error loading tree manifest '{manifest}': {e}");
                process::exit(1);
            }
        },
        None => match predefined_trees() {
            Ok(trees) => {
                for tree in trees {
                    dumps.insert(tree.name(), TreeDump::new(TreeSource::Predefined, tree));
                }
            }
            Err(e) => {
                eprintln!("Error building predefined trees: {e}");
                process::exit(1);
            }
        },
    }

    for (name, dump) in &dumps {
        println!("Tree {name}: {} unique assignments, {} duplicates skipped", dump.assignments.len(), dump.skipped);
    }

    match serde_json::to_string_pretty(&dumps) {
        Ok(json) => {
            if let Err(e) = fs::write(output_file, json) {
                eprintln!("Error writing output file '{output_file}': {e}");
                process::exit(1);
            }
            println!("Successfully wrote {} trees to '{}'", dumps.len(), output_file);
        }
        Err(e) => {
            eprintln!("Error serializing assignments to JSON: {e}");
            process::exit(1);
        }
    }
}
