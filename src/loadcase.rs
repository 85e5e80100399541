use crate::network::Network;
use crate::result::CalcResult;
use anyhow::{format_err, Context, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Reads a network from a JSON file.
pub fn load_network(path: &Path) -> Result<Network> {
    let is_json = match path.extension() {
        None => false,
        Some(os_str) => os_str.to_str() == Some("json"),
    };
    if !is_json {
        return Err(format_err!(
            "unsupported network file {} (expected .json)",
            path.display()
        ));
    }

    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let network: Network = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing {}", path.display()))?;
    log::debug!(
        "loaded {}: {} nodes, {} cables, {} cable types",
        path.display(),
        network.nodes.len(),
        network.cables.len(),
        network.cable_types.len()
    );
    Ok(network)
}

/// Writes calculation results to a JSON file.
pub fn write_results(path: &Path, results: &[CalcResult]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), results)?;
    Ok(())
}
