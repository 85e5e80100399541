use anyhow::Result;
use std::env;
use std::fs;
use std::path::Path;

use crate::loadcase::{load_network, write_results};
use crate::network::{ConnectionType, InstallationMode, Network, Phase, VoltageSystem};
use crate::opt::CalcOpt;
use crate::pf::solve;
use crate::result::CalcResult;

const NETWORK: &str = r#"{
  "voltage_system": "TETRA_400",
  "nodes": [
    {
      "id": "src",
      "is_source": true,
      "position": { "lat": 45.0, "lon": 5.0 }
    },
    {
      "id": "n1",
      "name": "Rue des Lilas",
      "connection": "MONO_230V_PN",
      "position": { "lat": 45.001, "lon": 5.0 },
      "loads": [
        { "id": "house", "power_kva": 6.0, "phase": "B" }
      ],
      "productions": [
        { "id": "pv", "power_kva": 3.0, "active_kw": 3.0, "reactive_kvar": 0.0 }
      ]
    }
  ],
  "cables": [
    {
      "id": "c1",
      "node_a": "src",
      "node_b": "n1",
      "cable_type": "baxb-95",
      "installation": "AERIEN",
      "coordinates": [
        { "lat": 45.0, "lon": 5.0 },
        { "lat": 45.001, "lon": 5.0 }
      ]
    }
  ],
  "cable_types": [
    {
      "id": "baxb-95",
      "label": "BAXB 95",
      "r12": 0.32,
      "x12": 0.08,
      "r0": 1.28,
      "x0": 0.08,
      "installation_modes": ["AERIEN"]
    }
  ],
  "transformer": {
    "rated_power_kva": 100.0,
    "rated_voltage": 400.0,
    "short_circuit_percent": 4.0,
    "power_factor": 0.95
  },
  "regulators": [
    { "node_id": "n1", "enabled": false }
  ]
}"#;

#[test]
fn test_parse_network() -> Result<()> {
    let net: Network = serde_json::from_str(NETWORK)?;

    assert_eq!(net.voltage_system, VoltageSystem::Tetra400);
    assert_eq!(net.nodes.len(), 2);
    assert!(net.nodes[0].is_source);
    assert_eq!(net.nodes[0].connection, ConnectionType::Tetra400);
    assert_eq!(net.nodes[1].connection, ConnectionType::MonoPhaseNeutral);
    assert_eq!(net.nodes[1].loads[0].phase, Some(Phase::B));
    assert_eq!(net.nodes[1].productions[0].active_kw, Some(3.0));
    assert_eq!(net.cables[0].installation, InstallationMode::Aerial);
    assert_eq!(net.transformer.as_ref().and_then(|tr| tr.xr_ratio), None);

    let reg = &net.regulators[0];
    assert!(!reg.enabled);
    assert_eq!(reg.max_load_kva, 100.0);
    assert_eq!(reg.max_production_kva, 85.0);
    assert_eq!(reg.max_input_voltage, 246.0);
    Ok(())
}

#[test]
fn test_load_and_write() -> Result<()> {
    let dir = env::temp_dir().join(format!("lvflow-netcase-{}", std::process::id()));
    fs::create_dir_all(&dir)?;
    let input = dir.join("network.json");
    fs::write(&input, NETWORK)?;

    let net = load_network(&input)?;
    let result = solve(&net, &CalcOpt::default())?;
    assert!(result.converged);
    assert!(result.warnings.is_empty());

    let output = dir.join("results.json");
    write_results(&output, &[result.clone()])?;
    let back: Vec<CalcResult> = serde_json::from_str(&fs::read_to_string(&output)?)?;
    assert_eq!(back.len(), 1);
    assert_eq!(back[0].scenario, result.scenario);
    assert_eq!(back[0].node_metrics.len(), 2);

    fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn test_rejects_unknown_format() {
    assert!(load_network(Path::new("network.case")).is_err());
    assert!(load_network(Path::new("does-not-exist.json")).is_err());
}
