//! JSON I/O for run configurations and results.

use crate::sim::simulation::{SimulationConfig, SimulationResult};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Reads one run configuration from a JSON file.
///
/// # Example
/// ```no_run
/// use panel_thermal::io::read_config;
/// use std::path::Path;
///
/// let config = read_config(Path::new("panel.json")).unwrap();
/// println!("{} layers", config.layers.len());
/// ```
pub fn read_config(path: &Path) -> Result<SimulationConfig> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open config: {}", path.display()))?;
    let reader = BufReader::new(file);

    let config: SimulationConfig = serde_json::from_reader(reader)
        .with_context(|| format!("Failed to parse config from: {}", path.display()))?;

    Ok(config)
}

/// Reads a batch file: a JSON array of run configurations.
pub fn read_batch(path: &Path) -> Result<Vec<SimulationConfig>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open batch file: {}", path.display()))?;
    let reader = BufReader::new(file);

    serde_json::from_reader(reader)
        .with_context(|| format!("Failed to parse batch from: {}", path.display()))
}

/// Writes a run configuration to a JSON file.
pub fn write_config(path: &Path, config: &SimulationConfig) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    let writer = BufWriter::new(file);

    serde_json::to_writer_pretty(writer, config)
        .with_context(|| format!("Failed to serialize config to: {}", path.display()))?;

    Ok(())
}

/// Writes a run result (geometry, snapshots, statistics, ledger) to a JSON file.
pub fn write_result(path: &Path, result: &SimulationResult) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    let writer = BufWriter::new(file);

    serde_json::to_writer_pretty(writer, result)
        .with_context(|| format!("Failed to serialize result to: {}", path.display()))?;

    Ok(())
}

/// Reads a result previously written by [`write_result`].
pub fn read_result(path: &Path) -> Result<SimulationResult> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open result: {}", path.display()))?;
    let reader = BufReader::new(file);

    serde_json::from_reader(reader)
        .with_context(|| format!("Failed to parse result from: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::heat_transfer::GridConfig;
    use crate::sim::simulation::{IlluminationInput, run_simulation};
    use tempfile::tempdir;

    #[test]
    fn test_write_and_read_config() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("panel.json");

        let original = SimulationConfig::reference_2d();
        write_config(&path, &original)?;
        let loaded = read_config(&path)?;

        assert_eq!(loaded.name, original.name);
        assert_eq!(loaded.layers.len(), 6);
        assert_eq!(loaded.heat_sources[0].name, "asic_die");
        assert!(loaded.grid.lateral.is_some());
        assert_eq!(loaded.run.scheme, original.run.scheme);

        Ok(())
    }

    #[test]
    fn test_read_batch() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("batch.json");
        let configs = vec![SimulationConfig::reference_1d(), SimulationConfig::reference_2d()];
        std::fs::write(&path, serde_json::to_string(&configs)?)?;

        let loaded = read_batch(&path)?;
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].name.as_deref(), Some("reference-2d"));

        Ok(())
    }

    #[test]
    fn test_result_roundtrip() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("result.json");

        let mut config = SimulationConfig::reference_1d();
        config.grid = GridConfig::one_dimensional(11);
        config.run.total_time = Some(30.0);
        config.illumination = IlluminationInput::Constant { fraction: 0.5 };
        let result = run_simulation(&config)?;

        write_result(&path, &result)?;
        let loaded = read_result(&path)?;

        assert_eq!(loaded.snapshots.len(), result.snapshots.len());
        assert_eq!(loaded.final_state.step, result.final_state.step);
        assert_eq!(loaded.geometry.ny, 11);
        let (a, b) = (loaded.region("pcb").unwrap(), result.region("pcb").unwrap());
        assert!((a.mean - b.mean).abs() < 1e-9);

        Ok(())
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = read_config(Path::new("/nonexistent/panel.json")).unwrap_err();
        assert!(format!("{err}").contains("Failed to open config"));
    }
}
