//! Population files.
//!
//! The first line is the generation counter. Every following line is one
//! organism genome, best first.

use std::fs;
use std::path::Path;

use super::{IncubatorError, Organism};

/// Contents of a population file, genomes still encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopulationFile {
    pub iteration: u64,
    pub genomes: Vec<String>,
}

impl PopulationFile {
    pub fn from_organisms(iteration: u64, organisms: &[&Organism]) -> Result<Self, IncubatorError> {
        let genomes = organisms
            .iter()
            .enumerate()
            .map(|(i, organism)| {
                organism
                    .to_genome()
                    .map_err(|e| IncubatorError::MalformedPopulation {
                        line: i + 2,
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { iteration, genomes })
    }

    pub fn parse(content: &str) -> Result<Self, IncubatorError> {
        let mut lines = content.lines();
        let iteration = lines
            .next()
            .and_then(|line| line.trim().parse::<u64>().ok())
            .ok_or_else(|| IncubatorError::MalformedPopulation {
                line: 1,
                reason: "missing generation counter".to_string(),
            })?;
        let genomes = lines.map(str::to_string).collect();
        Ok(Self { iteration, genomes })
    }

    pub fn read(path: &Path) -> Result<Self, IncubatorError> {
        Self::parse(&fs::read_to_string(path)?)
    }

    pub fn write(&self, path: &Path) -> Result<(), IncubatorError> {
        let mut content = format!("{}\n", self.iteration);
        for genome in &self.genomes {
            content.push_str(genome);
            content.push('\n');
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Decode every genome on the calling thread.
    pub fn organisms(&self) -> Result<Vec<Organism>, IncubatorError> {
        self.genomes
            .iter()
            .enumerate()
            .map(|(i, genome)| {
                Organism::from_genome(genome).map_err(|e| IncubatorError::MalformedPopulation {
                    line: i + 2,
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    /// The first organism, which is the top when written by an incubator.
    pub fn top(&self) -> Result<Option<Organism>, IncubatorError> {
        Ok(self.organisms()?.into_iter().next())
    }
}
