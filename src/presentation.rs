//! Human-readable views of a garbled circuit, selected by a [`PresentationMode`].

use std::{fmt, fmt::Write, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    data_types::{WireId, to_bits},
    garble::{self, GarbledCircuit},
};

/// Truth tables are only printed up to this many input bits.
pub const MAX_TRUTH_TABLE_INPUTS: usize = 16;

/// How a circuit is presented while it is run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PresentationMode {
    /// The full truth table of the circuit, obtained by evaluating the garbled circuit locally.
    Circuit,
    /// The garbled tables of all gates.
    Table,
    /// Nothing.
    #[default]
    None,
}

/// An unknown presentation mode name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown presentation mode '{0}', must be one of 'circuit', 'table' or 'none'")]
pub struct UnknownMode(pub String);

impl FromStr for PresentationMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "circuit" => Ok(PresentationMode::Circuit),
            "table" => Ok(PresentationMode::Table),
            "none" => Ok(PresentationMode::None),
            _ => Err(UnknownMode(s.to_string())),
        }
    }
}

impl fmt::Display for PresentationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PresentationMode::Circuit => "circuit",
            PresentationMode::Table => "table",
            PresentationMode::None => "none",
        };
        f.write_str(name)
    }
}

impl PresentationMode {
    /// Renders the circuit according to the mode. [`PresentationMode::None`] renders nothing.
    pub fn render(self, garbled: &GarbledCircuit) -> Result<String, garble::Error> {
        match self {
            PresentationMode::Circuit => truth_table(garbled),
            PresentationMode::Table => Ok(garbled_tables(garbled)),
            PresentationMode::None => Ok(String::new()),
        }
    }
}

fn bit_list(bits: &[bool]) -> String {
    let bits: Vec<&str> = bits.iter().map(|&b| if b { "1" } else { "0" }).collect();
    bits.join(" ")
}

/// Evaluates the circuit for every combination of inputs, one line per combination.
pub fn truth_table(garbled: &GarbledCircuit) -> Result<String, garble::Error> {
    let circuit = garbled.circuit();
    let (a, b) = (&circuit.garbler_inputs, &circuit.evaluator_inputs);
    let n = circuit.input_count();
    let mut out = format!("======== {} ========\n", circuit.id);
    if n > MAX_TRUTH_TABLE_INPUTS {
        let _ = writeln!(
            out,
            "  truth table skipped, {n} input bits exceed the limit of {MAX_TRUTH_TABLE_INPUTS}"
        );
        return Ok(out);
    }
    for combination in 0..1u64 << n {
        let bits = to_bits(combination, n as u32);
        let (bits_a, bits_b) = bits.split_at(a.len());
        let result = garbled.evaluate_clear(bits_a, bits_b)?;
        let outputs: Vec<bool> = circuit.outputs.iter().map(|w| result[w]).collect();
        let _ = writeln!(
            out,
            "  Garbler{a:?} = {} Evaluator{b:?} = {}  Outputs{:?} = {}",
            bit_list(bits_a),
            bit_list(bits_b),
            circuit.outputs,
            bit_list(&outputs)
        );
    }
    Ok(out)
}

/// Lists the encrypted rows of every gate, shortened to their first bytes.
pub fn garbled_tables(garbled: &GarbledCircuit) -> String {
    let circuit = garbled.circuit();
    let mut out = format!("======== {} ========\n", circuit.id);
    for gate in &circuit.gates {
        let _ = writeln!(out, "  gate {} {:?}{:?}", gate.id, gate.kind, gate.inputs);
        let rows = garbled.tables().get(&gate.id).map(Vec::as_slice).unwrap_or(&[]);
        for (i, row) in rows.iter().enumerate() {
            let hex: String = row.iter().take(8).map(|b| format!("{b:02x}")).collect();
            let _ = writeln!(out, "    [{i}] {hex}...");
        }
    }
    out
}

/// One line describing a circuit, used when a circuit is received.
pub fn summary(id: &str, inputs: (&[WireId], &[WireId]), gates: usize) -> String {
    format!(
        "circuit '{id}': {} garbler inputs, {} evaluator inputs, {gates} gates",
        inputs.0.len(),
        inputs.1.len()
    )
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;
    use crate::circuit::Circuit;

    #[test]
    fn parses_mode_names() {
        assert_eq!("circuit".parse::<PresentationMode>(), Ok(PresentationMode::Circuit));
        assert_eq!("table".parse::<PresentationMode>(), Ok(PresentationMode::Table));
        assert_eq!("none".parse::<PresentationMode>(), Ok(PresentationMode::None));

        let mut mode = PresentationMode::Table;
        if let Ok(parsed) = "verbose".parse() {
            mode = parsed;
        }
        assert_eq!(mode, PresentationMode::Table);
        assert_eq!(
            "verbose".parse::<PresentationMode>(),
            Err(UnknownMode("verbose".into()))
        );
        assert_eq!(PresentationMode::Circuit.to_string(), "circuit");
    }

    #[test]
    fn renders_truth_table_and_tables() -> Result<(), garble::Error> {
        let mut rng = ChaCha20Rng::seed_from_u64(0);
        let garbled = GarbledCircuit::garble(Circuit::maximum(2)?, &mut rng)?;

        let table = PresentationMode::Circuit.render(&garbled)?;
        assert_eq!(table.lines().count(), 1 + 16);
        assert!(table.contains("Garbler[1, 2] = 1 0 Evaluator[3, 4] = 0 1"));
        assert!(
            table
                .lines()
                .any(|l| l.starts_with("  Garbler[1, 2] = 0 1 Evaluator[3, 4] = 1 0")
                    && l.ends_with("= 1 0"))
        );

        let tables = PresentationMode::Table.render(&garbled)?;
        assert!(tables.contains("gate 5 Not[3]"));
        assert!(PresentationMode::None.render(&garbled)?.is_empty());
        Ok(())
    }

    #[test]
    fn skips_large_truth_tables() -> Result<(), garble::Error> {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let garbled = GarbledCircuit::garble(Circuit::maximum(9)?, &mut rng)?;
        let table = truth_table(&garbled)?;
        assert_eq!(table.lines().count(), 2);
        assert!(table.contains("skipped"));
        Ok(())
    }
}
