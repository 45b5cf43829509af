//! Boolean circuits as exchanged between the parties, plus a generator for the maximum circuit.
//!
//! Circuits are described in JSON, using the field names `alice` / `bob` for the input wires of
//! the garbler / evaluator, `out` for the output wires and `type` / `in` for a gate's kind and
//! input wires. Every gate defines the wire that carries its own id.

use std::{collections::BTreeSet, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::data_types::{OutputBits, Party, WireId};

/// Errors raised while loading or checking a circuit.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The circuit file could not be read.
    #[error("could not read circuit file: {0}")]
    Io(#[from] std::io::Error),
    /// The circuit file is not valid JSON in the expected layout.
    #[error("could not parse circuit file: {0}")]
    Json(#[from] serde_json::Error),
    /// A wire is defined more than once (as an input or as a gate output).
    #[error("wire {0} is defined more than once")]
    DuplicateWire(WireId),
    /// A gate has the wrong number of inputs for its kind.
    #[error("gate {gate} of type {kind:?} expects {expected} inputs, found {found}")]
    Arity {
        /// The offending gate.
        gate: WireId,
        /// Its kind.
        kind: GateKind,
        /// The arity of the kind.
        expected: usize,
        /// The number of inputs the gate has.
        found: usize,
    },
    /// A gate reads a wire that has not been defined before it.
    #[error("gate {gate} uses wire {wire} before it is defined")]
    UndefinedWire {
        /// The offending gate.
        gate: WireId,
        /// The wire it reads.
        wire: WireId,
    },
    /// An output wire is never defined.
    #[error("output wire {0} is not defined")]
    UndefinedOutput(WireId),
    /// The number of input bits does not match the circuit.
    #[error("expected {expected} input bits, got {found}")]
    InputLength {
        /// The number of input wires.
        expected: usize,
        /// The number of bits provided.
        found: usize,
    },
    /// Maximum circuits are only supported for bit widths from 1 to 63.
    #[error("unsupported bit width {0}, must be between 1 and 63")]
    BitWidth(u32),
    /// The outputs do not fit into a decoded `u64` result.
    #[error("circuit has {0} output wires, at most {MAX_OUTPUTS} are supported")]
    TooManyOutputs(usize),
}

/// The maximum number of output wires, so that every result decodes into a `u64`.
pub const MAX_OUTPUTS: usize = 63;

/// The supported boolean gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GateKind {
    /// `a & b`
    And,
    /// `a | b`
    Or,
    /// `a ^ b`
    Xor,
    /// `!a`
    Not,
    /// `!(a & b)`
    Nand,
    /// `!(a | b)`
    Nor,
    /// `!(a ^ b)`
    Xnor,
}

impl GateKind {
    /// The number of input wires of the gate.
    pub fn arity(self) -> usize {
        match self {
            GateKind::Not => 1,
            _ => 2,
        }
    }

    /// Applies the gate to its inputs. `b` is ignored for unary gates.
    pub fn apply(self, a: bool, b: bool) -> bool {
        match self {
            GateKind::And => a & b,
            GateKind::Or => a | b,
            GateKind::Xor => a ^ b,
            GateKind::Not => !a,
            GateKind::Nand => !(a & b),
            GateKind::Nor => !(a | b),
            GateKind::Xnor => !(a ^ b),
        }
    }
}

/// A single gate; its output is the wire with the gate's id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gate {
    /// The gate's output wire.
    pub id: WireId,
    /// The gate's kind.
    #[serde(rename = "type")]
    pub kind: GateKind,
    /// The input wires, in order.
    #[serde(rename = "in")]
    pub inputs: Vec<WireId>,
}

/// A boolean circuit over the garbler's and the evaluator's input wires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Circuit {
    /// A human-readable name.
    pub id: String,
    /// Input wires of the garbler, most significant bit first.
    #[serde(rename = "alice", default)]
    pub garbler_inputs: Vec<WireId>,
    /// Input wires of the evaluator, most significant bit first.
    #[serde(rename = "bob", default)]
    pub evaluator_inputs: Vec<WireId>,
    /// Output wires, most significant bit first.
    #[serde(rename = "out")]
    pub outputs: Vec<WireId>,
    /// The gates in topological order.
    pub gates: Vec<Gate>,
}

/// A file of several circuits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitFile {
    /// The name of the collection.
    pub name: String,
    /// The circuits, in the order they are run.
    pub circuits: Vec<Circuit>,
}

impl CircuitFile {
    /// Parses and validates a JSON circuit file.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let file: CircuitFile = serde_json::from_str(json)?;
        for circuit in &file.circuits {
            circuit.validate()?;
        }
        Ok(file)
    }

    /// Reads, parses and validates a JSON circuit file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

impl Circuit {
    /// Checks that the circuit is well-formed: wires are defined exactly once and before they are
    /// used, gates have the right arity and all of at most [`MAX_OUTPUTS`] outputs exist.
    pub fn validate(&self) -> Result<(), Error> {
        if self.outputs.len() > MAX_OUTPUTS {
            return Err(Error::TooManyOutputs(self.outputs.len()));
        }
        let mut defined = BTreeSet::new();
        for &w in self.garbler_inputs.iter().chain(&self.evaluator_inputs) {
            if !defined.insert(w) {
                return Err(Error::DuplicateWire(w));
            }
        }
        for gate in &self.gates {
            if gate.inputs.len() != gate.kind.arity() {
                return Err(Error::Arity {
                    gate: gate.id,
                    kind: gate.kind,
                    expected: gate.kind.arity(),
                    found: gate.inputs.len(),
                });
            }
            if let Some(&wire) = gate.inputs.iter().find(|w| !defined.contains(w)) {
                return Err(Error::UndefinedWire {
                    gate: gate.id,
                    wire,
                });
            }
            if !defined.insert(gate.id) {
                return Err(Error::DuplicateWire(gate.id));
            }
        }
        match self.outputs.iter().find(|w| !defined.contains(w)) {
            Some(&w) => Err(Error::UndefinedOutput(w)),
            None => Ok(()),
        }
    }

    /// The total number of input wires of both parties.
    pub fn input_count(&self) -> usize {
        self.garbler_inputs.len() + self.evaluator_inputs.len()
    }

    /// The party that provides the value of a wire.
    pub fn party_of(&self, wire: WireId) -> Party {
        if self.garbler_inputs.contains(&wire) {
            Party::Garbler
        } else if self.evaluator_inputs.contains(&wire) {
            Party::Evaluator
        } else {
            Party::Internal
        }
    }

    /// Evaluates the circuit on plaintext bits, ordered like the input wires.
    pub fn evaluate_plain(
        &self,
        garbler_bits: &[bool],
        evaluator_bits: &[bool],
    ) -> Result<OutputBits, Error> {
        self.validate()?;
        for (wires, bits) in [
            (&self.garbler_inputs, garbler_bits),
            (&self.evaluator_inputs, evaluator_bits),
        ] {
            if wires.len() != bits.len() {
                return Err(Error::InputLength {
                    expected: wires.len(),
                    found: bits.len(),
                });
            }
        }
        let mut values: OutputBits = self
            .garbler_inputs
            .iter()
            .chain(&self.evaluator_inputs)
            .copied()
            .zip(garbler_bits.iter().chain(evaluator_bits).copied())
            .collect();
        for gate in &self.gates {
            // wires and arities were checked above
            let a = values[&gate.inputs[0]];
            let b = gate.inputs.get(1).map_or(a, |w| values[w]);
            values.insert(gate.id, gate.kind.apply(a, b));
        }
        self.outputs
            .iter()
            .map(|&w| match values.get(&w) {
                Some(&bit) => Ok((w, bit)),
                None => Err(Error::UndefinedOutput(w)),
            })
            .collect()
    }

    /// Builds the circuit computing `max(a, b)` of two `bit_width`-bit numbers.
    ///
    /// The garbler's bits are on wires `1..=n`, the evaluator's on `n+1..=2n`, both most
    /// significant bit first. A comparator walks the bits from the top, tracking whether `a > b`
    /// (`gt`) and whether all bits so far are equal (`eq`); the output then selects `a` where
    /// `gt` is set and `b` otherwise, bit by bit as `b ^ (gt & (a ^ b))`.
    pub fn maximum(bit_width: u32) -> Result<Self, Error> {
        if !(1..=63).contains(&bit_width) {
            return Err(Error::BitWidth(bit_width));
        }
        let n = bit_width;
        let a: Vec<WireId> = (1..=n).collect();
        let b: Vec<WireId> = (n + 1..=2 * n).collect();
        let mut builder = Builder {
            next: 2 * n + 1,
            gates: vec![],
        };

        let not_b = builder.gate(GateKind::Not, &[b[0]]);
        let mut gt = builder.gate(GateKind::And, &[a[0], not_b]);
        let mut eq = builder.gate(GateKind::Xnor, &[a[0], b[0]]);
        for i in 1..n as usize {
            let not_b = builder.gate(GateKind::Not, &[b[i]]);
            let a_gt_b = builder.gate(GateKind::And, &[a[i], not_b]);
            let still_gt = builder.gate(GateKind::And, &[eq, a_gt_b]);
            gt = builder.gate(GateKind::Or, &[gt, still_gt]);
            if i + 1 < n as usize {
                let same = builder.gate(GateKind::Xnor, &[a[i], b[i]]);
                eq = builder.gate(GateKind::And, &[eq, same]);
            }
        }
        let outputs = a
            .iter()
            .zip(&b)
            .map(|(&a, &b)| {
                let diff = builder.gate(GateKind::Xor, &[a, b]);
                let select = builder.gate(GateKind::And, &[gt, diff]);
                builder.gate(GateKind::Xor, &[b, select])
            })
            .collect();

        Ok(Circuit {
            id: format!("{n}-bit maximum"),
            garbler_inputs: a,
            evaluator_inputs: b,
            outputs,
            gates: builder.gates,
        })
    }
}

struct Builder {
    next: WireId,
    gates: Vec<Gate>,
}

impl Builder {
    fn gate(&mut self, kind: GateKind, inputs: &[WireId]) -> WireId {
        let id = self.next;
        self.next += 1;
        self.gates.push(Gate {
            id,
            kind,
            inputs: inputs.to_vec(),
        });
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::{from_bits, to_bits};

    const SMART_MAX: &str = r#"{
        "name": "max",
        "circuits": [
            {
                "id": "1-bit max",
                "alice": [1],
                "bob": [2],
                "out": [3],
                "gates": [{"id": 3, "type": "OR", "in": [1, 2]}]
            },
            {
                "id": "nand",
                "alice": [1],
                "bob": [2],
                "out": [4],
                "gates": [
                    {"id": 3, "type": "AND", "in": [1, 2]},
                    {"id": 4, "type": "NOT", "in": [3]}
                ]
            }
        ]
    }"#;

    #[test]
    fn parses_json_circuits() -> Result<(), Error> {
        let file = CircuitFile::from_json(SMART_MAX)?;
        assert_eq!(file.name, "max");
        assert_eq!(file.circuits.len(), 2);
        let nand = &file.circuits[1];
        assert_eq!(nand.gates[1].kind, GateKind::Not);
        assert_eq!(nand.party_of(1), Party::Garbler);
        assert_eq!(nand.party_of(2), Party::Evaluator);
        assert_eq!(nand.party_of(3), Party::Internal);
        for (a, b) in [(false, false), (false, true), (true, false), (true, true)] {
            let out = nand.evaluate_plain(&[a], &[b])?;
            assert_eq!(out[&4], !(a & b));
        }
        Ok(())
    }

    #[test]
    fn rejects_malformed_circuits() {
        let mut c = Circuit::maximum(2).unwrap();
        c.gates[0].inputs.push(1);
        assert!(matches!(c.validate(), Err(Error::Arity { found: 2, .. })));

        let mut c = Circuit::maximum(2).unwrap();
        c.gates.swap(0, 1);
        assert!(matches!(c.validate(), Err(Error::UndefinedWire { .. })));

        let mut c = Circuit::maximum(2).unwrap();
        c.evaluator_inputs[0] = 1;
        assert!(matches!(c.validate(), Err(Error::DuplicateWire(1))));

        let mut c = Circuit::maximum(2).unwrap();
        c.outputs.push(1000);
        assert!(matches!(c.validate(), Err(Error::UndefinedOutput(1000))));

        assert!(matches!(
            CircuitFile::from_json(r#"{"name": "x", "circuits": [{"id": "x"}]}"#),
            Err(Error::Json(_))
        ));
    }

    /// An OR gate followed by `and_gates` AND gates, all of them outputs.
    fn wide_output_circuit(and_gates: WireId) -> Circuit {
        let mut gates = vec![Gate {
            id: 3,
            kind: GateKind::Or,
            inputs: vec![1, 2],
        }];
        gates.extend((4..4 + and_gates).map(|id| Gate {
            id,
            kind: GateKind::And,
            inputs: vec![1, 2],
        }));
        Circuit {
            id: "wide".into(),
            garbler_inputs: vec![1],
            evaluator_inputs: vec![2],
            outputs: gates.iter().map(|g| g.id).collect(),
            gates,
        }
    }

    #[test]
    fn rejects_more_outputs_than_a_result_holds() -> Result<(), Error> {
        let fits = wide_output_circuit(62);
        assert_eq!(fits.outputs.len(), MAX_OUTPUTS);
        fits.validate()?;
        let out = fits.evaluate_plain(&[true], &[false])?;
        assert_eq!(from_bits(fits.outputs.iter().map(|w| out[w])), 1 << 62);

        let wide = wide_output_circuit(64);
        assert!(matches!(wide.validate(), Err(Error::TooManyOutputs(65))));
        assert!(matches!(
            wide.evaluate_plain(&[true], &[false]),
            Err(Error::TooManyOutputs(65))
        ));
        let json = serde_json::to_string(&CircuitFile {
            name: "wide".into(),
            circuits: vec![wide],
        })?;
        assert!(matches!(
            CircuitFile::from_json(&json),
            Err(Error::TooManyOutputs(65))
        ));
        Ok(())
    }

    #[test]
    fn maximum_circuit_is_exhaustively_correct() -> Result<(), Error> {
        for n in 1..=4 {
            let c = Circuit::maximum(n)?;
            c.validate()?;
            for a in 0..(1u64 << n) {
                for b in 0..(1u64 << n) {
                    let out = c.evaluate_plain(&to_bits(a, n), &to_bits(b, n))?;
                    let result = from_bits(c.outputs.iter().map(|w| out[w]));
                    assert_eq!(result, a.max(b), "max({a}, {b}) at {n} bits");
                }
            }
        }
        Ok(())
    }

    #[test]
    fn maximum_circuit_handles_wide_inputs() -> Result<(), Error> {
        let c = Circuit::maximum(63)?;
        c.validate()?;
        let (a, b) = ((1u64 << 62) + 12345, (1u64 << 62) + 12346);
        let out = c.evaluate_plain(&to_bits(a, 63), &to_bits(b, 63))?;
        assert_eq!(from_bits(c.outputs.iter().map(|w| out[w])), b);
        assert!(matches!(Circuit::maximum(0), Err(Error::BitWidth(0))));
        assert!(matches!(Circuit::maximum(64), Err(Error::BitWidth(64))));
        Ok(())
    }
}
