//! Garbling and evaluation of boolean circuits using point-and-permute.
//!
//! Every wire gets two random labels and a random permutation bit (pbit). The table of a gate
//! has one row per combination of its *encrypted* input bits (`pbit ^ bit`), so the evaluator
//! can pick the single row it is able to decrypt without learning anything about the actual
//! bits. Rows are encrypted with ChaCha20Poly1305 under a key derived from the input labels.

use std::collections::BTreeMap;

use blake3::Hasher;
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit},
};
use rand::{CryptoRng, Rng};

use crate::{
    circuit::{self, Circuit, Gate},
    data_types::{InputAssignment, KeyPair, Label, OutputBits, WireId, WireInput},
};

/// Errors raised while garbling or evaluating a circuit.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The circuit is malformed.
    #[error(transparent)]
    Circuit(#[from] circuit::Error),
    /// A table row could not be (de-)serialized.
    #[error("malformed table row: {0}")]
    Serde(String),
    /// A table row could not be encrypted.
    #[error("encryption of a table row failed")]
    EncryptionFailed,
    /// The selected row of a gate could not be decrypted with the evaluator's keys.
    #[error("could not decrypt table row of gate {0}")]
    DecryptionFailed(WireId),
    /// An input wire has no key.
    #[error("no input key for wire {0}")]
    MissingInput(WireId),
    /// A gate has no table or a table of the wrong size.
    #[error("missing or malformed garbled table for gate {0}")]
    MalformedTable(WireId),
    /// An output wire has no permutation bit.
    #[error("no permutation bit for output wire {0}")]
    MissingOutputPbit(WireId),
}

/// The encrypted rows of a gate, indexed by the encrypted input bits.
pub type GarbledTable = Vec<Vec<u8>>;

/// The garbled tables of a circuit, by gate id.
pub type GarbledTables = BTreeMap<WireId, GarbledTable>;

#[derive(Debug)]
struct GarblingKey {
    label_a: Label,
    label_b: Label,
    gate: WireId,
    row: u8,
}

/// Derive a key from the garbling key components using BLAKE3 for key commitment.
fn derive_commitment_key(key: &Key, nonce: &Nonce) -> Key {
    let mut hasher = Hasher::new();
    hasher.update(key);
    hasher.update(nonce);
    let derived_key = hasher.finalize();
    Key::from_slice(derived_key.as_bytes()).to_owned()
}

fn key_and_nonce(
    GarblingKey {
        label_a,
        label_b,
        gate,
        row,
    }: &GarblingKey,
) -> (Key, Nonce) {
    let mut key = [0; 32];
    key[..16].copy_from_slice(&label_a.to_bytes());
    key[16..].copy_from_slice(&label_b.to_bytes());
    let mut nonce = [0; 12];
    nonce[..4].copy_from_slice(&gate.to_be_bytes());
    nonce[4] = *row;
    (key.into(), nonce.into())
}

fn encrypt(garbling_key: &GarblingKey, row: &WireInput) -> Result<Vec<u8>, Error> {
    let (key, nonce) = key_and_nonce(garbling_key);
    let cipher = ChaCha20Poly1305::new(&derive_commitment_key(&key, &nonce));
    let bytes = bincode::serialize(row).map_err(|e| Error::Serde(format!("{e:?}")))?;
    cipher
        .encrypt(&nonce, bytes.as_ref())
        .map_err(|_| Error::EncryptionFailed)
}

fn decrypt(garbling_key: &GarblingKey, bytes: &[u8]) -> Result<WireInput, Error> {
    let (key, nonce) = key_and_nonce(garbling_key);
    let cipher = ChaCha20Poly1305::new(&derive_commitment_key(&key, &nonce));
    let plaintext = cipher
        .decrypt(&nonce, bytes)
        .map_err(|_| Error::DecryptionFailed(garbling_key.gate))?;
    bincode::deserialize(&plaintext).map_err(|e| Error::Serde(format!("{e:?}")))
}

/// The second input wire of a binary gate. Unary gates use a zero label in its place.
fn second_input(gate: &Gate) -> Option<WireId> {
    gate.inputs.get(1).copied()
}

/// A garbled circuit together with the secrets only the garbler knows.
#[derive(Debug, Clone)]
pub struct GarbledCircuit {
    circuit: Circuit,
    keys: BTreeMap<WireId, KeyPair>,
    pbits: BTreeMap<WireId, bool>,
    tables: GarbledTables,
}

impl GarbledCircuit {
    /// Draws labels and pbits for every wire and encrypts the table of every gate.
    pub fn garble<R: CryptoRng + Rng>(circuit: Circuit, rng: &mut R) -> Result<Self, Error> {
        circuit.validate()?;
        let wires = circuit
            .garbler_inputs
            .iter()
            .chain(&circuit.evaluator_inputs)
            .chain(circuit.gates.iter().map(|g| &g.id));
        let mut keys = BTreeMap::new();
        let mut pbits = BTreeMap::new();
        for &w in wires {
            keys.insert(w, KeyPair(Label::random(rng), Label::random(rng)));
            pbits.insert(w, rng.random::<bool>());
        }

        let mut tables = GarbledTables::new();
        for gate in &circuit.gates {
            let (keys_out, pbit_out) = (keys[&gate.id], pbits[&gate.id]);
            let a = gate.inputs[0];
            let (keys_a, pbit_a) = (keys[&a], pbits[&a]);
            let b = second_input(gate).map(|b| (keys[&b], pbits[&b]));
            let rows = if b.is_some() { 4 } else { 2 };
            let mut table = Vec::with_capacity(rows);
            for row in 0..rows as u8 {
                let (enc_a, enc_b) = if b.is_some() {
                    (row >> 1 == 1, row & 1 == 1)
                } else {
                    (row == 1, false)
                };
                let bit_a = enc_a ^ pbit_a;
                let (label_b, bit_b) = match b {
                    Some((keys_b, pbit_b)) => (keys_b.key(enc_b ^ pbit_b), enc_b ^ pbit_b),
                    None => (Label(0), false),
                };
                let bit_out = gate.kind.apply(bit_a, bit_b);
                let key = GarblingKey {
                    label_a: keys_a.key(bit_a),
                    label_b,
                    gate: gate.id,
                    row,
                };
                table.push(encrypt(&key, &WireInput::new(&keys_out, pbit_out, bit_out))?);
            }
            tables.insert(gate.id, table);
        }
        Ok(Self {
            circuit,
            keys,
            pbits,
            tables,
        })
    }

    /// The plaintext circuit.
    pub fn circuit(&self) -> &Circuit {
        &self.circuit
    }

    /// The garbled tables, which are sent to the evaluator.
    pub fn tables(&self) -> &GarbledTables {
        &self.tables
    }

    /// The pbits of the output wires, which are sent to the evaluator to decode the result.
    pub fn output_pbits(&self) -> BTreeMap<WireId, bool> {
        self.circuit
            .outputs
            .iter()
            .map(|w| (*w, self.pbits[w]))
            .collect()
    }

    /// Both possible inputs of a wire, for bit 0 and bit 1.
    pub fn input_pair(&self, wire: WireId) -> Option<(WireInput, WireInput)> {
        let keys = self.keys.get(&wire)?;
        let pbit = *self.pbits.get(&wire)?;
        Some((
            WireInput::new(keys, pbit, false),
            WireInput::new(keys, pbit, true),
        ))
    }

    /// The inputs for the given wires and bits, taken pairwise in order.
    pub fn assign(&self, wires: &[WireId], bits: &[bool]) -> Result<InputAssignment, Error> {
        if wires.len() != bits.len() {
            return Err(circuit::Error::InputLength {
                expected: wires.len(),
                found: bits.len(),
            }
            .into());
        }
        wires
            .iter()
            .zip(bits)
            .map(|(&w, &bit)| match self.input_pair(w) {
                Some((zero, one)) => Ok((w, if bit { one } else { zero })),
                None => Err(Error::MissingInput(w)),
            })
            .collect()
    }

    /// Evaluates the garbled circuit with the garbler's own keys, without any interaction.
    pub fn evaluate_clear(
        &self,
        garbler_bits: &[bool],
        evaluator_bits: &[bool],
    ) -> Result<OutputBits, Error> {
        let garbler_inputs = self.assign(&self.circuit.garbler_inputs, garbler_bits)?;
        let evaluator_inputs = self.assign(&self.circuit.evaluator_inputs, evaluator_bits)?;
        evaluate(
            &self.circuit,
            &self.tables,
            &self.output_pbits(),
            &garbler_inputs,
            &evaluator_inputs,
        )
    }
}

/// Evaluates a garbled circuit given one key per input wire, returns the clear output bits.
pub fn evaluate(
    circuit: &Circuit,
    tables: &GarbledTables,
    output_pbits: &BTreeMap<WireId, bool>,
    garbler_inputs: &InputAssignment,
    evaluator_inputs: &InputAssignment,
) -> Result<OutputBits, Error> {
    circuit.validate()?;
    let mut values = InputAssignment::new();
    for &w in circuit.garbler_inputs.iter() {
        let input = garbler_inputs.get(&w).ok_or(Error::MissingInput(w))?;
        values.insert(w, *input);
    }
    for &w in circuit.evaluator_inputs.iter() {
        let input = evaluator_inputs.get(&w).ok_or(Error::MissingInput(w))?;
        values.insert(w, *input);
    }

    for gate in &circuit.gates {
        let a = values[&gate.inputs[0]];
        let b = second_input(gate).map(|b| values[&b]);
        let (row, label_b, rows) = match b {
            Some(b) => (
                (a.encrypted_bit as u8) << 1 | b.encrypted_bit as u8,
                b.key,
                4,
            ),
            None => (a.encrypted_bit as u8, Label(0), 2),
        };
        let table = tables
            .get(&gate.id)
            .filter(|t| t.len() == rows)
            .ok_or(Error::MalformedTable(gate.id))?;
        let key = GarblingKey {
            label_a: a.key,
            label_b,
            gate: gate.id,
            row,
        };
        values.insert(gate.id, decrypt(&key, &table[row as usize])?);
    }

    circuit
        .outputs
        .iter()
        .map(|&w| {
            let pbit = output_pbits.get(&w).ok_or(Error::MissingOutputPbit(w))?;
            Ok((w, values[&w].encrypted_bit ^ pbit))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;
    use crate::{
        circuit::GateKind,
        data_types::{from_bits, to_bits},
    };

    fn single_gate(kind: GateKind) -> Circuit {
        let inputs = if kind.arity() == 1 { vec![1] } else { vec![1, 2] };
        Circuit {
            id: format!("{kind:?}"),
            garbler_inputs: vec![1],
            evaluator_inputs: vec![2],
            outputs: vec![3],
            gates: vec![Gate {
                id: 3,
                kind,
                inputs,
            }],
        }
    }

    #[test]
    fn encrypt_decrypt() -> Result<(), Error> {
        let mut rng = ChaCha20Rng::seed_from_u64(0);
        let key = GarblingKey {
            label_a: Label::random(&mut rng),
            label_b: Label::random(&mut rng),
            gate: rng.random(),
            row: 3,
        };
        let row = WireInput {
            key: Label::random(&mut rng),
            encrypted_bit: true,
        };
        let encrypted = encrypt(&key, &row)?;
        assert_eq!(decrypt(&key, &encrypted)?, row);

        let wrong = GarblingKey { row: 2, ..key };
        assert!(matches!(
            decrypt(&wrong, &encrypted),
            Err(Error::DecryptionFailed(_))
        ));
        Ok(())
    }

    #[test]
    fn every_gate_kind_matches_its_truth_table() -> Result<(), Error> {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        use GateKind::*;
        for kind in [And, Or, Xor, Not, Nand, Nor, Xnor] {
            let garbled = GarbledCircuit::garble(single_gate(kind), &mut rng)?;
            assert_eq!(garbled.tables()[&3].len(), if kind == Not { 2 } else { 4 });
            for (a, b) in [(false, false), (false, true), (true, false), (true, true)] {
                let out = garbled.evaluate_clear(&[a], &[b])?;
                assert_eq!(out[&3], kind.apply(a, b), "{kind:?}({a}, {b})");
            }
        }
        Ok(())
    }

    #[test]
    fn maximum_is_exhaustively_correct_at_4_bits() -> Result<(), Error> {
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        let garbled = GarbledCircuit::garble(Circuit::maximum(4)?, &mut rng)?;
        let outputs = &garbled.circuit().outputs;
        for a in 0..16 {
            for b in 0..16 {
                let out = garbled.evaluate_clear(&to_bits(a, 4), &to_bits(b, 4))?;
                assert_eq!(from_bits(outputs.iter().map(|w| out[w])), a.max(b));
            }
        }
        Ok(())
    }

    #[test]
    fn wrong_keys_do_not_evaluate() -> Result<(), Error> {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let garbled = GarbledCircuit::garble(single_gate(GateKind::And), &mut rng)?;
        let circuit = garbled.circuit();
        let garbler = garbled.assign(&[1], &[true])?;
        let mut evaluator = garbled.assign(&[2], &[false])?;
        if let Some(input) = evaluator.get_mut(&2) {
            input.key = Label::random(&mut rng);
        }
        let result = evaluate(
            circuit,
            garbled.tables(),
            &garbled.output_pbits(),
            &garbler,
            &evaluator,
        );
        assert!(matches!(result, Err(Error::DecryptionFailed(3))));

        let result = evaluate(
            circuit,
            garbled.tables(),
            &garbled.output_pbits(),
            &garbler,
            &InputAssignment::new(),
        );
        assert!(matches!(result, Err(Error::MissingInput(2))));
        Ok(())
    }

    #[test]
    fn input_pairs_differ_in_key_and_bit() -> Result<(), Error> {
        let mut rng = ChaCha20Rng::seed_from_u64(4);
        let garbled = GarbledCircuit::garble(Circuit::maximum(2)?, &mut rng)?;
        let (zero, one) = garbled.input_pair(3).ok_or(Error::MissingInput(3))?;
        assert_ne!(zero.key, one.key);
        assert_ne!(zero.encrypted_bit, one.encrypted_bit);
        assert!(garbled.input_pair(1000).is_none());
        Ok(())
    }
}
