//! Data types shared between the garbling scheme, the oblivious transfer and the protocol.

use std::{collections::BTreeMap, fmt};

use rand::{CryptoRng, Rng};
use serde::{Deserialize, Serialize};

/// Identifier of a wire in a circuit.
pub type WireId = u32;

/// The party a wire belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Party {
    /// An input wire of the garbler.
    Garbler,
    /// An input wire of the evaluator.
    Evaluator,
    /// A gate output wire.
    Internal,
}

/// A wire key: 16 opaque bytes that stand for one of the two values of a wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label(pub u128);

impl Label {
    /// Draws a fresh random label.
    pub fn random<R: CryptoRng + Rng>(rng: &mut R) -> Self {
        Label(rng.random())
    }

    /// The label as big-endian bytes.
    pub fn to_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Label({:032x})", self.0)
    }
}

/// The two keys of a wire, for logical 0 and logical 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair(pub Label, pub Label);

impl KeyPair {
    /// The key standing for `bit`.
    pub fn key(&self, bit: bool) -> Label {
        if bit { self.1 } else { self.0 }
    }
}

/// What the evaluator learns about an input wire: the selected key and the bit masked with the
/// wire's permutation bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireInput {
    /// The key of the selected value.
    pub key: Label,
    /// `pbit ^ bit`.
    pub encrypted_bit: bool,
}

impl WireInput {
    /// Selects the key for `bit` and masks it with the wire's permutation bit.
    pub fn new(keys: &KeyPair, pbit: bool, bit: bool) -> Self {
        Self {
            key: keys.key(bit),
            encrypted_bit: pbit ^ bit,
        }
    }
}

/// Input keys for a set of wires.
pub type InputAssignment = BTreeMap<WireId, WireInput>;

/// Output bits in clear, as revealed by the evaluation.
pub type OutputBits = BTreeMap<WireId, bool>;

/// Splits `value` into `width` bits, most significant bit first.
pub fn to_bits(value: u64, width: u32) -> Vec<bool> {
    (0..width).rev().map(|i| (value >> i) & 1 == 1).collect()
}

/// Concatenates bits (most significant bit first) to an integer.
pub fn from_bits(bits: impl IntoIterator<Item = bool>) -> u64 {
    bits.into_iter().fold(0, |acc, bit| (acc << 1) | bit as u64)
}
