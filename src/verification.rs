//! Cross-checking the disclosed maximum against both parties' local maxima.

use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// What the garbler reveals for verification: its own local maximum and the result it received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    /// The garbler's local maximum.
    pub local_max: u64,
    /// The result disclosed by the evaluation.
    pub disclosed_result: u64,
}

/// The outcome of a verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    /// The maximum of both local maxima.
    pub expected: u64,
    /// The disclosed result.
    pub disclosed: u64,
    /// Whether both agree.
    pub matches: bool,
}

/// Checks the disclosed result against the maximum of the garbler's and the own local maximum.
///
/// A mismatch is logged, but is not an error: the caller decides how to react to it.
pub fn verify(record: &VerificationRecord, own_max: u64) -> Verification {
    let expected = record.local_max.max(own_max);
    let disclosed = record.disclosed_result;
    let matches = expected == disclosed;
    if matches {
        info!(result = disclosed, "verified correctly");
    } else {
        error!(
            disclosed,
            expected, "verification failed, disclosed result differs from the correct maximum"
        );
    }
    Verification {
        expected,
        disclosed,
        matches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_the_true_maximum() {
        let record = VerificationRecord {
            local_max: 5,
            disclosed_result: 9,
        };
        assert!(verify(&record, 9).matches);
        let v = verify(&record, 3);
        assert_eq!((v.expected, v.disclosed, v.matches), (5, 9, false));
    }

    #[test]
    fn garbler_maximum_can_win() {
        let record = VerificationRecord {
            local_max: 12,
            disclosed_result: 12,
        };
        assert!(verify(&record, 0).matches);
        assert!(!verify(&record, 13).matches);
    }
}
