// Rust Koyotecoin PSKT Library
// Written by
//   The Rust Koyotecoin developers
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the CC0 Public Domain Dedication
// along with this software.
// If not, see <http://creativecommons.org/publicdomain/zero/1.0/>.
//

//! # Finalizer / extractor
//!
//! Promotion of complete partial signatures into terminal scriptSig /
//! witness stacks, and assembly of the broadcast-ready network transaction.

use bitcoin::{EcdsaSighashType, Transaction};

use crate::sign::{precompute_pskt_data, sign_pskt_input, DummySigningProvider};
use crate::{PartiallySignedTransaction, PsktSighashType};

/// Finalize the inputs of a PSKT.
///
/// No new signing happens; in case partial signatures that add up to a
/// complete set have been combined but not yet assembled (e.g. because the
/// combiner that produced this PSKT did not understand them), this promotes
/// them into a final scriptSig / witness per input. Finalization is
/// idempotent: inputs already final are left untouched.
///
/// Returns whether every input ended up finalized.
pub fn finalize_pskt(pskt: &mut PartiallySignedTransaction) -> bool {
    let mut complete = true;
    let txdata = precompute_pskt_data(pskt);
    for index in 0..pskt.inputs.len() {
        complete &= sign_pskt_input(
            &DummySigningProvider,
            pskt,
            index,
            Some(&txdata),
            PsktSighashType::from(EcdsaSighashType::All),
            None,
            true,
        )
        .unwrap_or(false);
    }

    complete
}

/// Finalize a PSKT and, if every input is complete, extract the network
/// transaction.
///
/// It is not safe to extract a PSKT that is not fully finalized, and there
/// is no cheaper way to check than finalizing, so this always finalizes
/// first. On success the returned transaction carries every input's final
/// scriptSig and witness and is ready for broadcast; the PSKT's information
/// is no longer authoritative from that point on.
pub fn finalize_and_extract_pskt(
    pskt: &mut PartiallySignedTransaction,
) -> Option<Transaction> {
    if !finalize_pskt(pskt) {
        return None;
    }

    let mut tx = pskt.global.unsigned_tx.clone();
    for (txin, input) in tx.input.iter_mut().zip(pskt.inputs.iter()) {
        if let Some(ref final_script_sig) = input.final_script_sig {
            txin.script_sig = final_script_sig.clone();
        }
        if let Some(ref final_script_witness) = input.final_script_witness {
            txin.witness = final_script_witness.clone();
        }
    }
    Some(tx)
}
