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

//! # PSKT analysis
//!
//! Classifies each input's state, identifies what is missing, computes the
//! next workflow role, and estimates the virtual size, fee, and fee rate of
//! the would-be final transaction.

use bitcoin::blockdata::script::Instruction;
use bitcoin::{
    EcdsaSighashType, PubkeyHash, Script, ScriptHash, Transaction, TxOut, WScriptHash, Witness,
};

use crate::sign::{
    precompute_pskt_data, sign_pskt_input, DummySigningProvider, SignatureData,
};
use crate::{PartiallySignedTransaction, PsktRole, PsktSighashType};

/// One hundred million kyotoshis: one KYC.
pub const COIN: u64 = 100_000_000;
/// No amount larger than this is valid.
pub const MAX_MONEY: u64 = 21_000_000 * COIN;
/// Default weight discount applied per signature operation.
pub const DEFAULT_BYTES_PER_SIGOP: u32 = 20;

const WITNESS_SCALE_FACTOR: usize = 4;
const MAX_PUBKEYS_PER_MULTISIG: usize = 20;

/// Policy knobs for the analyzer. These are process configuration in the
/// node; the engine takes them as a value instead of reading global state.
#[derive(Copy, Clone, Debug)]
pub struct AnalyzerOptions {
    /// Equivalent bytes charged per signature operation when computing the
    /// virtual transaction size.
    pub bytes_per_sigop: u32,
    /// Upper bound on any single amount and on running totals.
    pub max_money: u64,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        AnalyzerOptions {
            bytes_per_sigop: DEFAULT_BYTES_PER_SIGOP,
            max_money: MAX_MONEY,
        }
    }
}

/// An analysis of one input of a PSKT.
#[derive(Clone, Debug, Default)]
pub struct PsktInputAnalysis {
    /// Whether a UTXO is provided for this input
    pub has_utxo: bool,
    /// Whether the input has all required information including signatures
    pub is_final: bool,
    /// Which role needs to handle this input next
    pub next: Option<PsktRole>,
    /// Pubkey IDs whose BIP-32 derivation path is missing
    pub missing_pubkeys: Vec<PubkeyHash>,
    /// Pubkey IDs whose signature is missing
    pub missing_sigs: Vec<PubkeyHash>,
    /// Hash160 of the redeem script, if missing
    pub missing_redeem_script: Option<ScriptHash>,
    /// SHA256 of the witness script, if missing
    pub missing_witness_script: Option<WScriptHash>,
}

/// The result of [`analyze_pskt`]: miscellaneous information about where a
/// PSKT is in the signing workflow.
#[derive(Clone, Debug)]
pub struct PsktAnalysis {
    /// Estimated virtual size of the final signed transaction
    pub estimated_vsize: Option<usize>,
    /// Estimated fee rate of the final signed transaction, in kyotoshis
    /// per 1000 virtual bytes
    pub estimated_feerate: Option<i64>,
    /// Fee paid by the transaction, known only when every input has a UTXO
    pub fee: Option<i64>,
    /// Analyses of the individual inputs
    pub inputs: Vec<PsktInputAnalysis>,
    /// Which role needs to handle the transaction next
    pub next: PsktRole,
    /// Error message, set when the PSKT is not valid
    pub error: Option<String>,
}

impl PsktAnalysis {
    fn new() -> Self {
        PsktAnalysis {
            estimated_vsize: None,
            estimated_feerate: None,
            fee: None,
            inputs: vec![],
            next: PsktRole::Extractor,
            error: None,
        }
    }

    /// Clear all estimates, reset the next role to Creator, and store the
    /// error message.
    pub fn set_invalid(&mut self, message: String) {
        self.estimated_vsize = None;
        self.estimated_feerate = None;
        self.fee = None;
        self.inputs.clear();
        self.next = PsktRole::Creator;
        self.error = Some(message);
    }
}

fn money_range(value: u64, options: &AnalyzerOptions) -> bool {
    value <= options.max_money
}

/// Analyze `pskt` and report per-input state, the next role, and fee/size
/// estimates.
///
/// Works on its own copy: the dummy-signing passes used for classification
/// and size estimation never leak into the caller's value.
pub fn analyze_pskt(mut pskt: PartiallySignedTransaction, options: &AnalyzerOptions) -> PsktAnalysis {
    let mut result = PsktAnalysis::new();

    let mut calc_fee = true;
    let mut in_amt: u64 = 0;

    result.inputs = vec![Default::default(); pskt.inputs.len()];

    let txdata = precompute_pskt_data(&pskt);

    for index in 0..pskt.inputs.len() {
        let mut input_analysis = PsktInputAnalysis::default();
        // Set the next role here and ratchet backwards as required.
        input_analysis.next = Some(PsktRole::Extractor);

        let utxo = match pskt.get_input_utxo(index) {
            Ok(utxo) => utxo,
            Err(_) => {
                // An out-of-range prevout makes the whole PSKT invalid; a
                // hash mismatch just means we cannot use the record.
                let prevout = pskt.global.unsigned_tx.input[index].previous_output;
                if let Some(ref non_witness_utxo) = pskt.inputs[index].non_witness_utxo {
                    if prevout.vout as usize >= non_witness_utxo.output.len() {
                        result.set_invalid(format!(
                            "PSKT is not valid. Input {} specifies invalid prevout",
                            index
                        ));
                        return result;
                    }
                }
                None
            }
        };

        match utxo {
            Some(ref txout) => {
                if !money_range(txout.value, options)
                    || in_amt.checked_add(txout.value).map_or(true, |total| {
                        !money_range(total, options)
                    })
                {
                    result.set_invalid(format!(
                        "PSKT is not valid. Input {} has invalid value",
                        index
                    ));
                    return result;
                }
                in_amt += txout.value;
                input_analysis.has_utxo = true;
            }
            None => {
                input_analysis.has_utxo = false;
                input_analysis.is_final = false;
                input_analysis.next = Some(PsktRole::Updater);
                calc_fee = false;
            }
        }

        if let Some(ref txout) = utxo {
            if txout.script_pubkey.is_provably_unspendable() {
                result.set_invalid(format!(
                    "PSKT is not valid. Input {} spends unspendable output",
                    index
                ));
                return result;
            }
        }

        if utxo.is_some() {
            if !pskt.inputs[index].is_signed() {
                input_analysis.is_final = false;

                // Figure out what is missing.
                let mut outdata = SignatureData::default();
                let complete = sign_pskt_input(
                    &DummySigningProvider,
                    &mut pskt,
                    index,
                    Some(&txdata),
                    PsktSighashType::from(EcdsaSighashType::All),
                    Some(&mut outdata),
                    true,
                )
                .unwrap_or(false);

                if !complete {
                    // If signatures are the only thing missing, the input
                    // goes to a signer next; everything else needs an
                    // updater.
                    let only_sigs_missing = outdata.missing_pubkeys.is_empty()
                        && outdata.missing_redeem_script.is_none()
                        && outdata.missing_witness_script.is_none()
                        && !outdata.missing_sigs.is_empty();

                    input_analysis.missing_pubkeys = outdata.missing_pubkeys;
                    input_analysis.missing_sigs = outdata.missing_sigs;
                    input_analysis.missing_redeem_script = outdata.missing_redeem_script;
                    input_analysis.missing_witness_script = outdata.missing_witness_script;

                    input_analysis.next = Some(if only_sigs_missing {
                        PsktRole::Signer
                    } else {
                        PsktRole::Updater
                    });
                } else {
                    input_analysis.next = Some(PsktRole::Finalizer);
                }
            } else {
                input_analysis.is_final = true;
            }
        }

        result.inputs[index] = input_analysis;
    }

    // The next role for the PSKT as a whole is the "minimum" next role
    // across its inputs.
    result.next = PsktRole::Extractor;
    for input_analysis in &result.inputs {
        if let Some(next) = input_analysis.next {
            if next < result.next {
                result.next = next;
            }
        }
    }
    debug_assert!(result.next > PsktRole::Creator);

    if calc_fee {
        // Get the output amount.
        let mut out_amt: u64 = 0;
        for txout in &pskt.global.unsigned_tx.output {
            match out_amt.checked_add(txout.value) {
                Some(total) if money_range(txout.value, options) && money_range(total, options) => {
                    out_amt = total;
                }
                _ => {
                    result.set_invalid("PSKT is not valid. Output amount invalid".to_string());
                    return result;
                }
            }
        }

        let fee = in_amt as i64 - out_amt as i64;
        result.fee = Some(fee);

        // Estimate the size by dummy-finalizing a clone and measuring it.
        let mut tx = pskt.global.unsigned_tx.clone();
        let mut spent_outputs: Vec<TxOut> = Vec::with_capacity(pskt.inputs.len());
        let mut success = true;

        for index in 0..pskt.inputs.len() {
            let signed = sign_pskt_input(
                &DummySigningProvider,
                &mut pskt,
                index,
                None,
                PsktSighashType::from(EcdsaSighashType::All),
                None,
                true,
            )
            .unwrap_or(false);
            let utxo = pskt.get_input_utxo(index).unwrap_or(None);
            match (signed, utxo) {
                (true, Some(txout)) => {
                    if let Some(ref final_script_sig) = pskt.inputs[index].final_script_sig {
                        tx.input[index].script_sig = final_script_sig.clone();
                    }
                    if let Some(ref final_script_witness) =
                        pskt.inputs[index].final_script_witness
                    {
                        tx.input[index].witness = final_script_witness.clone();
                    }
                    spent_outputs.push(txout);
                }
                _ => {
                    success = false;
                    break;
                }
            }
        }

        if success {
            let sigop_cost = transaction_sigop_cost(&tx, &spent_outputs);
            let vsize = virtual_transaction_size(&tx, sigop_cost, options.bytes_per_sigop);
            result.estimated_vsize = Some(vsize);
            // fee / vsize, scaled to 1000 virtual bytes
            if vsize > 0 {
                result.estimated_feerate = Some(fee * 1000 / vsize as i64);
            }
        }
    }

    result
}

/// Count the signature operations in a script.
///
/// With `accurate` set, a CHECKMULTISIG preceded by an OP_1..OP_16 counts
/// as that many operations; otherwise it counts as the maximum of 20.
pub fn count_sigops(script: &Script, accurate: bool) -> usize {
    let mut count = 0usize;
    let mut last_pushnum: Option<u8> = None;

    for instruction in script.instructions() {
        let instruction = match instruction {
            Ok(instruction) => instruction,
            Err(_) => break,
        };
        if let Instruction::Op(op) = instruction {
            let byte = op.into_u8();
            match byte {
                // OP_CHECKSIG / OP_CHECKSIGVERIFY
                0xac | 0xad => count += 1,
                // OP_CHECKMULTISIG / OP_CHECKMULTISIGVERIFY
                0xae | 0xaf => match last_pushnum {
                    Some(n) if accurate => count += n as usize,
                    _ => count += MAX_PUBKEYS_PER_MULTISIG,
                },
                _ => {}
            }
            last_pushnum = if (0x51..=0x60).contains(&byte) {
                Some(byte - 0x50)
            } else {
                None
            };
        } else {
            last_pushnum = None;
        }
    }

    count
}

fn last_push(script: &Script) -> Option<Script> {
    let mut last = None;
    for instruction in script.instructions() {
        match instruction {
            Ok(Instruction::PushBytes(bytes)) => last = Some(Script::from(bytes.to_vec())),
            Ok(_) => last = None,
            Err(_) => return None,
        }
    }
    last
}

fn witness_program_sigops(script_pubkey: &Script, witness: &Witness) -> usize {
    if script_pubkey.is_v0_p2wpkh() {
        1
    } else if script_pubkey.is_v0_p2wsh() {
        match witness.last() {
            Some(bytes) => count_sigops(&Script::from(bytes.to_vec()), true),
            None => 0,
        }
    } else {
        0
    }
}

fn witness_sigop_count(script_sig: &Script, witness: &Witness, script_pubkey: &Script) -> usize {
    if script_pubkey.is_witness_program() {
        return witness_program_sigops(script_pubkey, witness);
    }
    if script_pubkey.is_p2sh() {
        if let Some(redeem_script) = last_push(script_sig) {
            if redeem_script.is_witness_program() {
                return witness_program_sigops(&redeem_script, witness);
            }
        }
    }
    0
}

/// Total weighted signature-operation cost of a signed transaction given
/// the outputs it spends, per the consensus accounting: legacy sigops are
/// scaled by the witness factor, P2SH redeem scripts count accurately, and
/// witness sigops count unscaled.
pub fn transaction_sigop_cost(tx: &Transaction, spent_outputs: &[TxOut]) -> usize {
    let mut cost = 0usize;

    for txin in &tx.input {
        cost += count_sigops(&txin.script_sig, false) * WITNESS_SCALE_FACTOR;
    }
    for txout in &tx.output {
        cost += count_sigops(&txout.script_pubkey, false) * WITNESS_SCALE_FACTOR;
    }

    for (txin, prev) in tx.input.iter().zip(spent_outputs.iter()) {
        if prev.script_pubkey.is_p2sh() {
            if let Some(redeem_script) = last_push(&txin.script_sig) {
                cost += count_sigops(&redeem_script, true) * WITNESS_SCALE_FACTOR;
            }
        }
        cost += witness_sigop_count(&txin.script_sig, &txin.witness, &prev.script_pubkey);
    }

    cost
}

/// The virtual size of a signed transaction: its weight, floored by the
/// sigop cost scaled with `bytes_per_sigop`, in virtual bytes.
pub fn virtual_transaction_size(tx: &Transaction, sigop_cost: usize, bytes_per_sigop: u32) -> usize {
    let weight = tx.weight();
    let sigop_weight = sigop_cost * bytes_per_sigop as usize;
    (std::cmp::max(weight, sigop_weight) + WITNESS_SCALE_FACTOR - 1) / WITNESS_SCALE_FACTOR
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::blockdata::opcodes;
    use bitcoin::blockdata::script::Builder;

    #[test]
    fn counts_checksig_ops() {
        let script = Builder::new()
            .push_opcode(opcodes::all::OP_DUP)
            .push_opcode(opcodes::all::OP_CHECKSIG)
            .push_opcode(opcodes::all::OP_CHECKSIGVERIFY)
            .into_script();
        assert_eq!(count_sigops(&script, false), 2);
    }

    #[test]
    fn multisig_counts_accurately_only_when_asked() {
        let script = Builder::new()
            .push_opcode(opcodes::all::OP_PUSHNUM_3)
            .push_opcode(opcodes::all::OP_CHECKMULTISIG)
            .into_script();
        assert_eq!(count_sigops(&script, true), 3);
        assert_eq!(count_sigops(&script, false), MAX_PUBKEYS_PER_MULTISIG);
    }

    #[test]
    fn default_options_match_policy() {
        let options = AnalyzerOptions::default();
        assert_eq!(options.bytes_per_sigop, 20);
        assert_eq!(options.max_money, 21_000_000 * COIN);
    }
}
