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

//! # PSKT operations
//!
//! The JSON-facing operation surface behind the PSKT RPCs: create, convert,
//! combine, join, finalize, UTXO-update, decode, and analyze. Dispatch
//! plumbing, chainstate access and descriptor expansion stay with the
//! caller; everything here works on base64 PSKTs, plain values, and the
//! narrow "resolve an outpoint to a spent output" lookup capability.

use std::str::FromStr;
use std::{error, fmt};

use bitcoin::blockdata::opcodes;
use bitcoin::blockdata::script::Builder;
use bitcoin::hashes::hex::{FromHex, ToHex};
use bitcoin::hashes::Hash;
use bitcoin::{
    OutPoint, PackedLockTime, Script, ScriptHash, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};
use log::debug;
use rand::seq::SliceRandom;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::analyzer::{analyze_pskt, AnalyzerOptions};
use crate::finalizer::finalize_and_extract_pskt;
use crate::sign::{
    classify_script, precompute_pskt_data, sign_pskt_input, update_pskt_output, SigningProvider,
};
use crate::{encode, Error, PartiallySignedTransaction, PsktSighashType};

/// Stable code carried by [`RpcError::Deserialization`].
pub const RPC_DESERIALIZATION_ERROR: i32 = -22;
/// Stable code carried by [`RpcError::InvalidParameter`] and the
/// parameter-shaped failures.
pub const RPC_INVALID_PARAMETER: i32 = -8;
/// Stable code carried by the transaction-level failures.
pub const RPC_TRANSACTION_ERROR: i32 = -25;

/// The error taxonomy exposed at the RPC boundary. Each variant maps to a
/// stable numeric code and carries a human-readable message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RpcError {
    /// A PSKT or transaction could not be decoded
    Deserialization(String),
    /// Combining PSKTs over different unsigned transactions
    PsktMismatch,
    /// Joining PSKTs that spend the same outpoint
    InputDuplicated(OutPoint),
    /// An input has no UTXO information
    UtxoMissing(usize),
    /// An input's UTXO record contradicts its prevout
    UtxoMismatch(usize),
    /// A request parameter is malformed
    InvalidParameter(String),
    /// The signing pipeline failed
    SigningFailure(String),
}

impl RpcError {
    /// The stable numeric code of this error.
    pub fn code(&self) -> i32 {
        match self {
            RpcError::Deserialization(_) => RPC_DESERIALIZATION_ERROR,
            RpcError::PsktMismatch => RPC_TRANSACTION_ERROR,
            RpcError::InputDuplicated(_) => RPC_INVALID_PARAMETER,
            RpcError::UtxoMissing(_) => RPC_TRANSACTION_ERROR,
            RpcError::UtxoMismatch(_) => RPC_TRANSACTION_ERROR,
            RpcError::InvalidParameter(_) => RPC_INVALID_PARAMETER,
            RpcError::SigningFailure(_) => RPC_TRANSACTION_ERROR,
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RpcError::Deserialization(msg) => write!(f, "TX decode failed {}", msg),
            RpcError::PsktMismatch => {
                f.write_str("PSKTs not compatible (different transactions)")
            }
            RpcError::InputDuplicated(outpoint) => {
                write!(f, "Input {}:{} exists in multiple PSKTs", outpoint.txid, outpoint.vout)
            }
            RpcError::UtxoMissing(index) => {
                write!(f, "Input {} has no UTXO information", index)
            }
            RpcError::UtxoMismatch(index) => {
                write!(f, "Input {} UTXO does not match the prevout", index)
            }
            RpcError::InvalidParameter(msg) => f.write_str(msg),
            RpcError::SigningFailure(msg) => write!(f, "Signing failed: {}", msg),
        }
    }
}

impl error::Error for RpcError {}

impl From<crate::ParseError> for RpcError {
    fn from(e: crate::ParseError) -> Self {
        RpcError::Deserialization(e.to_string())
    }
}

impl From<Error> for RpcError {
    fn from(e: Error) -> Self {
        match e {
            Error::UniqueIdMismatch { .. } => RpcError::PsktMismatch,
            Error::DuplicateOutpoint(outpoint) => RpcError::InputDuplicated(outpoint),
            Error::UtxoMissing(index) => RpcError::UtxoMissing(index),
            Error::UtxoMismatch(index) => RpcError::UtxoMismatch(index),
            Error::WitnessSignatureRequired(index) | Error::ProviderFailure(index) => {
                RpcError::SigningFailure(format!("input {}", index))
            }
            other => RpcError::InvalidParameter(other.to_string()),
        }
    }
}

/// One input of a `createpskt` request.
#[derive(Clone, Debug, Deserialize)]
pub struct CreatePsktInput {
    /// The transaction id of the spent output
    pub txid: String,
    /// The output number of the spent output
    pub vout: u32,
    /// The sequence number, defaulted from the replaceable flag and
    /// locktime when absent
    #[serde(default)]
    pub sequence: Option<u32>,
}

/// One output of a `createpskt` request. Outputs are script-addressed;
/// address encoding belongs to the wallet layer.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum CreatePsktOutput {
    /// A spendable output paying `amount` kyotoshis to a script
    Spend {
        /// The raw scriptPubKey, hex-encoded
        script_pubkey: String,
        /// The amount in kyotoshis
        amount: u64,
    },
    /// An OP_RETURN data carrier output
    Data {
        /// The payload, hex-encoded
        data: String,
    },
}

fn parse_pskt(pskt_b64: &str) -> Result<PartiallySignedTransaction, RpcError> {
    Ok(PartiallySignedTransaction::from_str(pskt_b64)?)
}

/// Build the unsigned transaction of a `createpskt` / `createrawtransaction`
/// request.
pub fn construct_transaction(
    inputs: &[CreatePsktInput],
    outputs: &[CreatePsktOutput],
    locktime: u32,
    replaceable: bool,
) -> Result<Transaction, RpcError> {
    let mut vin = Vec::with_capacity(inputs.len());
    for input in inputs {
        let txid = Txid::from_str(&input.txid)
            .map_err(|_| RpcError::InvalidParameter("txid must be hexadecimal".to_string()))?;
        let sequence = match input.sequence {
            Some(sequence) => sequence,
            None if replaceable => 0xFFFFFFFD,
            None if locktime > 0 => 0xFFFFFFFE,
            None => 0xFFFFFFFF,
        };
        vin.push(TxIn {
            previous_output: OutPoint::new(txid, input.vout),
            script_sig: Script::new(),
            sequence: Sequence(sequence),
            witness: Witness::default(),
        });
    }

    let mut vout = Vec::with_capacity(outputs.len());
    for output in outputs {
        match output {
            CreatePsktOutput::Spend {
                script_pubkey,
                amount,
            } => {
                let bytes = Vec::<u8>::from_hex(script_pubkey).map_err(|_| {
                    RpcError::InvalidParameter("script_pubkey must be hexadecimal".to_string())
                })?;
                vout.push(TxOut {
                    value: *amount,
                    script_pubkey: Script::from(bytes),
                });
            }
            CreatePsktOutput::Data { data } => {
                let bytes = Vec::<u8>::from_hex(data).map_err(|_| {
                    RpcError::InvalidParameter("data must be hexadecimal".to_string())
                })?;
                vout.push(TxOut {
                    value: 0,
                    script_pubkey: Builder::new()
                        .push_opcode(opcodes::all::OP_RETURN)
                        .push_slice(&bytes)
                        .into_script(),
                });
            }
        }
    }

    Ok(Transaction {
        version: 2,
        lock_time: PackedLockTime(locktime),
        input: vin,
        output: vout,
    })
}

/// Create a blank PSKT over a fresh unsigned transaction. Implements the
/// Creator role.
pub fn create_pskt(
    inputs: &[CreatePsktInput],
    outputs: &[CreatePsktOutput],
    locktime: u32,
    replaceable: bool,
) -> Result<String, RpcError> {
    let tx = construct_transaction(inputs, outputs, locktime, replaceable)?;
    let pskt = PartiallySignedTransaction::from_unsigned_tx(tx)?;
    debug!(
        "created pskt with {} inputs, {} outputs",
        pskt.inputs.len(),
        pskt.outputs.len()
    );
    Ok(pskt.to_string())
}

/// Convert a network-serialized transaction to a PSKT.
///
/// With `permit_sig_data`, any signatures in the inputs are discarded and
/// conversion continues; otherwise their presence is an error. The
/// `iswitness` hint of the RPC is retained for interface compatibility but
/// unused: the serialization is self-describing here.
pub fn convert_to_pskt(
    tx_hex: &str,
    permit_sig_data: bool,
    _iswitness: Option<bool>,
) -> Result<String, RpcError> {
    let bytes = Vec::<u8>::from_hex(tx_hex)
        .map_err(|e| RpcError::Deserialization(e.to_string()))?;
    let mut tx: Transaction =
        encode::deserialize(&bytes).map_err(|e| RpcError::Deserialization(e.to_string()))?;

    for input in &mut tx.input {
        if (!input.script_sig.is_empty() || !input.witness.is_empty()) && !permit_sig_data {
            return Err(RpcError::Deserialization(
                "Inputs must not have scriptSigs and scriptWitnesses".to_string(),
            ));
        }
        input.script_sig = Script::new();
        input.witness = Witness::default();
    }

    let pskt = PartiallySignedTransaction::from_unsigned_tx(tx)?;
    Ok(pskt.to_string())
}

/// Combine multiple PSKTs over the same unsigned transaction into one.
/// Implements the Combiner role.
pub fn combine_pskts(pskts_b64: &[String]) -> Result<String, RpcError> {
    if pskts_b64.is_empty() {
        return Err(RpcError::InvalidParameter(
            "Parameter 'txs' cannot be empty".to_string(),
        ));
    }

    let mut psktxs = Vec::with_capacity(pskts_b64.len());
    for pskt_b64 in pskts_b64 {
        psktxs.push(parse_pskt(pskt_b64)?);
    }

    let merged = PartiallySignedTransaction::combine(psktxs)?;
    Ok(merged.to_string())
}

/// Join multiple distinct PSKTs with different inputs and outputs into one.
///
/// No input may appear in more than one of the PSKTs. The joined
/// transaction takes the highest version and the lowest locktime of its
/// parts, and the resulting input and output order is shuffled uniformly so
/// the arrangement does not leak which PSKT contributed what.
pub fn join_pskts(pskts_b64: &[String]) -> Result<String, RpcError> {
    if pskts_b64.len() <= 1 {
        return Err(RpcError::InvalidParameter(
            "At least two PSKTs are required to join PSKTs.".to_string(),
        ));
    }

    let mut psktxs = Vec::with_capacity(pskts_b64.len());
    let mut best_version: i32 = 1;
    let mut best_locktime: u32 = 0xffffffff;
    for pskt_b64 in pskts_b64 {
        let pskt = parse_pskt(pskt_b64)?;
        if pskt.unsigned_tx().version > best_version {
            best_version = pskt.unsigned_tx().version;
        }
        if pskt.unsigned_tx().lock_time.0 < best_locktime {
            best_locktime = pskt.unsigned_tx().lock_time.0;
        }
        psktxs.push(pskt);
    }

    let blank_tx = Transaction {
        version: best_version,
        lock_time: PackedLockTime(best_locktime),
        input: vec![],
        output: vec![],
    };
    let mut merged =
        PartiallySignedTransaction::from_unsigned_tx(blank_tx.clone()).map_err(RpcError::from)?;

    for pskt in psktxs {
        for (txin, input) in pskt
            .global
            .unsigned_tx
            .input
            .iter()
            .zip(pskt.inputs.iter())
        {
            merged.add_input(txin.clone(), input.clone())?;
        }
        for (txout, output) in pskt
            .global
            .unsigned_tx
            .output
            .iter()
            .zip(pskt.outputs.iter())
        {
            merged.add_output(txout.clone(), output.clone());
        }
        for (key_source, xpubs) in pskt.global.xpubs {
            let known = merged.global.xpubs.entry(key_source).or_insert_with(Vec::new);
            for xpub in xpubs {
                if !known.contains(&xpub) {
                    known.push(xpub);
                }
            }
        }
        for (key, value) in pskt.global.unknown {
            merged.global.unknown.entry(key).or_insert(value);
        }
    }

    // Shuffle the input and output order to break correlation between
    // positions and source PSKTs.
    let mut rng = rand::thread_rng();
    let mut input_indices: Vec<usize> = (0..merged.inputs.len()).collect();
    let mut output_indices: Vec<usize> = (0..merged.outputs.len()).collect();
    input_indices.shuffle(&mut rng);
    output_indices.shuffle(&mut rng);

    let mut shuffled = PartiallySignedTransaction::from_unsigned_tx(blank_tx)
        .map_err(RpcError::from)?;
    for index in input_indices {
        shuffled.add_input(
            merged.global.unsigned_tx.input[index].clone(),
            merged.inputs[index].clone(),
        )?;
    }
    for index in output_indices {
        shuffled.add_output(
            merged.global.unsigned_tx.output[index].clone(),
            merged.outputs[index].clone(),
        );
    }
    shuffled.global.xpubs = merged.global.xpubs;
    shuffled.global.unknown = merged.global.unknown;

    debug!("joined {} pskts into {} inputs", pskts_b64.len(), shuffled.inputs.len());
    Ok(shuffled.to_string())
}

/// Finalize the inputs of a PSKT and, when complete and `extract` is set,
/// return the network-serialized transaction. Implements the Finalizer and
/// Extractor roles.
///
/// The result object carries `complete`, plus either `hex` (the extracted
/// transaction) or `pskt` (the finalized-as-far-as-possible container).
pub fn finalize_pskt_b64(pskt_b64: &str, extract: bool) -> Result<Value, RpcError> {
    let mut pskt = parse_pskt(pskt_b64)?;

    let extracted = finalize_and_extract_pskt(&mut pskt);
    let complete = extracted.is_some();

    let mut result = Map::new();
    match extracted {
        Some(tx) if extract => {
            result.insert("hex".to_string(), Value::String(encode::serialize_hex(&tx)));
        }
        _ => {
            result.insert("pskt".to_string(), Value::String(pskt.to_string()));
        }
    }
    result.insert("complete".to_string(), Value::Bool(complete));
    Ok(Value::Object(result))
}

fn is_segwit_output(provider: &dyn SigningProvider, script_pubkey: &Script) -> bool {
    if script_pubkey.is_witness_program() {
        return true;
    }
    if script_pubkey.is_p2sh() {
        let script_id = match ScriptHash::from_slice(&script_pubkey.as_bytes()[2..22]) {
            Ok(script_id) => script_id,
            Err(_) => return false,
        };
        if let Some(redeem_script) = provider.get_script(&script_id) {
            return redeem_script.is_witness_program();
        }
    }
    false
}

/// Update the inputs and outputs of a PSKT with spent-output data from
/// `lookup` plus script and key metadata from `provider` (which the caller
/// typically fills by expanding descriptors). Implements the Updater role.
pub fn utxo_update_pskt<L>(
    pskt_b64: &str,
    lookup: L,
    provider: &dyn SigningProvider,
) -> Result<String, RpcError>
where
    L: Fn(&OutPoint) -> Option<TxOut>,
{
    let mut pskt = parse_pskt(pskt_b64)?;

    let txdata = precompute_pskt_data(&pskt);
    for index in 0..pskt.inputs.len() {
        if pskt.inputs[index].non_witness_utxo.is_none()
            && pskt.inputs[index].witness_utxo.is_none()
        {
            let prevout = pskt.global.unsigned_tx.input[index].previous_output;
            if let Some(coin) = lookup(&prevout) {
                if is_segwit_output(provider, &coin.script_pubkey) {
                    pskt.inputs[index].witness_utxo = Some(coin);
                }
            }
        }

        // The signing pass fills in script and keypath information; actual
        // signatures only appear if the provider can make them.
        let _ = sign_pskt_input(
            provider,
            &mut pskt,
            index,
            Some(&txdata),
            PsktSighashType::from(bitcoin::EcdsaSighashType::All),
            None,
            true,
        );
    }

    for index in 0..pskt.outputs.len() {
        update_pskt_output(provider, &mut pskt, index)?;
    }

    Ok(pskt.to_string())
}

fn amount_to_json(kyotoshis: u64) -> Value {
    json_number(kyotoshis as f64 / 100_000_000.0)
}

fn signed_amount_to_json(kyotoshis: i64) -> Value {
    json_number(kyotoshis as f64 / 100_000_000.0)
}

fn json_number(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn script_to_json(script: &Script) -> Value {
    json!({
        "asm": script.asm(),
        "hex": script.as_bytes().to_hex(),
        "type": classify_script(script).name(),
    })
}

fn key_source_to_json(fingerprint: &bitcoin::util::bip32::Fingerprint, path: &bitcoin::util::bip32::DerivationPath) -> (String, String) {
    (fingerprint.to_string(), path.to_string())
}

fn tx_to_json(tx: &Transaction) -> Value {
    let mut vin = Vec::with_capacity(tx.input.len());
    for txin in &tx.input {
        let mut entry = Map::new();
        entry.insert("txid".to_string(), Value::String(txin.previous_output.txid.to_string()));
        entry.insert("vout".to_string(), json!(txin.previous_output.vout));
        entry.insert(
            "scriptSig".to_string(),
            json!({
                "asm": txin.script_sig.asm(),
                "hex": txin.script_sig.as_bytes().to_hex(),
            }),
        );
        if !txin.witness.is_empty() {
            let items: Vec<Value> = txin
                .witness
                .iter()
                .map(|item| Value::String(item.to_hex()))
                .collect();
            entry.insert("txinwitness".to_string(), Value::Array(items));
        }
        entry.insert("sequence".to_string(), json!(txin.sequence.0));
        vin.push(Value::Object(entry));
    }

    let mut vout = Vec::with_capacity(tx.output.len());
    for (n, txout) in tx.output.iter().enumerate() {
        vout.push(json!({
            "value": amount_to_json(txout.value),
            "n": n,
            "scriptPubKey": script_to_json(&txout.script_pubkey),
        }));
    }

    json!({
        "txid": tx.txid().to_string(),
        "hash": tx.wtxid().to_string(),
        "version": tx.version,
        "size": tx.size(),
        "vsize": tx.vsize(),
        "weight": tx.weight(),
        "locktime": tx.lock_time.0,
        "vin": vin,
        "vout": vout,
    })
}

fn proprietary_to_json(proprietary: &std::collections::BTreeMap<crate::raw::ProprietaryKey, Vec<u8>>) -> Value {
    let mut entries = Vec::with_capacity(proprietary.len());
    for (key, value) in proprietary {
        entries.push(json!({
            "identifier": key.prefix.to_hex(),
            "subtype": key.subtype,
            "key": key.key.to_hex(),
            "value": value.to_hex(),
        }));
    }
    Value::Array(entries)
}

fn unknown_to_json(unknown: &std::collections::BTreeMap<crate::raw::Key, Vec<u8>>) -> Value {
    let mut map = Map::new();
    for (key, value) in unknown {
        let mut key_bytes = vec![key.type_value];
        key_bytes.extend(&key.key);
        map.insert(key_bytes.to_hex(), Value::String(value.to_hex()));
    }
    Value::Object(map)
}

/// Decode a base64 PSKT into the JSON tree of the `decodepskt` RPC.
pub fn decode_pskt(pskt_b64: &str) -> Result<Value, RpcError> {
    let pskt = parse_pskt(pskt_b64)?;
    let options = AnalyzerOptions::default();

    let mut result = Map::new();

    result.insert("tx".to_string(), tx_to_json(pskt.unsigned_tx()));

    // Global xpubs
    let mut global_xpubs = Vec::new();
    for ((fingerprint, path), xpubs) in &pskt.global.xpubs {
        for xpub in xpubs {
            let (fingerprint, path) = key_source_to_json(fingerprint, path);
            global_xpubs.push(json!({
                "xpub": xpub.to_string(),
                "master_fingerprint": fingerprint,
                "path": path,
            }));
        }
    }
    result.insert("global_xpubs".to_string(), Value::Array(global_xpubs));

    result.insert("pskt_version".to_string(), json!(pskt.version()));

    result.insert(
        "proprietary".to_string(),
        proprietary_to_json(&pskt.global.proprietary),
    );
    result.insert("unknown".to_string(), unknown_to_json(&pskt.global.unknown));

    // Inputs
    let mut total_in: u64 = 0;
    let mut have_all_utxos = true;
    let mut inputs = Vec::with_capacity(pskt.inputs.len());
    for (index, input) in pskt.inputs.iter().enumerate() {
        let mut entry = Map::new();
        let mut have_a_utxo = false;
        let mut utxo_value: Option<u64> = None;

        if let Some(ref witness_utxo) = input.witness_utxo {
            entry.insert(
                "witness_utxo".to_string(),
                json!({
                    "amount": amount_to_json(witness_utxo.value),
                    "scriptPubKey": script_to_json(&witness_utxo.script_pubkey),
                }),
            );
            utxo_value = Some(witness_utxo.value);
            have_a_utxo = true;
        }
        if let Some(ref non_witness_utxo) = input.non_witness_utxo {
            entry.insert("non_witness_utxo".to_string(), tx_to_json(non_witness_utxo));
            let prevout = pskt.global.unsigned_tx.input[index].previous_output;
            if let Some(txout) = non_witness_utxo.output.get(prevout.vout as usize) {
                utxo_value = Some(txout.value);
                have_a_utxo = true;
            }
        }
        match utxo_value {
            Some(value) if have_a_utxo => {
                if value <= options.max_money
                    && total_in
                        .checked_add(value)
                        .map_or(false, |total| total <= options.max_money)
                {
                    total_in += value;
                } else {
                    have_all_utxos = false;
                }
            }
            _ => have_all_utxos = false,
        }

        if !input.partial_sigs.is_empty() {
            let mut partial_sigs = Map::new();
            for (pubkey, sig) in &input.partial_sigs {
                partial_sigs.insert(pubkey.to_bytes().to_hex(), Value::String(sig.to_hex()));
            }
            entry.insert("partial_signatures".to_string(), Value::Object(partial_sigs));
        }

        if let Some(sighash_type) = input.sighash_type {
            entry.insert("sighash".to_string(), Value::String(sighash_type.to_string()));
        }

        if let Some(ref redeem_script) = input.redeem_script {
            entry.insert("redeem_script".to_string(), script_to_json(redeem_script));
        }
        if let Some(ref witness_script) = input.witness_script {
            entry.insert("witness_script".to_string(), script_to_json(witness_script));
        }

        if !input.bip32_derivation.is_empty() {
            let mut keypaths = Vec::new();
            for (pubkey, (fingerprint, path)) in &input.bip32_derivation {
                let (fingerprint, path) = key_source_to_json(fingerprint, path);
                keypaths.push(json!({
                    "pubkey": pubkey.to_bytes().to_hex(),
                    "master_fingerprint": fingerprint,
                    "path": path,
                }));
            }
            entry.insert("bip32_derivs".to_string(), Value::Array(keypaths));
        }

        if let Some(ref final_script_sig) = input.final_script_sig {
            entry.insert(
                "final_scriptSig".to_string(),
                json!({
                    "asm": final_script_sig.asm(),
                    "hex": final_script_sig.as_bytes().to_hex(),
                }),
            );
        }
        if let Some(ref final_script_witness) = input.final_script_witness {
            let items: Vec<Value> = final_script_witness
                .iter()
                .map(|item| Value::String(item.to_hex()))
                .collect();
            entry.insert("final_scriptwitness".to_string(), Value::Array(items));
        }

        if !input.ripemd160_preimages.is_empty() {
            let mut preimages = Map::new();
            for (hash, preimage) in &input.ripemd160_preimages {
                preimages.insert(hash.into_inner().to_hex(), Value::String(preimage.to_hex()));
            }
            entry.insert("ripemd160_preimages".to_string(), Value::Object(preimages));
        }
        if !input.sha256_preimages.is_empty() {
            let mut preimages = Map::new();
            for (hash, preimage) in &input.sha256_preimages {
                preimages.insert(hash.into_inner().to_hex(), Value::String(preimage.to_hex()));
            }
            entry.insert("sha256_preimages".to_string(), Value::Object(preimages));
        }
        if !input.hash160_preimages.is_empty() {
            let mut preimages = Map::new();
            for (hash, preimage) in &input.hash160_preimages {
                preimages.insert(hash.into_inner().to_hex(), Value::String(preimage.to_hex()));
            }
            entry.insert("hash160_preimages".to_string(), Value::Object(preimages));
        }
        if !input.hash256_preimages.is_empty() {
            let mut preimages = Map::new();
            for (hash, preimage) in &input.hash256_preimages {
                preimages.insert(hash.into_inner().to_hex(), Value::String(preimage.to_hex()));
            }
            entry.insert("hash256_preimages".to_string(), Value::Object(preimages));
        }

        if let Some(ref tap_key_sig) = input.tap_key_sig {
            entry.insert(
                "taproot_key_path_sig".to_string(),
                Value::String(tap_key_sig.to_vec().to_hex()),
            );
        }

        if !input.tap_script_sigs.is_empty() {
            let mut script_sigs = Vec::new();
            for ((pubkey, leaf_hash), sig) in &input.tap_script_sigs {
                script_sigs.push(json!({
                    "pubkey": pubkey.serialize().to_hex(),
                    "leaf_hash": leaf_hash.into_inner().to_hex(),
                    "sig": sig.to_vec().to_hex(),
                }));
            }
            entry.insert("taproot_script_path_sigs".to_string(), Value::Array(script_sigs));
        }

        if !input.tap_scripts.is_empty() {
            let mut tap_scripts = Vec::new();
            for ((script, leaf_version), control_blocks) in &input.tap_scripts {
                let blocks: Vec<Value> = control_blocks
                    .iter()
                    .map(|control_block| Value::String(control_block.to_hex()))
                    .collect();
                tap_scripts.push(json!({
                    "script": script.as_bytes().to_hex(),
                    "leaf_ver": leaf_version,
                    "control_blocks": blocks,
                }));
            }
            entry.insert("taproot_scripts".to_string(), Value::Array(tap_scripts));
        }

        if !input.tap_key_origins.is_empty() {
            let mut keypaths = Vec::new();
            for (pubkey, (leaf_hashes, (fingerprint, path))) in &input.tap_key_origins {
                let (fingerprint, path) = key_source_to_json(fingerprint, path);
                let hashes: Vec<Value> = leaf_hashes
                    .iter()
                    .map(|leaf_hash| Value::String(leaf_hash.into_inner().to_hex()))
                    .collect();
                keypaths.push(json!({
                    "pubkey": pubkey.serialize().to_hex(),
                    "master_fingerprint": fingerprint,
                    "path": path,
                    "leaf_hashes": hashes,
                }));
            }
            entry.insert("taproot_bip32_derivs".to_string(), Value::Array(keypaths));
        }

        if let Some(tap_internal_key) = input.tap_internal_key {
            entry.insert(
                "taproot_internal_key".to_string(),
                Value::String(tap_internal_key.serialize().to_hex()),
            );
        }
        if let Some(tap_merkle_root) = input.tap_merkle_root {
            entry.insert(
                "taproot_merkle_root".to_string(),
                Value::String(tap_merkle_root.into_inner().to_hex()),
            );
        }

        if !input.proprietary.is_empty() {
            entry.insert("proprietary".to_string(), proprietary_to_json(&input.proprietary));
        }
        if !input.unknown.is_empty() {
            entry.insert("unknown".to_string(), unknown_to_json(&input.unknown));
        }

        inputs.push(Value::Object(entry));
    }
    result.insert("inputs".to_string(), Value::Array(inputs));

    // Outputs
    let mut output_value: u64 = 0;
    let mut outputs = Vec::with_capacity(pskt.outputs.len());
    for (index, output) in pskt.outputs.iter().enumerate() {
        let mut entry = Map::new();

        if let Some(ref redeem_script) = output.redeem_script {
            entry.insert("redeem_script".to_string(), script_to_json(redeem_script));
        }
        if let Some(ref witness_script) = output.witness_script {
            entry.insert("witness_script".to_string(), script_to_json(witness_script));
        }

        if !output.bip32_derivation.is_empty() {
            let mut keypaths = Vec::new();
            for (pubkey, (fingerprint, path)) in &output.bip32_derivation {
                let (fingerprint, path) = key_source_to_json(fingerprint, path);
                keypaths.push(json!({
                    "pubkey": pubkey.to_bytes().to_hex(),
                    "master_fingerprint": fingerprint,
                    "path": path,
                }));
            }
            entry.insert("bip32_derivs".to_string(), Value::Array(keypaths));
        }

        if let Some(tap_internal_key) = output.tap_internal_key {
            entry.insert(
                "taproot_internal_key".to_string(),
                Value::String(tap_internal_key.serialize().to_hex()),
            );
        }

        if let Some(ref tap_tree) = output.tap_tree {
            let mut tree = Vec::new();
            for (depth, leaf_version, script) in tap_tree {
                tree.push(json!({
                    "depth": depth,
                    "leaf_ver": leaf_version,
                    "script": script.as_bytes().to_hex(),
                }));
            }
            entry.insert("taproot_tree".to_string(), Value::Array(tree));
        }

        if !output.tap_key_origins.is_empty() {
            let mut keypaths = Vec::new();
            for (pubkey, (leaf_hashes, (fingerprint, path))) in &output.tap_key_origins {
                let (fingerprint, path) = key_source_to_json(fingerprint, path);
                let hashes: Vec<Value> = leaf_hashes
                    .iter()
                    .map(|leaf_hash| Value::String(leaf_hash.into_inner().to_hex()))
                    .collect();
                keypaths.push(json!({
                    "pubkey": pubkey.serialize().to_hex(),
                    "master_fingerprint": fingerprint,
                    "path": path,
                    "leaf_hashes": hashes,
                }));
            }
            entry.insert("taproot_bip32_derivs".to_string(), Value::Array(keypaths));
        }

        if !output.proprietary.is_empty() {
            entry.insert("proprietary".to_string(), proprietary_to_json(&output.proprietary));
        }
        if !output.unknown.is_empty() {
            entry.insert("unknown".to_string(), unknown_to_json(&output.unknown));
        }

        outputs.push(Value::Object(entry));

        let txout = &pskt.global.unsigned_tx.output[index];
        if txout.value <= options.max_money
            && output_value
                .checked_add(txout.value)
                .map_or(false, |total| total <= options.max_money)
        {
            output_value += txout.value;
        } else {
            have_all_utxos = false;
        }
    }
    result.insert("outputs".to_string(), Value::Array(outputs));

    if have_all_utxos {
        result.insert(
            "fee".to_string(),
            signed_amount_to_json(total_in as i64 - output_value as i64),
        );
    }

    Ok(Value::Object(result))
}

/// Analyze a base64 PSKT into the JSON shape of the `analyzepskt` RPC.
pub fn analyze_pskt_b64(pskt_b64: &str, options: &AnalyzerOptions) -> Result<Value, RpcError> {
    let pskt = parse_pskt(pskt_b64)?;
    let analysis = analyze_pskt(pskt, options);

    let mut result = Map::new();

    let mut inputs = Vec::with_capacity(analysis.inputs.len());
    for input in &analysis.inputs {
        let mut entry = Map::new();
        entry.insert("has_utxo".to_string(), Value::Bool(input.has_utxo));
        entry.insert("is_final".to_string(), Value::Bool(input.is_final));
        if let Some(next) = input.next {
            entry.insert("next".to_string(), Value::String(next.name().to_string()));
        }

        let mut missing = Map::new();
        if !input.missing_pubkeys.is_empty() {
            let pubkeys: Vec<Value> = input
                .missing_pubkeys
                .iter()
                .map(|key_id| Value::String(key_id.into_inner().to_hex()))
                .collect();
            missing.insert("pubkeys".to_string(), Value::Array(pubkeys));
        }
        if let Some(redeem_script) = input.missing_redeem_script {
            missing.insert(
                "redeemscript".to_string(),
                Value::String(redeem_script.into_inner().to_hex()),
            );
        }
        if let Some(witness_script) = input.missing_witness_script {
            missing.insert(
                "witnessscript".to_string(),
                Value::String(witness_script.into_inner().to_hex()),
            );
        }
        if !input.missing_sigs.is_empty() {
            let sigs: Vec<Value> = input
                .missing_sigs
                .iter()
                .map(|key_id| Value::String(key_id.into_inner().to_hex()))
                .collect();
            missing.insert("signatures".to_string(), Value::Array(sigs));
        }
        if !missing.is_empty() {
            entry.insert("missing".to_string(), Value::Object(missing));
        }

        inputs.push(Value::Object(entry));
    }
    if !inputs.is_empty() {
        result.insert("inputs".to_string(), Value::Array(inputs));
    }

    if let Some(estimated_vsize) = analysis.estimated_vsize {
        result.insert("estimated_vsize".to_string(), json!(estimated_vsize));
    }
    if let Some(estimated_feerate) = analysis.estimated_feerate {
        result.insert(
            "estimated_feerate".to_string(),
            signed_amount_to_json(estimated_feerate),
        );
    }
    if let Some(fee) = analysis.fee {
        result.insert("fee".to_string(), signed_amount_to_json(fee));
    }
    result.insert("next".to_string(), Value::String(analysis.next.name().to_string()));
    if let Some(ref error) = analysis.error {
        result.insert("error".to_string(), Value::String(error.clone()));
    }

    Ok(Value::Object(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_inputs() -> Vec<CreatePsktInput> {
        vec![CreatePsktInput {
            txid: "8b6f65ab71eeab8b2918acc2ea06b79de08b84680b40ae845fd28b013139d7aa"
                .to_string(),
            vout: 0,
            sequence: None,
        }]
    }

    fn sample_outputs() -> Vec<CreatePsktOutput> {
        vec![CreatePsktOutput::Spend {
            script_pubkey: "76a9143545e6e33b832c47050f24d3eeb93c9c03948bc788ac".to_string(),
            amount: 1_000_000,
        }]
    }

    #[test]
    fn create_then_decode() {
        let b64 = create_pskt(&sample_inputs(), &sample_outputs(), 0, false).unwrap();
        let decoded = decode_pskt(&b64).unwrap();
        assert_eq!(decoded["pskt_version"], json!(0));
        assert_eq!(decoded["inputs"].as_array().unwrap().len(), 1);
        assert_eq!(decoded["outputs"].as_array().unwrap().len(), 1);
        assert_eq!(decoded["tx"]["vout"][0]["scriptPubKey"]["type"], json!("pubkeyhash"));
    }

    #[test]
    fn replaceable_flag_picks_rbf_sequence() {
        let b64 = create_pskt(&sample_inputs(), &sample_outputs(), 0, true).unwrap();
        let decoded = decode_pskt(&b64).unwrap();
        assert_eq!(decoded["tx"]["vin"][0]["sequence"], json!(0xFFFFFFFDu32));
    }

    #[test]
    fn analyze_blank_pskt_needs_updater() {
        let b64 = create_pskt(&sample_inputs(), &sample_outputs(), 0, false).unwrap();
        let analysis = analyze_pskt_b64(&b64, &AnalyzerOptions::default()).unwrap();
        assert_eq!(analysis["next"], json!("updater"));
        assert_eq!(analysis["inputs"][0]["has_utxo"], json!(false));
    }

    #[test]
    fn combine_requires_input() {
        match combine_pskts(&[]) {
            Err(RpcError::InvalidParameter(_)) => {}
            other => panic!("expected invalid parameter, got {:?}", other),
        }
    }

    #[test]
    fn join_requires_two() {
        let b64 = create_pskt(&sample_inputs(), &sample_outputs(), 0, false).unwrap();
        match join_pskts(&[b64]) {
            Err(RpcError::InvalidParameter(_)) => {}
            other => panic!("expected invalid parameter, got {:?}", other),
        }
    }

    #[test]
    fn join_rejects_duplicate_outpoints() {
        let b64 = create_pskt(&sample_inputs(), &sample_outputs(), 0, false).unwrap();
        match join_pskts(&[b64.clone(), b64]) {
            Err(RpcError::InputDuplicated(_)) => {}
            other => panic!("expected duplicated input error, got {:?}", other),
        }
    }

    #[test]
    fn convert_rejects_signed_inputs_without_permission() {
        // scriptSig carrying a single data push
        let tx_hex = "0200000001aad73931018bd25f84ae400b68848be09db706eac2ac18298babee71ab656f8b000000000251aafdffffff0152f5054a000000001976a9143545e6e33b832c47050f24d3eeb93c9c03948bc788ac00000000";
        match convert_to_pskt(tx_hex, false, None) {
            Err(RpcError::Deserialization(_)) => {}
            other => panic!("expected deserialization error, got {:?}", other),
        }
        assert!(convert_to_pskt(tx_hex, true, None).is_ok());
    }
}
