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

//! End-to-end tests of the cooperative signing workflow: a 2-of-3 P2WSH
//! multisig driven through creator, updater, two independent signers, the
//! combiner, finalizer and extractor, plus the algebraic laws of merge and
//! finalize.

use std::collections::BTreeSet;
use std::str::FromStr;

use bitcoin::blockdata::opcodes;
use bitcoin::blockdata::script::Builder;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{KeyPair, Secp256k1, SecretKey};
use bitcoin::util::bip32::{ChildNumber, DerivationPath, Fingerprint, KeySource};
use bitcoin::util::taproot::{ControlBlock, LeafVersion, TaprootBuilder};
use bitcoin::{
    EcdsaSighashType, OutPoint, PackedLockTime, PublicKey, SchnorrSighashType, Script, Sequence,
    Transaction, TxIn, TxOut, Txid, Witness,
};

use koyotecoin_pskt::analyzer::{analyze_pskt, AnalyzerOptions};
use koyotecoin_pskt::finalizer::{finalize_and_extract_pskt, finalize_pskt};
use koyotecoin_pskt::rpc;
use koyotecoin_pskt::sign::{
    precompute_pskt_data, sign_pskt_input, MemorySigningProvider, ProviderError, SigningProvider,
};
use koyotecoin_pskt::{
    encode, raw, Error, PartiallySignedTransaction, PsktRole, PsktSighashType,
};

const UTXO_VALUE: u64 = 100_000_000;
const SPEND_VALUE: u64 = 99_990_000;

fn secret_key(tag: u8) -> SecretKey {
    SecretKey::from_slice(&[tag; 32]).expect("statically valid key bytes")
}

fn cosigner_keys() -> Vec<(SecretKey, PublicKey)> {
    let secp = Secp256k1::new();
    [0x11u8, 0x22, 0x33]
        .iter()
        .map(|tag| {
            let key = secret_key(*tag);
            let pubkey =
                PublicKey::new(bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &key));
            (key, pubkey)
        })
        .collect()
}

fn multisig_script(pubkeys: &[PublicKey]) -> Script {
    let mut builder = Builder::new().push_opcode(opcodes::all::OP_PUSHNUM_2);
    for pubkey in pubkeys {
        builder = builder.push_slice(&pubkey.to_bytes());
    }
    builder
        .push_opcode(opcodes::all::OP_PUSHNUM_3)
        .push_opcode(opcodes::all::OP_CHECKMULTISIG)
        .into_script()
}

fn unsigned_tx(prevout_tag: &[u8]) -> Transaction {
    Transaction {
        version: 2,
        lock_time: PackedLockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::new(Txid::hash(prevout_tag), 0),
            script_sig: Script::new(),
            sequence: Sequence(0xFFFFFFFD),
            witness: Witness::default(),
        }],
        output: vec![TxOut {
            value: SPEND_VALUE,
            script_pubkey: Script::new_p2pkh(&bitcoin::PubkeyHash::hash(b"destination")),
        }],
    }
}

fn origin(index: u32) -> KeySource {
    let path = DerivationPath::from(vec![
        ChildNumber::from_hardened_idx(48).expect("in range"),
        ChildNumber::from_normal_idx(index).expect("in range"),
    ]);
    (Fingerprint::from(&[0xde, 0xad, 0xbe, 0xef][..]), path)
}

/// Creator + updater halves of the workflow: a PSKT over the multisig
/// deposit with the witness UTXO, witness script and key origins attached.
fn updated_pskt() -> (PartiallySignedTransaction, Script, Vec<(SecretKey, PublicKey)>) {
    let keys = cosigner_keys();
    let pubkeys: Vec<PublicKey> = keys.iter().map(|(_, pubkey)| *pubkey).collect();
    let witness_script = multisig_script(&pubkeys);

    let mut pskt =
        PartiallySignedTransaction::from_unsigned_tx(unsigned_tx(b"deposit")).expect("unsigned");

    pskt.inputs[0].witness_utxo = Some(TxOut {
        value: UTXO_VALUE,
        script_pubkey: witness_script.to_v0_p2wsh(),
    });
    pskt.inputs[0].witness_script = Some(witness_script.clone());
    for (index, pubkey) in pubkeys.iter().enumerate() {
        pskt.inputs[0]
            .bip32_derivation
            .insert(*pubkey, origin(index as u32));
    }

    (pskt, witness_script, keys)
}

fn sign_with(
    pskt: &PartiallySignedTransaction,
    key: SecretKey,
) -> PartiallySignedTransaction {
    let mut provider = MemorySigningProvider::new();
    provider.add_key(key);

    let mut signed = pskt.clone();
    let txdata = precompute_pskt_data(&signed);
    let complete = sign_pskt_input(
        &provider,
        &mut signed,
        0,
        Some(&txdata),
        PsktSighashType::from(EcdsaSighashType::All),
        None,
        false,
    )
    .expect("signing should not error");
    assert!(!complete, "a single signature cannot complete a 2-of-3");
    signed
}

#[test]
fn creator_output_needs_updater() {
    let pskt = PartiallySignedTransaction::from_unsigned_tx(unsigned_tx(b"deposit"))
        .expect("unsigned");
    let analysis = analyze_pskt(pskt, &AnalyzerOptions::default());
    assert_eq!(analysis.next, PsktRole::Updater);
    assert!(!analysis.inputs[0].has_utxo);
    assert!(analysis.fee.is_none());
}

#[test]
fn updated_pskt_needs_signer_and_reports_missing_sigs() {
    let (pskt, _, keys) = updated_pskt();
    let analysis = analyze_pskt(pskt, &AnalyzerOptions::default());

    assert_eq!(analysis.next, PsktRole::Signer);
    assert!(analysis.inputs[0].has_utxo);
    assert!(!analysis.inputs[0].is_final);
    assert!(analysis.inputs[0].missing_pubkeys.is_empty());
    assert!(analysis.inputs[0].missing_witness_script.is_none());

    let mut expected: Vec<_> = keys
        .iter()
        .map(|(_, pubkey)| pubkey.pubkey_hash())
        .collect();
    let mut reported = analysis.inputs[0].missing_sigs.clone();
    expected.sort();
    reported.sort();
    assert_eq!(reported, expected);
}

#[test]
fn fee_is_input_minus_output() {
    let (pskt, _, _) = updated_pskt();
    let analysis = analyze_pskt(pskt, &AnalyzerOptions::default());
    assert_eq!(analysis.fee, Some((UTXO_VALUE - SPEND_VALUE) as i64));
    let vsize = analysis.estimated_vsize.expect("estimable with dummy sigs");
    assert!(vsize > 0);
    assert_eq!(
        analysis.estimated_feerate,
        Some((UTXO_VALUE - SPEND_VALUE) as i64 * 1000 / vsize as i64)
    );
}

#[test]
fn two_signers_combine_to_two_partial_sigs() {
    let (pskt, _, keys) = updated_pskt();

    let p1 = sign_with(&pskt, keys[0].0);
    let p2 = sign_with(&pskt, keys[1].0);
    assert_eq!(p1.inputs[0].partial_sigs.len(), 1);
    assert_eq!(p2.inputs[0].partial_sigs.len(), 1);

    let combined = PartiallySignedTransaction::combine(vec![p1, p2]).expect("same transaction");
    assert_eq!(combined.inputs[0].partial_sigs.len(), 2);
}

#[test]
fn finalize_and_extract_builds_null_dummy_witness() {
    let (pskt, witness_script, keys) = updated_pskt();

    let p1 = sign_with(&pskt, keys[0].0);
    let p2 = sign_with(&pskt, keys[1].0);
    let mut combined =
        PartiallySignedTransaction::combine(vec![p1, p2]).expect("same transaction");

    let sig_a = combined.inputs[0].partial_sigs[&keys[0].1].clone();
    let sig_b = combined.inputs[0].partial_sigs[&keys[1].1].clone();

    let tx = finalize_and_extract_pskt(&mut combined).expect("2-of-3 fully signed");

    // BIP-147 null dummy, then the signatures in pubkey order, then the
    // witness script.
    assert_eq!(
        tx.input[0].witness.to_vec(),
        vec![vec![], sig_a, sig_b, witness_script.to_bytes()]
    );
    assert!(tx.input[0].script_sig.is_empty());
    assert_eq!(tx.output, pskt.unsigned_tx().output);
    assert_eq!(tx.lock_time, pskt.unsigned_tx().lock_time);
    assert_eq!(tx.version, pskt.unsigned_tx().version);
}

#[test]
fn finalize_is_idempotent() {
    let (pskt, _, keys) = updated_pskt();
    let p1 = sign_with(&pskt, keys[0].0);
    let p2 = sign_with(&pskt, keys[2].0);
    let mut combined =
        PartiallySignedTransaction::combine(vec![p1, p2]).expect("same transaction");

    assert!(finalize_pskt(&mut combined));
    let once = combined.clone();
    assert!(finalize_pskt(&mut combined));
    assert_eq!(once, combined);
}

#[test]
fn analyzer_next_is_monotone_in_signatures() {
    let (pskt, _, keys) = updated_pskt();
    let options = AnalyzerOptions::default();

    let before = analyze_pskt(pskt.clone(), &options);
    assert_eq!(before.next, PsktRole::Signer);

    let p1 = sign_with(&pskt, keys[0].0);
    let after_one = analyze_pskt(p1.clone(), &options);
    assert!(before.next <= after_one.next);

    let p2 = sign_with(&pskt, keys[1].0);
    let combined = PartiallySignedTransaction::combine(vec![p1, p2]).expect("same transaction");
    let after_two = analyze_pskt(combined, &options);
    assert!(after_one.next <= after_two.next);
    assert_eq!(after_two.next, PsktRole::Finalizer);
}

#[test]
fn merge_is_commutative_and_idempotent() {
    let (pskt, _, keys) = updated_pskt();

    let mut a = sign_with(&pskt, keys[0].0);
    a.inputs[0].unknown.insert(
        raw::Key {
            type_value: 0x21,
            key: vec![0xaa],
        },
        vec![0x01],
    );

    let mut b = sign_with(&pskt, keys[1].0);
    b.global.unknown.insert(
        raw::Key {
            type_value: 0x22,
            key: vec![],
        },
        vec![0x02],
    );
    b.inputs[0].sighash_type = Some(PsktSighashType::from(EcdsaSighashType::All));

    let mut ab = a.clone();
    ab.merge(b.clone()).expect("same transaction");
    let mut ba = b.clone();
    ba.merge(a.clone()).expect("same transaction");
    assert_eq!(ab, ba);

    let mut aa = a.clone();
    aa.merge(a.clone()).expect("same transaction");
    assert_eq!(aa, a);
}

#[test]
fn combine_is_associative() {
    let (pskt, _, keys) = updated_pskt();
    let a = sign_with(&pskt, keys[0].0);
    let b = sign_with(&pskt, keys[1].0);
    let c = sign_with(&pskt, keys[2].0);

    let left = PartiallySignedTransaction::combine(vec![
        PartiallySignedTransaction::combine(vec![a.clone(), b.clone()]).expect("combine"),
        c.clone(),
    ])
    .expect("combine");
    let flat = PartiallySignedTransaction::combine(vec![a, b, c]).expect("combine");
    assert_eq!(left, flat);
}

#[test]
fn combining_different_transactions_fails() {
    let (pskt, _, _) = updated_pskt();
    let other = PartiallySignedTransaction::from_unsigned_tx(unsigned_tx(b"other deposit"))
        .expect("unsigned");

    match PartiallySignedTransaction::combine(vec![pskt.clone(), other]) {
        Err(Error::UniqueIdMismatch { .. }) => {}
        other => panic!("expected unique id mismatch, got {:?}", other),
    }

    // and through the RPC surface
    let other = PartiallySignedTransaction::from_unsigned_tx(unsigned_tx(b"other deposit"))
        .expect("unsigned");
    match rpc::combine_pskts(&[pskt.to_string(), other.to_string()]) {
        Err(rpc::RpcError::PsktMismatch) => {}
        other => panic!("expected pskt mismatch, got {:?}", other),
    }
}

#[test]
fn joining_overlapping_pskts_fails() {
    let (pskt, _, _) = updated_pskt();
    let b64 = pskt.to_string();
    match rpc::join_pskts(&[b64.clone(), b64]) {
        Err(rpc::RpcError::InputDuplicated(_)) => {}
        other => panic!("expected duplicated input, got {:?}", other),
    }
}

#[test]
fn joining_disjoint_pskts_preserves_records() {
    let (pskt_a, _, _) = updated_pskt();
    let pskt_b = PartiallySignedTransaction::from_unsigned_tx(unsigned_tx(b"second deposit"))
        .expect("unsigned");

    let joined_b64 =
        rpc::join_pskts(&[pskt_a.to_string(), pskt_b.to_string()]).expect("disjoint inputs");
    let joined = PartiallySignedTransaction::from_str(&joined_b64).expect("valid pskt");

    assert_eq!(joined.inputs.len(), 2);
    assert_eq!(joined.outputs.len(), 2);
    // the updated input travels with its metadata, wherever it was shuffled
    assert_eq!(
        joined
            .inputs
            .iter()
            .filter(|input| input.witness_script.is_some())
            .count(),
        1
    );
}

#[test]
fn round_trip_preserves_all_records() {
    let (pskt, _, keys) = updated_pskt();
    let mut pskt = sign_with(&pskt, keys[0].0);

    pskt.global.unknown.insert(
        raw::Key {
            type_value: 0x42,
            key: vec![0x01, 0x02, 0x03],
        },
        vec![0xff],
    );
    pskt.inputs[0].proprietary.insert(
        raw::ProprietaryKey {
            prefix: b"koyote".to_vec(),
            subtype: 0x07,
            key: vec![0x11],
        },
        vec![0x22, 0x33],
    );
    pskt.outputs[0].unknown.insert(
        raw::Key {
            type_value: 0x99,
            key: vec![],
        },
        vec![],
    );

    let bytes = encode::serialize(&pskt);
    let decoded: PartiallySignedTransaction = encode::deserialize(&bytes).expect("round trip");
    assert_eq!(pskt, decoded);
    assert_eq!(encode::serialize(&decoded), bytes);

    let b64 = pskt.to_string();
    let decoded = PartiallySignedTransaction::from_str(&b64).expect("base64 round trip");
    assert_eq!(pskt, decoded);
}

#[test]
fn taproot_key_path_sign_finalize_extract() {
    let secp = Secp256k1::new();
    let keypair = KeyPair::from_seckey_slice(&secp, &[0x55; 32]).expect("valid key bytes");
    let internal_key = keypair.x_only_public_key().0;
    let script_pubkey = Script::new_v1_p2tr(&secp, internal_key, None);

    let mut pskt = PartiallySignedTransaction::from_unsigned_tx(unsigned_tx(b"taproot deposit"))
        .expect("unsigned");
    pskt.inputs[0].witness_utxo = Some(TxOut {
        value: UTXO_VALUE,
        script_pubkey,
    });
    pskt.inputs[0].tap_internal_key = Some(internal_key);

    let mut provider = MemorySigningProvider::new();
    provider.add_schnorr_key(keypair);

    let txdata = precompute_pskt_data(&pskt);
    let complete = sign_pskt_input(
        &provider,
        &mut pskt,
        0,
        Some(&txdata),
        PsktSighashType::from(SchnorrSighashType::Default),
        None,
        false,
    )
    .expect("signing should not error");
    assert!(complete);

    // not finalizing: the signature lands in the key-path record, not in a
    // final witness
    let key_sig = pskt.inputs[0]
        .tap_key_sig
        .clone()
        .expect("key-path signature recorded");
    assert_eq!(key_sig.to_vec().len(), 64);
    assert!(pskt.inputs[0].final_script_witness.is_none());

    let tx = finalize_and_extract_pskt(&mut pskt).expect("key path complete");
    assert_eq!(tx.input[0].witness.to_vec(), vec![key_sig.to_vec()]);
    assert!(tx.input[0].script_sig.is_empty());
}

#[test]
fn taproot_script_path_spends_single_key_leaf() {
    let secp = Secp256k1::new();
    let internal_key = KeyPair::from_seckey_slice(&secp, &[0x66; 32])
        .expect("valid key bytes")
        .x_only_public_key()
        .0;
    let leaf_keypair = KeyPair::from_seckey_slice(&secp, &[0x77; 32]).expect("valid key bytes");
    let leaf_key = leaf_keypair.x_only_public_key().0;
    let leaf_script = Builder::new()
        .push_slice(&leaf_key.serialize())
        .push_opcode(opcodes::all::OP_CHECKSIG)
        .into_script();

    let spend_info = TaprootBuilder::new()
        .add_leaf(0, leaf_script.clone())
        .expect("single leaf")
        .finalize(&secp, internal_key)
        .expect("complete tree");
    let script_pubkey = Script::new_v1_p2tr(&secp, internal_key, spend_info.merkle_root());
    let control_block = spend_info
        .control_block(&(leaf_script.clone(), LeafVersion::TapScript))
        .expect("leaf in tree");

    let mut pskt = PartiallySignedTransaction::from_unsigned_tx(unsigned_tx(b"tapscript deposit"))
        .expect("unsigned");
    pskt.inputs[0].witness_utxo = Some(TxOut {
        value: UTXO_VALUE,
        script_pubkey,
    });
    pskt.inputs[0].tap_internal_key = Some(internal_key);
    pskt.inputs[0].tap_merkle_root = spend_info.merkle_root();
    let mut control_blocks = BTreeSet::new();
    control_blocks.insert(ControlBlock::serialize(&control_block));
    pskt.inputs[0]
        .tap_scripts
        .insert((leaf_script.clone(), 0xc0), control_blocks);

    // Only the leaf key is known, so the key-path attempt falls through to
    // the script path.
    let mut provider = MemorySigningProvider::new();
    provider.add_schnorr_key(leaf_keypair);

    let txdata = precompute_pskt_data(&pskt);
    let complete = sign_pskt_input(
        &provider,
        &mut pskt,
        0,
        Some(&txdata),
        PsktSighashType::from(SchnorrSighashType::Default),
        None,
        true,
    )
    .expect("signing should not error");
    assert!(complete);

    let witness = pskt.inputs[0]
        .final_script_witness
        .clone()
        .expect("finalized witness")
        .to_vec();
    assert_eq!(witness.len(), 3);
    assert_eq!(witness[0].len(), 64);
    assert_eq!(witness[1], leaf_script.to_bytes());
    assert_eq!(witness[2], ControlBlock::serialize(&control_block));
}

#[test]
fn provider_failure_surfaces_as_error() {
    struct RefusingSigner(PublicKey);

    impl SigningProvider for RefusingSigner {
        fn get_pubkey(&self, key_id: &bitcoin::PubkeyHash) -> Option<PublicKey> {
            if *key_id == self.0.pubkey_hash() {
                Some(self.0)
            } else {
                None
            }
        }

        fn sign_ecdsa(
            &self,
            _msg: &bitcoin::secp256k1::Message,
            _pubkey: &PublicKey,
        ) -> Result<Option<bitcoin::secp256k1::ecdsa::Signature>, ProviderError> {
            Err(ProviderError("signing device rejected the request".to_string()))
        }
    }

    let secp = Secp256k1::new();
    let key = secret_key(0x44);
    let pubkey = PublicKey::new(bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &key));

    let prev_tx = Transaction {
        version: 2,
        lock_time: PackedLockTime::ZERO,
        input: vec![TxIn::default()],
        output: vec![TxOut {
            value: UTXO_VALUE,
            script_pubkey: Script::new_p2pkh(&pubkey.pubkey_hash()),
        }],
    };
    let tx = Transaction {
        version: 2,
        lock_time: PackedLockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::new(prev_tx.txid(), 0),
            script_sig: Script::new(),
            sequence: Sequence(0xFFFFFFFD),
            witness: Witness::default(),
        }],
        output: vec![TxOut {
            value: SPEND_VALUE,
            script_pubkey: Script::new_p2pkh(&bitcoin::PubkeyHash::hash(b"destination")),
        }],
    };

    let mut pskt = PartiallySignedTransaction::from_unsigned_tx(tx).expect("unsigned");
    pskt.inputs[0].non_witness_utxo = Some(prev_tx);

    let txdata = precompute_pskt_data(&pskt);
    match sign_pskt_input(
        &RefusingSigner(pubkey),
        &mut pskt,
        0,
        Some(&txdata),
        PsktSighashType::from(EcdsaSighashType::All),
        None,
        false,
    ) {
        Err(Error::ProviderFailure(0)) => {}
        other => panic!("expected provider failure, got {:?}", other),
    }
}

#[test]
fn signing_a_witness_utxo_without_scripts_fails() {
    let mut pskt = PartiallySignedTransaction::from_unsigned_tx(unsigned_tx(b"deposit"))
        .expect("unsigned");
    // witness UTXO present but no witness script: nothing can prove a
    // witness signature, which an unverifiable UTXO requires
    let (_, witness_script, _) = updated_pskt();
    pskt.inputs[0].witness_utxo = Some(TxOut {
        value: UTXO_VALUE,
        script_pubkey: witness_script.to_v0_p2wsh(),
    });

    let mut provider = MemorySigningProvider::new();
    provider.add_key(secret_key(0x11));
    let txdata = precompute_pskt_data(&pskt);
    match sign_pskt_input(
        &provider,
        &mut pskt,
        0,
        Some(&txdata),
        PsktSighashType::from(EcdsaSighashType::All),
        None,
        false,
    ) {
        Err(Error::WitnessSignatureRequired(0)) => {}
        other => panic!("expected witness signature requirement, got {:?}", other),
    }
}

#[test]
fn non_witness_utxo_must_match_prevout() {
    let mut pskt = PartiallySignedTransaction::from_unsigned_tx(unsigned_tx(b"deposit"))
        .expect("unsigned");
    // a previous transaction whose txid does not match the prevout
    pskt.inputs[0].non_witness_utxo = Some(unsigned_tx(b"unrelated"));

    match pskt.get_input_utxo(0) {
        Err(Error::UtxoMismatch(0)) => {}
        other => panic!("expected utxo mismatch, got {:?}", other),
    }
}

#[test]
fn analyze_json_shape_for_updated_pskt() {
    let (pskt, _, _) = updated_pskt();
    let analysis = rpc::analyze_pskt_b64(&pskt.to_string(), &AnalyzerOptions::default())
        .expect("valid pskt");

    assert_eq!(analysis["next"], serde_json::json!("signer"));
    assert_eq!(analysis["inputs"][0]["has_utxo"], serde_json::json!(true));
    assert_eq!(analysis["inputs"][0]["is_final"], serde_json::json!(false));
    assert_eq!(
        analysis["inputs"][0]["missing"]["signatures"]
            .as_array()
            .expect("three missing signatures")
            .len(),
        3
    );
    assert!(analysis["estimated_vsize"].is_number());
    assert!(analysis["fee"].is_number());
}

#[test]
fn decode_json_shape_for_signed_pskt() {
    let (pskt, witness_script, keys) = updated_pskt();
    let signed = sign_with(&pskt, keys[0].0);
    let decoded = rpc::decode_pskt(&signed.to_string()).expect("valid pskt");

    assert_eq!(decoded["pskt_version"], serde_json::json!(0));
    let input = &decoded["inputs"][0];
    assert_eq!(
        input["witness_script"]["hex"],
        serde_json::json!(bitcoin::hashes::hex::ToHex::to_hex(
            witness_script.as_bytes()
        ))
    );
    assert_eq!(input["witness_script"]["type"], serde_json::json!("multisig"));
    assert_eq!(
        input["partial_signatures"]
            .as_object()
            .expect("one partial signature")
            .len(),
        1
    );
    assert_eq!(input["bip32_derivs"].as_array().expect("origins").len(), 3);
    // all UTXO slots filled: fee must be reported
    assert!(decoded["fee"].is_number());
}
