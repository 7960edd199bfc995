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

//! # Signature pipeline
//!
//! Converts PSKT input metadata to and from a neutral [`SignatureData`]
//! bundle and drives a [`SigningProvider`] to produce or verify partial
//! signatures. The engine composes two capabilities: the provider knows
//! keys, scripts, and origins (and performs the actual raw signing, so the
//! engine never touches private keys), while a [`SignatureCreator`] knows
//! how to compute the signature hash for one input of one transaction.

use std::collections::BTreeMap;
use std::fmt;

use bitcoin::blockdata::opcodes;
use bitcoin::blockdata::script::{Builder, Instruction};
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{self, Message, Secp256k1};
use bitcoin::util::bip32::KeySource;
use bitcoin::util::schnorr::TapTweak;
use bitcoin::util::sighash::{Prevouts, SighashCache};
use bitcoin::util::taproot::{LeafVersion, TapBranchHash, TapLeafHash};
use bitcoin::{
    EcdsaSighashType, PubkeyHash, PublicKey, SchnorrSig, Script, ScriptHash, Transaction, TxOut,
    WScriptHash, Witness, XOnlyPublicKey,
};

use crate::map::PsktSighashType;
use crate::{Error, Input, Output, PartiallySignedTransaction};

/// The leaf version byte of an ordinary tapscript leaf.
const TAPROOT_LEAF_TAPSCRIPT: u8 = 0xc0;

/// The rough classes of output scripts the engine knows how to satisfy,
/// mirroring the standard script templates.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScriptType {
    /// No standard template matched
    NonStandard,
    /// `<pubkey> OP_CHECKSIG`
    Pubkey,
    /// `OP_DUP OP_HASH160 <keyhash> OP_EQUALVERIFY OP_CHECKSIG`
    PubkeyHash,
    /// `OP_HASH160 <scripthash> OP_EQUAL`
    ScriptHash,
    /// `OP_m <pubkey>... OP_n OP_CHECKMULTISIG`
    Multisig,
    /// `OP_RETURN ...`
    NullData,
    /// Witness v0 keyhash program
    WitnessV0KeyHash,
    /// Witness v0 scripthash program
    WitnessV0ScriptHash,
    /// Witness v1 taproot program
    WitnessV1Taproot,
    /// A witness program of an unknown version
    WitnessUnknown,
}

impl ScriptType {
    /// The name used for this script class in JSON output.
    pub fn name(self) -> &'static str {
        match self {
            ScriptType::NonStandard => "nonstandard",
            ScriptType::Pubkey => "pubkey",
            ScriptType::PubkeyHash => "pubkeyhash",
            ScriptType::ScriptHash => "scripthash",
            ScriptType::Multisig => "multisig",
            ScriptType::NullData => "nulldata",
            ScriptType::WitnessV0KeyHash => "witness_v0_keyhash",
            ScriptType::WitnessV0ScriptHash => "witness_v0_scripthash",
            ScriptType::WitnessV1Taproot => "witness_v1_taproot",
            ScriptType::WitnessUnknown => "witness_unknown",
        }
    }
}

/// Classify a scriptPubKey into one of the standard template classes.
pub fn classify_script(script: &Script) -> ScriptType {
    if script.is_p2pk() {
        ScriptType::Pubkey
    } else if script.is_p2pkh() {
        ScriptType::PubkeyHash
    } else if script.is_p2sh() {
        ScriptType::ScriptHash
    } else if script.is_op_return() {
        ScriptType::NullData
    } else if script.is_v0_p2wpkh() {
        ScriptType::WitnessV0KeyHash
    } else if script.is_v0_p2wsh() {
        ScriptType::WitnessV0ScriptHash
    } else if script.is_v1_p2tr() {
        ScriptType::WitnessV1Taproot
    } else if script.is_witness_program() {
        ScriptType::WitnessUnknown
    } else if parse_multisig(script).is_some() {
        ScriptType::Multisig
    } else {
        ScriptType::NonStandard
    }
}

/// Parse a bare multisig script into its threshold and public keys.
pub fn parse_multisig(script: &Script) -> Option<(usize, Vec<PublicKey>)> {
    let mut instructions = Vec::new();
    for ins in script.instructions() {
        instructions.push(ins.ok()?);
    }

    if instructions.len() < 4 {
        return None;
    }

    let required = match instructions[0] {
        Instruction::Op(op) => decode_pushnum(op)?,
        _ => return None,
    };
    match instructions[instructions.len() - 1] {
        Instruction::Op(opcodes::all::OP_CHECKMULTISIG) => {}
        _ => return None,
    }
    let count = match instructions[instructions.len() - 2] {
        Instruction::Op(op) => decode_pushnum(op)?,
        _ => return None,
    };

    let mut pubkeys = Vec::with_capacity(count as usize);
    for ins in &instructions[1..instructions.len() - 2] {
        match ins {
            Instruction::PushBytes(bytes) => pubkeys.push(PublicKey::from_slice(bytes).ok()?),
            _ => return None,
        }
    }

    if pubkeys.len() != count as usize || required > count {
        return None;
    }
    Some((required as usize, pubkeys))
}

fn decode_pushnum(op: opcodes::All) -> Option<u8> {
    let b = op.into_u8();
    if (0x51..=0x60).contains(&b) {
        Some(b - 0x50)
    } else {
        None
    }
}

/// The sighash algorithm in force for a particular script layer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SigVersion {
    /// Pre-segwit signature hashing
    Base,
    /// BIP-143 signature hashing
    WitnessV0,
    /// BIP-341 signature hashing
    Taproot,
}

/// The neutral bundle exchanged between a PSKT input and the signing
/// machinery.
#[derive(Clone, Debug, Default)]
pub struct SignatureData {
    /// Stack of data pushes forming the scriptSig
    pub script_sig: Script,
    /// The witness stack
    pub script_witness: Witness,
    /// Whether the input carries enough data to be final
    pub complete: bool,
    /// Whether a witness signature was produced
    pub witness: bool,
    /// ECDSA signatures keyed by the hash160 of the signing public key
    pub signatures: BTreeMap<PubkeyHash, (PublicKey, Vec<u8>)>,
    /// Public keys with origin information, keyed by their hash160
    pub misc_pubkeys: BTreeMap<PubkeyHash, (PublicKey, KeySource)>,
    /// The redeem script, when known
    pub redeem_script: Option<Script>,
    /// The witness script, when known
    pub witness_script: Option<Script>,
    /// Taproot key-path spend signature
    pub taproot_key_path_sig: Option<SchnorrSig>,
    /// Taproot script-path spend signatures keyed by (pubkey, leaf hash)
    pub taproot_script_sigs: BTreeMap<(XOnlyPublicKey, TapLeafHash), SchnorrSig>,
    /// Taproot internal key
    pub tr_internal_key: Option<XOnlyPublicKey>,
    /// Taproot merkle root
    pub tr_merkle_root: Option<TapBranchHash>,
    /// Taproot leaf scripts and the serialized control blocks committing to
    /// them
    pub tr_scripts: BTreeMap<(Script, u8), std::collections::BTreeSet<Vec<u8>>>,
    /// Taproot output script tree passthrough
    pub tap_tree: Option<crate::serialize::TapTree>,
    /// Taproot public keys with origin information and the leaves they
    /// appear in
    pub taproot_misc_pubkeys: BTreeMap<XOnlyPublicKey, (Vec<TapLeafHash>, KeySource)>,
    /// Key IDs whose public key could not be found
    pub missing_pubkeys: Vec<PubkeyHash>,
    /// Key IDs whose signature could not be created
    pub missing_sigs: Vec<PubkeyHash>,
    /// Hash160 of the missing redeem script, if any
    pub missing_redeem_script: Option<ScriptHash>,
    /// SHA256 of the missing witness script, if any
    pub missing_witness_script: Option<WScriptHash>,
}

/// Failure reported by a signing provider that attempted an operation and
/// could not complete it (a signing device fault, a user rejection).
/// Distinct from not knowing the requested key, which providers report by
/// returning `Ok(None)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderError(pub String);

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "signing provider failure: {}", self.0)
    }
}

impl std::error::Error for ProviderError {}

/// A capability that knows keys, scripts, and origin metadata, and performs
/// raw signing on request. Metadata lookups default to "don't know"; the
/// signing methods additionally distinguish an unknown key (`Ok(None)`)
/// from an attempted operation that failed (`Err`), which the pipeline
/// propagates instead of treating as a missing signature.
pub trait SigningProvider {
    /// Look up a redeem script by its hash160.
    fn get_script(&self, _script_id: &ScriptHash) -> Option<Script> {
        None
    }

    /// Look up a witness script by its sha256.
    fn get_witness_script(&self, _script_id: &WScriptHash) -> Option<Script> {
        None
    }

    /// Look up a public key by its hash160.
    fn get_pubkey(&self, _key_id: &PubkeyHash) -> Option<PublicKey> {
        None
    }

    /// Look up the BIP-32 origin of a public key.
    fn get_key_origin(&self, _key_id: &PubkeyHash) -> Option<KeySource> {
        None
    }

    /// Produce an ECDSA signature over `msg` with the key behind `pubkey`.
    fn sign_ecdsa(
        &self,
        _msg: &Message,
        _pubkey: &PublicKey,
    ) -> Result<Option<secp256k1::ecdsa::Signature>, ProviderError> {
        Ok(None)
    }

    /// Produce a Schnorr signature over `msg` with the key behind
    /// `internal_key`, tweaked for a key-path spend committing to
    /// `merkle_root`.
    fn sign_schnorr_key_spend(
        &self,
        _msg: &Message,
        _internal_key: &XOnlyPublicKey,
        _merkle_root: Option<TapBranchHash>,
    ) -> Result<Option<secp256k1::schnorr::Signature>, ProviderError> {
        Ok(None)
    }

    /// Produce a Schnorr signature over `msg` with the untweaked key behind
    /// `pubkey` for a script-path spend of `leaf_hash`.
    fn sign_schnorr_script_spend(
        &self,
        _msg: &Message,
        _pubkey: &XOnlyPublicKey,
        _leaf_hash: TapLeafHash,
    ) -> Result<Option<secp256k1::schnorr::Signature>, ProviderError> {
        Ok(None)
    }
}

/// A provider that knows nothing. Used by the finalizer and the analyzer,
/// which only rearrange material already present in the PSKT.
pub struct DummySigningProvider;

impl SigningProvider for DummySigningProvider {}

/// An in-memory fillable signing provider, mainly useful for wallets-in-a-
/// box and tests.
#[derive(Default)]
pub struct MemorySigningProvider {
    scripts: BTreeMap<ScriptHash, Script>,
    witness_scripts: BTreeMap<WScriptHash, Script>,
    pubkeys: BTreeMap<PubkeyHash, PublicKey>,
    origins: BTreeMap<PubkeyHash, KeySource>,
    keys: BTreeMap<PubkeyHash, secp256k1::SecretKey>,
    schnorr_keys: BTreeMap<XOnlyPublicKey, secp256k1::KeyPair>,
}

impl MemorySigningProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Default::default()
    }

    /// Register a script, retrievable both as a redeem script (by hash160)
    /// and as a witness script (by sha256).
    pub fn add_script(&mut self, script: Script) {
        self.scripts.insert(script.script_hash(), script.clone());
        self.witness_scripts.insert(script.wscript_hash(), script);
    }

    /// Register a public key without a secret.
    pub fn add_pubkey(&mut self, pubkey: PublicKey) {
        self.pubkeys.insert(pubkey.pubkey_hash(), pubkey);
    }

    /// Register the BIP-32 origin of a public key.
    pub fn add_key_origin(&mut self, pubkey: PublicKey, origin: KeySource) {
        self.add_pubkey(pubkey);
        self.origins.insert(pubkey.pubkey_hash(), origin);
    }

    /// Register a secret key; its public key becomes known as well.
    pub fn add_key(&mut self, key: secp256k1::SecretKey) {
        let secp = Secp256k1::new();
        let pubkey = PublicKey::new(secp256k1::PublicKey::from_secret_key(&secp, &key));
        self.pubkeys.insert(pubkey.pubkey_hash(), pubkey);
        self.keys.insert(pubkey.pubkey_hash(), key);
    }

    /// Register a keypair for schnorr signing, looked up by its x-only
    /// public key.
    pub fn add_schnorr_key(&mut self, keypair: secp256k1::KeyPair) {
        self.schnorr_keys
            .insert(keypair.x_only_public_key().0, keypair);
    }
}

impl SigningProvider for MemorySigningProvider {
    fn get_script(&self, script_id: &ScriptHash) -> Option<Script> {
        self.scripts.get(script_id).cloned()
    }

    fn get_witness_script(&self, script_id: &WScriptHash) -> Option<Script> {
        self.witness_scripts.get(script_id).cloned()
    }

    fn get_pubkey(&self, key_id: &PubkeyHash) -> Option<PublicKey> {
        self.pubkeys.get(key_id).copied()
    }

    fn get_key_origin(&self, key_id: &PubkeyHash) -> Option<KeySource> {
        self.origins.get(key_id).cloned()
    }

    fn sign_ecdsa(
        &self,
        msg: &Message,
        pubkey: &PublicKey,
    ) -> Result<Option<secp256k1::ecdsa::Signature>, ProviderError> {
        let key = match self.keys.get(&pubkey.pubkey_hash()) {
            Some(key) => key,
            None => return Ok(None),
        };
        let secp = Secp256k1::new();
        Ok(Some(secp.sign_ecdsa(msg, key)))
    }

    fn sign_schnorr_key_spend(
        &self,
        msg: &Message,
        internal_key: &XOnlyPublicKey,
        merkle_root: Option<TapBranchHash>,
    ) -> Result<Option<secp256k1::schnorr::Signature>, ProviderError> {
        let keypair = match self.schnorr_keys.get(internal_key) {
            Some(keypair) => keypair,
            None => return Ok(None),
        };
        let secp = Secp256k1::new();
        let tweaked = keypair.tap_tweak(&secp, merkle_root);
        Ok(Some(secp.sign_schnorr_no_aux_rand(msg, &tweaked.into_inner())))
    }

    fn sign_schnorr_script_spend(
        &self,
        msg: &Message,
        pubkey: &XOnlyPublicKey,
        _leaf_hash: TapLeafHash,
    ) -> Result<Option<secp256k1::schnorr::Signature>, ProviderError> {
        let keypair = match self.schnorr_keys.get(pubkey) {
            Some(keypair) => keypair,
            None => return Ok(None),
        };
        let secp = Secp256k1::new();
        Ok(Some(secp.sign_schnorr_no_aux_rand(msg, keypair)))
    }
}

/// A capability that computes the signature hash for one input of one
/// transaction and asks a provider to sign it.
///
/// `Ok(None)` means no signature could be made (unknown key, missing
/// precomputed data); `Err` propagates a provider that tried and failed.
pub trait SignatureCreator {
    /// Create an ECDSA signature (DER with the sighash byte appended) for
    /// `pubkey` over `script_code`.
    fn create_ecdsa_sig(
        &self,
        provider: &dyn SigningProvider,
        pubkey: &PublicKey,
        script_code: &Script,
        sig_version: SigVersion,
    ) -> Result<Option<Vec<u8>>, ProviderError>;

    /// Create a Schnorr signature for a taproot key-path spend.
    fn create_taproot_key_spend_sig(
        &self,
        provider: &dyn SigningProvider,
        internal_key: &XOnlyPublicKey,
        merkle_root: Option<TapBranchHash>,
    ) -> Result<Option<SchnorrSig>, ProviderError>;

    /// Create a Schnorr signature for a taproot script-path spend.
    fn create_taproot_script_spend_sig(
        &self,
        provider: &dyn SigningProvider,
        pubkey: &XOnlyPublicKey,
        leaf_hash: TapLeafHash,
    ) -> Result<Option<SchnorrSig>, ProviderError>;
}

/// A creator that emits maximum-size placeholder signatures without ever
/// computing a signature hash. Used for metadata-only passes and for size
/// estimation.
pub struct DummySignatureCreator;

impl SignatureCreator for DummySignatureCreator {
    fn create_ecdsa_sig(
        &self,
        _provider: &dyn SigningProvider,
        _pubkey: &PublicKey,
        _script_code: &Script,
        _sig_version: SigVersion,
    ) -> Result<Option<Vec<u8>>, ProviderError> {
        // Largest possible DER encoding: 33-byte r and s.
        let r_len = 32;
        let s_len = 32;
        let mut sig = vec![0u8; r_len + s_len + 7];
        sig[0] = 0x30;
        sig[1] = (r_len + s_len + 4) as u8;
        sig[2] = 0x02;
        sig[3] = r_len as u8;
        sig[4] = 0x01;
        sig[4 + r_len] = 0x02;
        sig[5 + r_len] = s_len as u8;
        sig[6 + r_len] = 0x01;
        sig.push(EcdsaSighashType::All.to_u32() as u8);
        Ok(Some(sig))
    }

    fn create_taproot_key_spend_sig(
        &self,
        _provider: &dyn SigningProvider,
        _internal_key: &XOnlyPublicKey,
        _merkle_root: Option<TapBranchHash>,
    ) -> Result<Option<SchnorrSig>, ProviderError> {
        Ok(dummy_schnorr_sig())
    }

    fn create_taproot_script_spend_sig(
        &self,
        _provider: &dyn SigningProvider,
        _pubkey: &XOnlyPublicKey,
        _leaf_hash: TapLeafHash,
    ) -> Result<Option<SchnorrSig>, ProviderError> {
        Ok(dummy_schnorr_sig())
    }
}

// Largest possible schnorr signature encoding: 64 bytes plus an explicit
// sighash byte.
fn dummy_schnorr_sig() -> Option<SchnorrSig> {
    let mut bytes = [0u8; 65];
    bytes[64] = EcdsaSighashType::All.to_u32() as u8;
    SchnorrSig::from_slice(&bytes).ok()
}

/// All spent outputs of a PSKT, gathered once so that witness signature
/// hashes can be computed. When any input UTXO is missing the data is
/// initialized in partial mode: taproot signing will not work, but ECDSA on
/// legacy inputs still will.
#[derive(Clone, Debug)]
pub struct PrecomputedTxData {
    spent_outputs: Option<Vec<TxOut>>,
}

impl PrecomputedTxData {
    /// All spent outputs in input order, or `None` in partial mode.
    pub fn all_spent_outputs(&self) -> Option<&[TxOut]> {
        self.spent_outputs.as_deref()
    }
}

/// Gather the spent outputs of every input of `pskt`.
pub fn precompute_pskt_data(pskt: &PartiallySignedTransaction) -> PrecomputedTxData {
    let mut utxos = Vec::with_capacity(pskt.inputs.len());
    for index in 0..pskt.inputs.len() {
        match pskt.get_input_utxo(index) {
            Ok(Some(utxo)) => utxos.push(utxo),
            _ => return PrecomputedTxData {
                spent_outputs: None,
            },
        }
    }
    PrecomputedTxData {
        spent_outputs: Some(utxos),
    }
}

/// A creator that computes real signature hashes over one input of an
/// unsigned transaction.
pub struct TransactionSignatureCreator<'a> {
    tx: &'a Transaction,
    input_index: usize,
    amount: u64,
    txdata: Option<&'a PrecomputedTxData>,
    sighash_type: PsktSighashType,
}

impl<'a> TransactionSignatureCreator<'a> {
    /// Build a creator for `input_index` of `tx`, spending `amount`.
    pub fn new(
        tx: &'a Transaction,
        input_index: usize,
        amount: u64,
        txdata: Option<&'a PrecomputedTxData>,
        sighash_type: PsktSighashType,
    ) -> Self {
        TransactionSignatureCreator {
            tx,
            input_index,
            amount,
            txdata,
            sighash_type,
        }
    }
}

impl<'a> SignatureCreator for TransactionSignatureCreator<'a> {
    fn create_ecdsa_sig(
        &self,
        provider: &dyn SigningProvider,
        pubkey: &PublicKey,
        script_code: &Script,
        sig_version: SigVersion,
    ) -> Result<Option<Vec<u8>>, ProviderError> {
        let hash_ty = match self.sighash_type.ecdsa_hash_ty() {
            Some(hash_ty) => hash_ty,
            None => return Ok(None),
        };
        let mut cache = SighashCache::new(self.tx);
        let sighash = match sig_version {
            SigVersion::Base => {
                match cache.legacy_signature_hash(self.input_index, script_code, hash_ty.to_u32())
                {
                    Ok(sighash) => sighash,
                    Err(_) => return Ok(None),
                }
            }
            SigVersion::WitnessV0 => {
                match cache.segwit_signature_hash(
                    self.input_index,
                    script_code,
                    self.amount,
                    hash_ty,
                ) {
                    Ok(sighash) => sighash,
                    Err(_) => return Ok(None),
                }
            }
            SigVersion::Taproot => return Ok(None),
        };
        let msg = match Message::from_slice(&sighash[..]) {
            Ok(msg) => msg,
            Err(_) => return Ok(None),
        };
        let sig = match provider.sign_ecdsa(&msg, pubkey)? {
            Some(sig) => sig,
            None => return Ok(None),
        };
        let mut bytes = sig.serialize_der().to_vec();
        bytes.push(hash_ty.to_u32() as u8);
        Ok(Some(bytes))
    }

    fn create_taproot_key_spend_sig(
        &self,
        provider: &dyn SigningProvider,
        internal_key: &XOnlyPublicKey,
        merkle_root: Option<TapBranchHash>,
    ) -> Result<Option<SchnorrSig>, ProviderError> {
        let prevouts = match self.txdata.and_then(|txdata| txdata.all_spent_outputs()) {
            Some(prevouts) => prevouts,
            None => return Ok(None),
        };
        let hash_ty = match self.sighash_type.schnorr_hash_ty() {
            Some(hash_ty) => hash_ty,
            None => return Ok(None),
        };
        let mut cache = SighashCache::new(self.tx);
        let sighash = match cache.taproot_key_spend_signature_hash(
            self.input_index,
            &Prevouts::All(prevouts),
            hash_ty,
        ) {
            Ok(sighash) => sighash,
            Err(_) => return Ok(None),
        };
        let msg = match Message::from_slice(&sighash[..]) {
            Ok(msg) => msg,
            Err(_) => return Ok(None),
        };
        match provider.sign_schnorr_key_spend(&msg, internal_key, merkle_root)? {
            Some(sig) => Ok(Some(SchnorrSig { sig, hash_ty })),
            None => Ok(None),
        }
    }

    fn create_taproot_script_spend_sig(
        &self,
        provider: &dyn SigningProvider,
        pubkey: &XOnlyPublicKey,
        leaf_hash: TapLeafHash,
    ) -> Result<Option<SchnorrSig>, ProviderError> {
        let prevouts = match self.txdata.and_then(|txdata| txdata.all_spent_outputs()) {
            Some(prevouts) => prevouts,
            None => return Ok(None),
        };
        let hash_ty = match self.sighash_type.schnorr_hash_ty() {
            Some(hash_ty) => hash_ty,
            None => return Ok(None),
        };
        let mut cache = SighashCache::new(self.tx);
        let sighash = match cache.taproot_script_spend_signature_hash(
            self.input_index,
            &Prevouts::All(prevouts),
            leaf_hash,
            hash_ty,
        ) {
            Ok(sighash) => sighash,
            Err(_) => return Ok(None),
        };
        let msg = match Message::from_slice(&sighash[..]) {
            Ok(msg) => msg,
            Err(_) => return Ok(None),
        };
        match provider.sign_schnorr_script_spend(&msg, pubkey, leaf_hash)? {
            Some(sig) => Ok(Some(SchnorrSig { sig, hash_ty })),
            None => Ok(None),
        }
    }
}

impl Input {
    /// Copy this input's signing material into a [`SignatureData`] bundle.
    ///
    /// An input that already carries a final scriptSig or witness yields a
    /// complete bundle and nothing else.
    pub fn fill_signature_data(&self, sigdata: &mut SignatureData) {
        if let Some(ref final_script_sig) = self.final_script_sig {
            sigdata.script_sig = final_script_sig.clone();
            sigdata.complete = true;
        }
        if let Some(ref final_script_witness) = self.final_script_witness {
            sigdata.script_witness = final_script_witness.clone();
            sigdata.complete = true;
        }
        if sigdata.complete {
            return;
        }

        for (pubkey, sig) in &self.partial_sigs {
            sigdata
                .signatures
                .insert(pubkey.pubkey_hash(), (*pubkey, sig.clone()));
        }
        if let Some(ref redeem_script) = self.redeem_script {
            sigdata.redeem_script = Some(redeem_script.clone());
        }
        if let Some(ref witness_script) = self.witness_script {
            sigdata.witness_script = Some(witness_script.clone());
        }
        for (pubkey, origin) in &self.bip32_derivation {
            sigdata
                .misc_pubkeys
                .insert(pubkey.pubkey_hash(), (*pubkey, origin.clone()));
        }
        if let Some(ref tap_key_sig) = self.tap_key_sig {
            sigdata.taproot_key_path_sig = Some(tap_key_sig.clone());
        }
        for (pubkey_leaf, sig) in &self.tap_script_sigs {
            sigdata.taproot_script_sigs.insert(*pubkey_leaf, sig.clone());
        }
        if let Some(tap_internal_key) = self.tap_internal_key {
            sigdata.tr_internal_key = Some(tap_internal_key);
        }
        if let Some(tap_merkle_root) = self.tap_merkle_root {
            sigdata.tr_merkle_root = Some(tap_merkle_root);
        }
        for (leaf, control_blocks) in &self.tap_scripts {
            sigdata
                .tr_scripts
                .entry(leaf.clone())
                .or_default()
                .extend(control_blocks.iter().cloned());
        }
        for (pubkey, leaf_origin) in &self.tap_key_origins {
            sigdata
                .taproot_misc_pubkeys
                .insert(*pubkey, leaf_origin.clone());
        }
    }

    /// Absorb a [`SignatureData`] bundle back into this input.
    ///
    /// A complete bundle clears the partial signing material and stores the
    /// final scripts; an incomplete one is merged in first-writer-wins.
    pub fn from_signature_data(&mut self, sigdata: &SignatureData) {
        if sigdata.complete {
            self.partial_sigs.clear();
            self.bip32_derivation.clear();
            self.redeem_script = None;
            self.witness_script = None;

            if !sigdata.script_sig.is_empty() {
                self.final_script_sig = Some(sigdata.script_sig.clone());
            }
            if !sigdata.script_witness.is_empty() {
                self.final_script_witness = Some(sigdata.script_witness.clone());
            }
            return;
        }

        for (pubkey, sig) in sigdata.signatures.values() {
            self.partial_sigs.insert(*pubkey, sig.clone());
        }
        if self.redeem_script.is_none() {
            if let Some(ref redeem_script) = sigdata.redeem_script {
                self.redeem_script = Some(redeem_script.clone());
            }
        }
        if self.witness_script.is_none() {
            if let Some(ref witness_script) = sigdata.witness_script {
                self.witness_script = Some(witness_script.clone());
            }
        }
        for (pubkey, origin) in sigdata.misc_pubkeys.values() {
            self.bip32_derivation
                .entry(*pubkey)
                .or_insert_with(|| origin.clone());
        }
        if let Some(ref sig) = sigdata.taproot_key_path_sig {
            self.tap_key_sig = Some(sig.clone());
        }
        for (pubkey_leaf, sig) in &sigdata.taproot_script_sigs {
            self.tap_script_sigs
                .entry(*pubkey_leaf)
                .or_insert_with(|| sig.clone());
        }
        if let Some(internal_key) = sigdata.tr_internal_key {
            self.tap_internal_key = Some(internal_key);
        }
        if let Some(merkle_root) = sigdata.tr_merkle_root {
            self.tap_merkle_root = Some(merkle_root);
        }
        for (leaf, control_blocks) in &sigdata.tr_scripts {
            self.tap_scripts
                .entry(leaf.clone())
                .or_default()
                .extend(control_blocks.iter().cloned());
        }
        for (pubkey, leaf_origin) in &sigdata.taproot_misc_pubkeys {
            self.tap_key_origins
                .entry(*pubkey)
                .or_insert_with(|| leaf_origin.clone());
        }
    }
}

impl Output {
    /// Copy this output's script and key metadata into a [`SignatureData`]
    /// bundle.
    pub fn fill_signature_data(&self, sigdata: &mut SignatureData) {
        if let Some(ref redeem_script) = self.redeem_script {
            sigdata.redeem_script = Some(redeem_script.clone());
        }
        if let Some(ref witness_script) = self.witness_script {
            sigdata.witness_script = Some(witness_script.clone());
        }
        for (pubkey, origin) in &self.bip32_derivation {
            sigdata
                .misc_pubkeys
                .insert(pubkey.pubkey_hash(), (*pubkey, origin.clone()));
        }
        if let Some(tap_internal_key) = self.tap_internal_key {
            sigdata.tr_internal_key = Some(tap_internal_key);
        }
        if let Some(ref tap_tree) = self.tap_tree {
            sigdata.tap_tree = Some(tap_tree.clone());
        }
        for (pubkey, leaf_origin) in &self.tap_key_origins {
            sigdata
                .taproot_misc_pubkeys
                .insert(*pubkey, leaf_origin.clone());
        }
    }

    /// Absorb a [`SignatureData`] bundle back into this output,
    /// first-writer-wins.
    pub fn from_signature_data(&mut self, sigdata: &SignatureData) {
        if self.redeem_script.is_none() {
            if let Some(ref redeem_script) = sigdata.redeem_script {
                self.redeem_script = Some(redeem_script.clone());
            }
        }
        if self.witness_script.is_none() {
            if let Some(ref witness_script) = sigdata.witness_script {
                self.witness_script = Some(witness_script.clone());
            }
        }
        for (pubkey, origin) in sigdata.misc_pubkeys.values() {
            self.bip32_derivation
                .entry(*pubkey)
                .or_insert_with(|| origin.clone());
        }
        if let Some(internal_key) = sigdata.tr_internal_key {
            self.tap_internal_key = Some(internal_key);
        }
        if self.tap_tree.is_none() {
            if let Some(ref tap_tree) = sigdata.tap_tree {
                self.tap_tree = Some(tap_tree.clone());
            }
        }
        for (pubkey, leaf_origin) in &sigdata.taproot_misc_pubkeys {
            self.tap_key_origins
                .entry(*pubkey)
                .or_insert_with(|| leaf_origin.clone());
        }
    }
}

fn lookup_pubkey(
    provider: &dyn SigningProvider,
    sigdata: &SignatureData,
    key_id: &PubkeyHash,
) -> Option<PublicKey> {
    if let Some((pubkey, _)) = sigdata.signatures.get(key_id) {
        return Some(*pubkey);
    }
    if let Some((pubkey, _)) = sigdata.misc_pubkeys.get(key_id) {
        return Some(*pubkey);
    }
    provider.get_pubkey(key_id)
}

fn lookup_redeem_script(
    provider: &dyn SigningProvider,
    sigdata: &SignatureData,
    script_id: &ScriptHash,
) -> Option<Script> {
    if let Some(script) = provider.get_script(script_id) {
        return Some(script);
    }
    match sigdata.redeem_script {
        Some(ref script) if script.script_hash() == *script_id => Some(script.clone()),
        _ => None,
    }
}

fn lookup_witness_script(
    provider: &dyn SigningProvider,
    sigdata: &SignatureData,
    script_id: &WScriptHash,
) -> Option<Script> {
    if let Some(script) = provider.get_witness_script(script_id) {
        return Some(script);
    }
    match sigdata.witness_script {
        Some(ref script) if script.wscript_hash() == *script_id => Some(script.clone()),
        _ => None,
    }
}

// Every possible signature is attempted, even past the threshold, so that
// downstream PSKT processing sees the full signature and pubkey picture.
fn create_sig(
    creator: &dyn SignatureCreator,
    sigdata: &mut SignatureData,
    provider: &dyn SigningProvider,
    pubkey: PublicKey,
    script_code: &Script,
    sig_version: SigVersion,
) -> Result<Option<Vec<u8>>, ProviderError> {
    let key_id = pubkey.pubkey_hash();
    if let Some((_, sig)) = sigdata.signatures.get(&key_id) {
        return Ok(Some(sig.clone()));
    }
    if let Some(origin) = provider.get_key_origin(&key_id) {
        sigdata.misc_pubkeys.insert(key_id, (pubkey, origin));
    }
    if let Some(sig) = creator.create_ecdsa_sig(provider, &pubkey, script_code, sig_version)? {
        sigdata.signatures.insert(key_id, (pubkey, sig.clone()));
        return Ok(Some(sig));
    }
    sigdata.missing_sigs.push(key_id);
    Ok(None)
}

fn p2pkh_script_code(pubkey_hash: &PubkeyHash) -> Script {
    Builder::new()
        .push_opcode(opcodes::all::OP_DUP)
        .push_opcode(opcodes::all::OP_HASH160)
        .push_slice(&pubkey_hash[..])
        .push_opcode(opcodes::all::OP_EQUALVERIFY)
        .push_opcode(opcodes::all::OP_CHECKSIG)
        .into_script()
}

fn push_all(values: &[Vec<u8>]) -> Script {
    let mut builder = Builder::new();
    for value in values {
        if value.is_empty() {
            builder = builder.push_opcode(opcodes::all::OP_PUSHBYTES_0);
        } else if value.len() == 1 && value[0] >= 1 && value[0] <= 16 {
            builder = builder.push_opcode(opcodes::All::from(0x50 + value[0]));
        } else if value.len() == 1 && value[0] == 0x81 {
            builder = builder.push_opcode(opcodes::all::OP_PUSHNUM_NEG1);
        } else {
            builder = builder.push_slice(value);
        }
    }
    builder.into_script()
}

fn single_key_tapscript(script: &Script) -> Option<XOnlyPublicKey> {
    let mut instructions = script.instructions();
    let key = match instructions.next() {
        Some(Ok(Instruction::PushBytes(bytes))) if bytes.len() == 32 => {
            XOnlyPublicKey::from_slice(bytes).ok()?
        }
        _ => return None,
    };
    match instructions.next() {
        Some(Ok(Instruction::Op(opcodes::all::OP_CHECKSIG))) => {}
        _ => return None,
    }
    match instructions.next() {
        None => Some(key),
        _ => None,
    }
}

fn sign_taproot(
    provider: &dyn SigningProvider,
    creator: &dyn SignatureCreator,
    sigdata: &mut SignatureData,
) -> Result<(bool, Vec<Vec<u8>>), ProviderError> {
    // Key-path spend first; a signature already present always wins.
    if sigdata.taproot_key_path_sig.is_none() {
        if let Some(internal_key) = sigdata.tr_internal_key {
            if let Some(sig) = creator.create_taproot_key_spend_sig(
                provider,
                &internal_key,
                sigdata.tr_merkle_root,
            )? {
                sigdata.taproot_key_path_sig = Some(sig);
            }
        }
    }
    if let Some(ref sig) = sigdata.taproot_key_path_sig {
        return Ok((true, vec![sig.to_vec()]));
    }

    // Script-path spends of single-key leaves.
    for (leaf, control_blocks) in &sigdata.tr_scripts {
        let (script, leaf_version) = leaf;
        if *leaf_version != TAPROOT_LEAF_TAPSCRIPT {
            continue;
        }
        let pubkey = match single_key_tapscript(script) {
            Some(pubkey) => pubkey,
            None => continue,
        };
        let leaf_hash = TapLeafHash::from_script(script, LeafVersion::TapScript);
        let sig = match sigdata.taproot_script_sigs.get(&(pubkey, leaf_hash)).cloned() {
            Some(sig) => Some(sig),
            None => creator.create_taproot_script_spend_sig(provider, &pubkey, leaf_hash)?,
        };
        if let Some(sig) = sig {
            sigdata
                .taproot_script_sigs
                .insert((pubkey, leaf_hash), sig.clone());
            if let Some(control_block) = control_blocks.iter().next() {
                return Ok((
                    true,
                    vec![sig.to_vec(), script.to_bytes(), control_block.clone()],
                ));
            }
        }
    }

    Ok((false, vec![]))
}

fn sign_step(
    provider: &dyn SigningProvider,
    creator: &dyn SignatureCreator,
    script_pubkey: &Script,
    sigdata: &mut SignatureData,
    sig_version: SigVersion,
) -> Result<(bool, Vec<Vec<u8>>, ScriptType), ProviderError> {
    let which_type = classify_script(script_pubkey);
    let bytes = script_pubkey.as_bytes();

    match which_type {
        ScriptType::NonStandard | ScriptType::NullData | ScriptType::WitnessUnknown => {
            Ok((false, vec![], which_type))
        }
        ScriptType::Pubkey => {
            let pubkey = match script_pubkey.instructions().next() {
                Some(Ok(Instruction::PushBytes(push))) => match PublicKey::from_slice(push) {
                    Ok(pubkey) => pubkey,
                    Err(_) => return Ok((false, vec![], which_type)),
                },
                _ => return Ok((false, vec![], which_type)),
            };
            match create_sig(creator, sigdata, provider, pubkey, script_pubkey, sig_version)? {
                Some(sig) => Ok((true, vec![sig], which_type)),
                None => Ok((false, vec![], which_type)),
            }
        }
        ScriptType::PubkeyHash => {
            let key_id = match PubkeyHash::from_slice(&bytes[3..23]) {
                Ok(key_id) => key_id,
                Err(_) => return Ok((false, vec![], which_type)),
            };
            let pubkey = match lookup_pubkey(provider, sigdata, &key_id) {
                Some(pubkey) => pubkey,
                None => {
                    sigdata.missing_pubkeys.push(key_id);
                    return Ok((false, vec![], which_type));
                }
            };
            match create_sig(creator, sigdata, provider, pubkey, script_pubkey, sig_version)? {
                Some(sig) => Ok((true, vec![sig, pubkey.to_bytes()], which_type)),
                None => Ok((false, vec![], which_type)),
            }
        }
        ScriptType::ScriptHash => {
            let script_id = match ScriptHash::from_slice(&bytes[2..22]) {
                Ok(script_id) => script_id,
                Err(_) => return Ok((false, vec![], which_type)),
            };
            match lookup_redeem_script(provider, sigdata, &script_id) {
                Some(redeem_script) => Ok((true, vec![redeem_script.to_bytes()], which_type)),
                None => {
                    sigdata.missing_redeem_script = Some(script_id);
                    Ok((false, vec![], which_type))
                }
            }
        }
        ScriptType::Multisig => {
            let (required, pubkeys) = match parse_multisig(script_pubkey) {
                Some(parsed) => parsed,
                None => return Ok((false, vec![], which_type)),
            };
            // Workaround for the CHECKMULTISIG consensus bug: an extra
            // empty element on the stack.
            let mut ret = vec![vec![]];
            for pubkey in pubkeys {
                let sig =
                    create_sig(creator, sigdata, provider, pubkey, script_pubkey, sig_version)?;
                if let Some(sig) = sig {
                    if ret.len() < required + 1 {
                        ret.push(sig);
                    }
                }
            }
            let solved = ret.len() == required + 1;
            Ok((solved, ret, which_type))
        }
        ScriptType::WitnessV0KeyHash => Ok((true, vec![bytes[2..22].to_vec()], which_type)),
        ScriptType::WitnessV0ScriptHash => {
            let script_id = match WScriptHash::from_slice(&bytes[2..34]) {
                Ok(script_id) => script_id,
                Err(_) => return Ok((false, vec![], which_type)),
            };
            match lookup_witness_script(provider, sigdata, &script_id) {
                Some(witness_script) => Ok((true, vec![witness_script.to_bytes()], which_type)),
                None => {
                    sigdata.missing_witness_script = Some(script_id);
                    Ok((false, vec![], which_type))
                }
            }
        }
        ScriptType::WitnessV1Taproot => {
            let (solved, ret) = sign_taproot(provider, creator, sigdata)?;
            Ok((solved, ret, which_type))
        }
    }
}

/// Satisfy `script_pubkey` as far as possible from the signing material in
/// `sigdata` plus whatever `provider` can contribute, recursing through
/// P2SH and P2WSH layers.
///
/// Returns whether the script is now fully satisfied; `sigdata` is updated
/// with the (partial or final) scriptSig / witness, any newly created
/// signatures, and reports of everything found missing. A provider that
/// attempts to sign and fails aborts the whole pass with its error.
pub fn produce_signature(
    provider: &dyn SigningProvider,
    creator: &dyn SignatureCreator,
    script_pubkey: &Script,
    sigdata: &mut SignatureData,
) -> Result<bool, ProviderError> {
    if sigdata.complete {
        return Ok(true);
    }

    let (step_solved, step_result, step_type) =
        sign_step(provider, creator, script_pubkey, sigdata, SigVersion::Base)?;
    let mut solved = step_solved;
    let mut result = step_result;
    let mut which_type = step_type;
    let mut p2sh = false;
    let mut subscript = Script::default();

    if solved && which_type == ScriptType::ScriptHash {
        // The subscript must be valid and cannot be a nested P2SH.
        subscript = Script::from(result[0].clone());
        sigdata.redeem_script = Some(subscript.clone());
        let (sub_solved, sub_result, sub_type) =
            sign_step(provider, creator, &subscript, sigdata, SigVersion::Base)?;
        solved = sub_solved && sub_type != ScriptType::ScriptHash;
        result = sub_result;
        which_type = sub_type;
        p2sh = true;
    }

    if solved && which_type == ScriptType::WitnessV0KeyHash {
        let key_id = match PubkeyHash::from_slice(&result[0]) {
            Ok(key_id) => key_id,
            Err(_) => return Ok(false),
        };
        let witness_script = p2pkh_script_code(&key_id);
        let (sub_solved, sub_result, _) = sign_step(
            provider,
            creator,
            &witness_script,
            sigdata,
            SigVersion::WitnessV0,
        )?;
        solved = sub_solved;
        sigdata.script_witness = Witness::from_vec(sub_result);
        sigdata.witness = true;
        result = vec![];
    } else if solved && which_type == ScriptType::WitnessV0ScriptHash {
        let witness_script = Script::from(result[0].clone());
        sigdata.witness_script = Some(witness_script.clone());
        let (sub_solved, mut sub_result, sub_type) = sign_step(
            provider,
            creator,
            &witness_script,
            sigdata,
            SigVersion::WitnessV0,
        )?;
        solved = sub_solved
            && sub_type != ScriptType::ScriptHash
            && sub_type != ScriptType::WitnessV0ScriptHash
            && sub_type != ScriptType::WitnessV0KeyHash;
        sub_result.push(witness_script.to_bytes());
        sigdata.script_witness = Witness::from_vec(sub_result);
        sigdata.witness = true;
        result = vec![];
    } else if which_type == ScriptType::WitnessV1Taproot && !sigdata.witness {
        sigdata.witness = true;
        if solved {
            sigdata.script_witness = Witness::from_vec(result.clone());
        }
        result = vec![];
    } else if solved && which_type == ScriptType::WitnessUnknown {
        sigdata.witness = true;
    }

    if !sigdata.witness {
        sigdata.script_witness = Witness::default();
    }
    if p2sh {
        result.push(subscript.to_bytes());
    }
    sigdata.script_sig = push_all(&result);

    sigdata.complete = solved;
    Ok(solved)
}

/// Sign (or attempt to finalize) input `index` of `pskt`.
///
/// Resolves the spent output, drives [`produce_signature`] with either a
/// real signature creator (when `txdata` is available) or the dummy
/// metadata-only creator, and writes the result back into the input. When a
/// witness signature is produced, the resolved UTXO is stored as the
/// input's `witness_utxo`; any `non_witness_utxo` is left in place, since
/// deciding that the whole transaction is segwit-only requires inspecting
/// every input and is the caller's call.
///
/// With `finalize` false, a complete bundle is demoted to partial form so
/// that the final scripts are not written yet.
///
/// Returns whether the input is fully signed. `out_sigdata`, when provided,
/// receives the reports of missing keys, signatures and scripts.
pub fn sign_pskt_input(
    provider: &dyn SigningProvider,
    pskt: &mut PartiallySignedTransaction,
    index: usize,
    txdata: Option<&PrecomputedTxData>,
    sighash_type: PsktSighashType,
    mut out_sigdata: Option<&mut SignatureData>,
    finalize: bool,
) -> Result<bool, Error> {
    if index >= pskt.inputs.len() {
        return Err(Error::IndexOutOfBounds {
            index,
            length: pskt.inputs.len(),
        });
    }

    if pskt.inputs[index].is_signed() {
        return Ok(true);
    }

    let mut sigdata = SignatureData::default();
    pskt.inputs[index].fill_signature_data(&mut sigdata);

    let prevout = pskt.global.unsigned_tx.input[index].previous_output;
    let mut require_witness_sig = false;
    let utxo = if let Some(ref non_witness_utxo) = pskt.inputs[index].non_witness_utxo {
        // Taking our information from a non-witness UTXO: verify that it
        // actually matches the prevout.
        if prevout.vout as usize >= non_witness_utxo.output.len() {
            return Err(Error::UtxoMismatch(index));
        }
        if non_witness_utxo.txid() != prevout.txid {
            return Err(Error::UtxoMismatch(index));
        }
        non_witness_utxo.output[prevout.vout as usize].clone()
    } else if let Some(ref witness_utxo) = pskt.inputs[index].witness_utxo {
        // A witness UTXO cannot be verified against the prevout. That is
        // safe when a witness signature is produced (the signature hash
        // commits to the output directly) but not otherwise, so remember
        // that we require one.
        require_witness_sig = true;
        witness_utxo.clone()
    } else {
        return Err(Error::UtxoMissing(index));
    };

    sigdata.witness = false;
    let effective_sighash = pskt.inputs[index].sighash_type.unwrap_or(sighash_type);
    let sig_complete = match txdata {
        None => produce_signature(
            provider,
            &DummySignatureCreator,
            &utxo.script_pubkey,
            &mut sigdata,
        )
        .map_err(|_| Error::ProviderFailure(index))?,
        Some(txdata) => {
            let creator = TransactionSignatureCreator::new(
                &pskt.global.unsigned_tx,
                index,
                utxo.value,
                Some(txdata),
                effective_sighash,
            );
            produce_signature(provider, &creator, &utxo.script_pubkey, &mut sigdata)
                .map_err(|_| Error::ProviderFailure(index))?
        }
    };

    if require_witness_sig && !sigdata.witness {
        return Err(Error::WitnessSignatureRequired(index));
    }

    // When not finalizing, demote the bundle so witness and scriptSig stay
    // in partial form.
    if !finalize && sigdata.complete {
        sigdata.complete = false;
    }

    pskt.inputs[index].from_signature_data(&sigdata);

    if sigdata.witness {
        pskt.inputs[index].witness_utxo = Some(utxo);
    }

    if let Some(out) = out_sigdata.as_deref_mut() {
        out.missing_pubkeys = sigdata.missing_pubkeys;
        out.missing_sigs = sigdata.missing_sigs;
        out.missing_redeem_script = sigdata.missing_redeem_script;
        out.missing_witness_script = sigdata.missing_witness_script;
    }

    Ok(sig_complete)
}

/// Fill output `index` of `pskt` with the script and key metadata the
/// provider knows about a would-be spend of that output.
///
/// `produce_signature` runs in metadata-only mode, so the provider never
/// needs to hold private keys.
pub fn update_pskt_output(
    provider: &dyn SigningProvider,
    pskt: &mut PartiallySignedTransaction,
    index: usize,
) -> Result<(), Error> {
    if index >= pskt.outputs.len() {
        return Err(Error::IndexOutOfBounds {
            index,
            length: pskt.outputs.len(),
        });
    }

    let script_pubkey = pskt.global.unsigned_tx.output[index].script_pubkey.clone();

    let mut sigdata = SignatureData::default();
    pskt.outputs[index].fill_signature_data(&mut sigdata);
    produce_signature(provider, &DummySignatureCreator, &script_pubkey, &mut sigdata)
        .map_err(|_| Error::ProviderFailure(index))?;
    pskt.outputs[index].from_signature_data(&sigdata);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::hex::FromHex;

    fn pubkey(hex: &str) -> PublicKey {
        PublicKey::from_slice(&Vec::<u8>::from_hex(hex).unwrap()).unwrap()
    }

    fn multisig_2_of_3() -> (Script, Vec<PublicKey>) {
        let keys = vec![
            pubkey("0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"),
            pubkey("02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5"),
            pubkey("02f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f9"),
        ];
        let mut builder = Builder::new().push_opcode(opcodes::all::OP_PUSHNUM_2);
        for key in &keys {
            builder = builder.push_slice(&key.to_bytes());
        }
        let script = builder
            .push_opcode(opcodes::all::OP_PUSHNUM_3)
            .push_opcode(opcodes::all::OP_CHECKMULTISIG)
            .into_script();
        (script, keys)
    }

    #[test]
    fn classifies_standard_templates() {
        let (multisig, _) = multisig_2_of_3();
        assert_eq!(classify_script(&multisig), ScriptType::Multisig);
        assert_eq!(
            classify_script(&multisig.to_v0_p2wsh()),
            ScriptType::WitnessV0ScriptHash
        );
        assert_eq!(
            classify_script(&multisig.to_p2sh()),
            ScriptType::ScriptHash
        );
        assert_eq!(
            classify_script(&Builder::new().push_opcode(opcodes::all::OP_RETURN).into_script()),
            ScriptType::NullData
        );
    }

    #[test]
    fn parses_multisig() {
        let (script, keys) = multisig_2_of_3();
        let (required, parsed) = parse_multisig(&script).unwrap();
        assert_eq!(required, 2);
        assert_eq!(parsed, keys);
    }

    #[test]
    fn dummy_signature_has_max_size() {
        let (script, keys) = multisig_2_of_3();
        let sig = DummySignatureCreator
            .create_ecdsa_sig(&DummySigningProvider, &keys[0], &script, SigVersion::Base)
            .unwrap()
            .unwrap();
        assert_eq!(sig.len(), 72);
        assert_eq!(sig[0], 0x30);
    }

    #[test]
    fn multisig_missing_sigs_are_reported() {
        let (script, keys) = multisig_2_of_3();
        let mut sigdata = SignatureData::default();
        let solved = produce_signature(
            &DummySigningProvider,
            &TransactionSignatureCreator::new(
                &Transaction {
                    version: 2,
                    lock_time: bitcoin::PackedLockTime::ZERO,
                    input: vec![Default::default()],
                    output: vec![],
                },
                0,
                50_000,
                None,
                PsktSighashType::from(EcdsaSighashType::All),
            ),
            &script,
            &mut sigdata,
        )
        .unwrap();
        assert!(!solved);
        assert_eq!(sigdata.missing_sigs.len(), keys.len());
    }

    #[test]
    fn provider_failure_aborts_the_pass() {
        struct RefusingProvider;

        impl SigningProvider for RefusingProvider {
            fn sign_ecdsa(
                &self,
                _msg: &Message,
                _pubkey: &PublicKey,
            ) -> Result<Option<secp256k1::ecdsa::Signature>, ProviderError> {
                Err(ProviderError("signing device rejected the request".to_string()))
            }
        }

        let (script, _) = multisig_2_of_3();
        let mut sigdata = SignatureData::default();
        let result = produce_signature(
            &RefusingProvider,
            &TransactionSignatureCreator::new(
                &Transaction {
                    version: 2,
                    lock_time: bitcoin::PackedLockTime::ZERO,
                    input: vec![Default::default()],
                    output: vec![],
                },
                0,
                50_000,
                None,
                PsktSighashType::from(EcdsaSighashType::All),
            ),
            &script,
            &mut sigdata,
        );
        assert!(result.is_err());
    }

    #[test]
    fn single_key_tapscript_is_recognized() {
        let key = XOnlyPublicKey::from_slice(
            &Vec::<u8>::from_hex(
                "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
            )
            .unwrap(),
        )
        .unwrap();
        let script = Builder::new()
            .push_slice(&key.serialize())
            .push_opcode(opcodes::all::OP_CHECKSIG)
            .into_script();
        assert_eq!(single_key_tapscript(&script), Some(key));
    }
}
