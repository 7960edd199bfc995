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

use std::collections::btree_map::{BTreeMap, Entry};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use bitcoin::hashes::{self, hash160, ripemd160, sha256, sha256d};
use bitcoin::util::bip32::KeySource;
use bitcoin::util::taproot::{ControlBlock, TapBranchHash, TapLeafHash};
use bitcoin::{
    EcdsaSighashType, PublicKey, SchnorrSig, SchnorrSighashType, Script, Transaction, TxOut,
    Witness, XOnlyPublicKey,
};

use crate::encode;
use crate::error::{self, Error};
use crate::map::Map;
use crate::raw;
use crate::serialize::{self, Deserialize, Serialize};

/// Type: Non-Witness UTXO PSKT_IN_NON_WITNESS_UTXO = 0x00
const PSKT_IN_NON_WITNESS_UTXO: u8 = 0x00;
/// Type: Witness UTXO PSKT_IN_WITNESS_UTXO = 0x01
const PSKT_IN_WITNESS_UTXO: u8 = 0x01;
/// Type: Partial Signature PSKT_IN_PARTIAL_SIG = 0x02
const PSKT_IN_PARTIAL_SIG: u8 = 0x02;
/// Type: Sighash Type PSKT_IN_SIGHASH_TYPE = 0x03
const PSKT_IN_SIGHASH_TYPE: u8 = 0x03;
/// Type: Redeem Script PSKT_IN_REDEEM_SCRIPT = 0x04
const PSKT_IN_REDEEM_SCRIPT: u8 = 0x04;
/// Type: Witness Script PSKT_IN_WITNESS_SCRIPT = 0x05
const PSKT_IN_WITNESS_SCRIPT: u8 = 0x05;
/// Type: BIP 32 Derivation Path PSKT_IN_BIP32_DERIVATION = 0x06
const PSKT_IN_BIP32_DERIVATION: u8 = 0x06;
/// Type: Finalized scriptSig PSKT_IN_FINAL_SCRIPTSIG = 0x07
const PSKT_IN_FINAL_SCRIPTSIG: u8 = 0x07;
/// Type: Finalized scriptWitness PSKT_IN_FINAL_SCRIPTWITNESS = 0x08
const PSKT_IN_FINAL_SCRIPTWITNESS: u8 = 0x08;
/// Type: RIPEMD160 preimage PSKT_IN_RIPEMD160 = 0x0a
const PSKT_IN_RIPEMD160: u8 = 0x0a;
/// Type: SHA256 preimage PSKT_IN_SHA256 = 0x0b
const PSKT_IN_SHA256: u8 = 0x0b;
/// Type: HASH160 preimage PSKT_IN_HASH160 = 0x0c
const PSKT_IN_HASH160: u8 = 0x0c;
/// Type: HASH256 preimage PSKT_IN_HASH256 = 0x0d
const PSKT_IN_HASH256: u8 = 0x0d;
/// Type: Schnorr Signature in Key Spend PSKT_IN_TAP_KEY_SIG = 0x13
const PSKT_IN_TAP_KEY_SIG: u8 = 0x13;
/// Type: Schnorr Signature in Script Spend PSKT_IN_TAP_SCRIPT_SIG = 0x14
const PSKT_IN_TAP_SCRIPT_SIG: u8 = 0x14;
/// Type: Taproot Leaf Script PSKT_IN_TAP_LEAF_SCRIPT = 0x15
const PSKT_IN_TAP_LEAF_SCRIPT: u8 = 0x15;
/// Type: Taproot Key BIP 32 Derivation Path PSKT_IN_TAP_BIP32_DERIVATION = 0x16
const PSKT_IN_TAP_BIP32_DERIVATION: u8 = 0x16;
/// Type: Taproot Internal Key PSKT_IN_TAP_INTERNAL_KEY = 0x17
const PSKT_IN_TAP_INTERNAL_KEY: u8 = 0x17;
/// Type: Taproot Merkle Root PSKT_IN_TAP_MERKLE_ROOT = 0x18
const PSKT_IN_TAP_MERKLE_ROOT: u8 = 0x18;
/// Type: Proprietary Use Type PSKT_IN_PROPRIETARY = 0xFC
const PSKT_IN_PROPRIETARY: u8 = 0xFC;

/// A key-value map for an input of the corresponding index in the unsigned
/// transaction.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct Input {
    /// The non-witness transaction this input spends from. Should only be
    /// `Some` for inputs which spend non-segwit outputs or if it is unknown
    /// whether an input spends a segwit output.
    pub non_witness_utxo: Option<Transaction>,
    /// The transaction output this input spends from. Should only be `Some`
    /// for inputs which spend segwit outputs, including P2SH embedded ones.
    pub witness_utxo: Option<TxOut>,
    /// A map from public keys to their corresponding signature as would be
    /// pushed to the stack from a scriptSig or witness.
    pub partial_sigs: BTreeMap<PublicKey, Vec<u8>>,
    /// The sighash type to be used for this input. Signatures for this input
    /// must use the sighash type.
    pub sighash_type: Option<PsktSighashType>,
    /// The redeem script for this input.
    pub redeem_script: Option<Script>,
    /// The witness script for this input.
    pub witness_script: Option<Script>,
    /// A map from public keys needed to sign this input to their
    /// corresponding master key fingerprints and derivation paths.
    pub bip32_derivation: BTreeMap<PublicKey, KeySource>,
    /// The finalized, fully-constructed scriptSig with signatures and any
    /// other scripts necessary for this input to pass validation.
    pub final_script_sig: Option<Script>,
    /// The finalized, fully-constructed scriptWitness with signatures and any
    /// other scripts necessary for this input to pass validation.
    pub final_script_witness: Option<Witness>,
    /// RIPEMD160 hash to preimage map
    pub ripemd160_preimages: BTreeMap<ripemd160::Hash, Vec<u8>>,
    /// SHA256 hash to preimage map
    pub sha256_preimages: BTreeMap<sha256::Hash, Vec<u8>>,
    /// HASH160 hash to preimage map
    pub hash160_preimages: BTreeMap<hash160::Hash, Vec<u8>>,
    /// HASH256 hash to preimage map
    pub hash256_preimages: BTreeMap<sha256d::Hash, Vec<u8>>,
    /// Serialized schnorr signature with sighash type for key spend
    pub tap_key_sig: Option<SchnorrSig>,
    /// Map of (x-only pubkey, leaf hash) to signature
    pub tap_script_sigs: BTreeMap<(XOnlyPublicKey, TapLeafHash), SchnorrSig>,
    /// Map of (leaf script, leaf version) to the set of serialized control
    /// blocks that commit to it
    pub tap_scripts: BTreeMap<(Script, u8), BTreeSet<Vec<u8>>>,
    /// Map of taproot x-only keys to origin info and leaf hashes contained in it
    pub tap_key_origins: BTreeMap<XOnlyPublicKey, (Vec<TapLeafHash>, KeySource)>,
    /// Taproot internal key
    pub tap_internal_key: Option<XOnlyPublicKey>,
    /// Taproot merkle root
    pub tap_merkle_root: Option<TapBranchHash>,
    /// Proprietary key-value pairs for this input.
    pub proprietary: BTreeMap<raw::ProprietaryKey, Vec<u8>>,
    /// Unknown key-value pairs for this input.
    pub unknown: BTreeMap<raw::Key, Vec<u8>>,
}

/// A signature hash type for the corresponding input. Since the taproot
/// upgrade the flag can be either an [`EcdsaSighashType`] or a
/// [`SchnorrSighashType`] and it is not possible to know up front which one
/// the user is dealing with, so the conversion is the caller's choice.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PsktSighashType {
    pub(crate) inner: u32,
}

impl fmt::Display for PsktSighashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ecdsa_hash_ty() {
            Some(ty) => fmt::Display::fmt(&ty, f),
            None => write!(f, "{:#x}", self.inner),
        }
    }
}

impl FromStr for PsktSighashType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // We accept strings of the form "SIGHASH_ALL" etc. as well as
        // non-standard hex values.
        if let Ok(ty) = EcdsaSighashType::from_str(s) {
            return Ok(ty.into());
        }

        if let Ok(inner) = u32::from_str_radix(s.trim_start_matches("0x"), 16) {
            return Ok(PsktSighashType { inner });
        }

        Err(Error::NonStandardSighashType(0))
    }
}

impl From<EcdsaSighashType> for PsktSighashType {
    fn from(ecdsa_hash_ty: EcdsaSighashType) -> Self {
        PsktSighashType {
            inner: ecdsa_hash_ty.to_u32(),
        }
    }
}

impl From<SchnorrSighashType> for PsktSighashType {
    fn from(schnorr_hash_ty: SchnorrSighashType) -> Self {
        PsktSighashType {
            inner: schnorr_hash_ty as u32,
        }
    }
}

impl PsktSighashType {
    /// Returns the [`EcdsaSighashType`] if the [`PsktSighashType`] can be
    /// converted to one.
    pub fn ecdsa_hash_ty(self) -> Option<EcdsaSighashType> {
        EcdsaSighashType::from_standard(self.inner).ok()
    }

    /// Returns the [`SchnorrSighashType`] if the [`PsktSighashType`] can be
    /// converted to one.
    pub fn schnorr_hash_ty(self) -> Option<SchnorrSighashType> {
        if self.inner > 0xffu32 {
            None
        } else {
            SchnorrSighashType::from_u8(self.inner as u8).ok()
        }
    }

    /// Creates a [`PsktSighashType`] from a raw `u32`.
    ///
    /// Allows construction of a non-standard or non-valid sighash flag.
    pub fn from_u32(n: u32) -> PsktSighashType {
        PsktSighashType { inner: n }
    }

    /// Converts [`PsktSighashType`] to a raw `u32` sighash flag.
    ///
    /// No guarantees are made as to the standardness or validity of the
    /// returned value.
    pub fn to_u32(self) -> u32 {
        self.inner
    }
}

impl Input {
    /// Obtains the [`EcdsaSighashType`] for this input if one is specified.
    /// If no sighash type is specified, returns [`EcdsaSighashType::All`].
    pub fn ecdsa_hash_ty(&self) -> Option<EcdsaSighashType> {
        self.sighash_type
            .map(|sighash_type| sighash_type.ecdsa_hash_ty())
            .unwrap_or(Some(EcdsaSighashType::All))
    }

    /// Obtains the [`SchnorrSighashType`] for this input if one is specified.
    /// If no sighash type is specified, returns
    /// [`SchnorrSighashType::Default`].
    pub fn schnorr_hash_ty(&self) -> Option<SchnorrSighashType> {
        self.sighash_type
            .map(|sighash_type| sighash_type.schnorr_hash_ty())
            .unwrap_or(Some(SchnorrSighashType::Default))
    }

    /// Whether every field of this input is absent or empty.
    pub fn is_null(&self) -> bool {
        self.non_witness_utxo.is_none()
            && self.witness_utxo.is_none()
            && self.partial_sigs.is_empty()
            && self.sighash_type.is_none()
            && self.redeem_script.is_none()
            && self.witness_script.is_none()
            && self.bip32_derivation.is_empty()
            && self.final_script_sig.is_none()
            && self.final_script_witness.is_none()
            && self.ripemd160_preimages.is_empty()
            && self.sha256_preimages.is_empty()
            && self.hash160_preimages.is_empty()
            && self.hash256_preimages.is_empty()
            && self.tap_key_sig.is_none()
            && self.tap_script_sigs.is_empty()
            && self.tap_scripts.is_empty()
            && self.tap_key_origins.is_empty()
            && self.tap_internal_key.is_none()
            && self.tap_merkle_root.is_none()
            && self.proprietary.is_empty()
            && self.unknown.is_empty()
    }

    /// Whether this input already carries a final scriptSig or witness.
    pub fn is_signed(&self) -> bool {
        self.final_script_sig.is_some() || self.final_script_witness.is_some()
    }
}

impl Map for Input {
    fn insert_pair(&mut self, pair: raw::Pair) -> Result<(), encode::Error> {
        let raw::Pair {
            key: raw_key,
            value: raw_value,
        } = pair;

        match raw_key.type_value {
            PSKT_IN_NON_WITNESS_UTXO => {
                impl_pskt_insert_pair! {
                    self.non_witness_utxo <= <raw_key: _>|<raw_value: Transaction>
                }
            }
            PSKT_IN_WITNESS_UTXO => {
                impl_pskt_insert_pair! {
                    self.witness_utxo <= <raw_key: _>|<raw_value: TxOut>
                }
            }
            PSKT_IN_PARTIAL_SIG => {
                impl_pskt_insert_pair! {
                    self.partial_sigs <= <raw_key: PublicKey>|<raw_value: Vec<u8>>
                }
            }
            PSKT_IN_SIGHASH_TYPE => {
                impl_pskt_insert_pair! {
                    self.sighash_type <= <raw_key: _>|<raw_value: PsktSighashType>
                }
            }
            PSKT_IN_REDEEM_SCRIPT => {
                impl_pskt_insert_pair! {
                    self.redeem_script <= <raw_key: _>|<raw_value: Script>
                }
            }
            PSKT_IN_WITNESS_SCRIPT => {
                impl_pskt_insert_pair! {
                    self.witness_script <= <raw_key: _>|<raw_value: Script>
                }
            }
            PSKT_IN_BIP32_DERIVATION => {
                impl_pskt_insert_pair! {
                    self.bip32_derivation <= <raw_key: PublicKey>|<raw_value: KeySource>
                }
            }
            PSKT_IN_FINAL_SCRIPTSIG => {
                impl_pskt_insert_pair! {
                    self.final_script_sig <= <raw_key: _>|<raw_value: Script>
                }
            }
            PSKT_IN_FINAL_SCRIPTWITNESS => {
                impl_pskt_insert_pair! {
                    self.final_script_witness <= <raw_key: _>|<raw_value: Witness>
                }
            }
            PSKT_IN_RIPEMD160 => {
                pskt_insert_hash_pair(
                    &mut self.ripemd160_preimages,
                    raw_key,
                    raw_value,
                    error::PsktHash::Ripemd160,
                )?;
            }
            PSKT_IN_SHA256 => {
                pskt_insert_hash_pair(
                    &mut self.sha256_preimages,
                    raw_key,
                    raw_value,
                    error::PsktHash::Sha256,
                )?;
            }
            PSKT_IN_HASH160 => {
                pskt_insert_hash_pair(
                    &mut self.hash160_preimages,
                    raw_key,
                    raw_value,
                    error::PsktHash::Hash160,
                )?;
            }
            PSKT_IN_HASH256 => {
                pskt_insert_hash_pair(
                    &mut self.hash256_preimages,
                    raw_key,
                    raw_value,
                    error::PsktHash::Hash256,
                )?;
            }
            PSKT_IN_TAP_KEY_SIG => {
                impl_pskt_insert_pair! {
                    self.tap_key_sig <= <raw_key: _>|<raw_value: SchnorrSig>
                }
            }
            PSKT_IN_TAP_SCRIPT_SIG => {
                impl_pskt_insert_pair! {
                    self.tap_script_sigs <= <raw_key: (XOnlyPublicKey, TapLeafHash)>|<raw_value: SchnorrSig>
                }
            }
            PSKT_IN_TAP_LEAF_SCRIPT => {
                // Key data is a control block; the value carries the leaf
                // script and its version.
                if raw_key.key.is_empty() {
                    return Err(Error::InvalidKey(raw_key).into());
                }
                ControlBlock::from_slice(&raw_key.key)
                    .map_err(|_| encode::Error::ParseFailed("invalid control block"))?;
                let leaf: (Script, u8) = Deserialize::deserialize(&raw_value)?;
                let controls = self.tap_scripts.entry(leaf).or_insert_with(BTreeSet::new);
                if !controls.insert(raw_key.key.clone()) {
                    return Err(Error::DuplicateKey(raw_key).into());
                }
            }
            PSKT_IN_TAP_BIP32_DERIVATION => {
                impl_pskt_insert_pair! {
                    self.tap_key_origins <= <raw_key: XOnlyPublicKey>|<raw_value: (Vec<TapLeafHash>, KeySource)>
                }
            }
            PSKT_IN_TAP_INTERNAL_KEY => {
                impl_pskt_insert_pair! {
                    self.tap_internal_key <= <raw_key: _>|<raw_value: XOnlyPublicKey>
                }
            }
            PSKT_IN_TAP_MERKLE_ROOT => {
                impl_pskt_insert_pair! {
                    self.tap_merkle_root <= <raw_key: _>|<raw_value: TapBranchHash>
                }
            }
            PSKT_IN_PROPRIETARY => {
                let prop_key = raw::ProprietaryKey::from_key(raw_key.clone())?;
                match self.proprietary.entry(prop_key) {
                    Entry::Vacant(empty_key) => {
                        empty_key.insert(raw_value);
                    }
                    Entry::Occupied(_) => return Err(Error::DuplicateKey(raw_key).into()),
                }
            }
            _ => match self.unknown.entry(raw_key) {
                Entry::Vacant(empty_key) => {
                    empty_key.insert(raw_value);
                }
                Entry::Occupied(k) => return Err(Error::DuplicateKey(k.key().clone()).into()),
            },
        }

        Ok(())
    }

    fn get_pairs(&self) -> Result<Vec<raw::Pair>, encode::Error> {
        let mut rv: Vec<raw::Pair> = Default::default();

        impl_pskt_get_pair! {
            rv.push(self.non_witness_utxo as <PSKT_IN_NON_WITNESS_UTXO, _>)
        }

        impl_pskt_get_pair! {
            rv.push(self.witness_utxo as <PSKT_IN_WITNESS_UTXO, _>)
        }

        impl_pskt_get_pair! {
            rv.push(self.partial_sigs as <PSKT_IN_PARTIAL_SIG, PublicKey>)
        }

        impl_pskt_get_pair! {
            rv.push(self.sighash_type as <PSKT_IN_SIGHASH_TYPE, _>)
        }

        impl_pskt_get_pair! {
            rv.push(self.redeem_script as <PSKT_IN_REDEEM_SCRIPT, _>)
        }

        impl_pskt_get_pair! {
            rv.push(self.witness_script as <PSKT_IN_WITNESS_SCRIPT, _>)
        }

        impl_pskt_get_pair! {
            rv.push(self.bip32_derivation as <PSKT_IN_BIP32_DERIVATION, PublicKey>)
        }

        impl_pskt_get_pair! {
            rv.push(self.final_script_sig as <PSKT_IN_FINAL_SCRIPTSIG, _>)
        }

        impl_pskt_get_pair! {
            rv.push(self.final_script_witness as <PSKT_IN_FINAL_SCRIPTWITNESS, _>)
        }

        impl_pskt_get_pair! {
            rv.push(self.ripemd160_preimages as <PSKT_IN_RIPEMD160, ripemd160::Hash>)
        }

        impl_pskt_get_pair! {
            rv.push(self.sha256_preimages as <PSKT_IN_SHA256, sha256::Hash>)
        }

        impl_pskt_get_pair! {
            rv.push(self.hash160_preimages as <PSKT_IN_HASH160, hash160::Hash>)
        }

        impl_pskt_get_pair! {
            rv.push(self.hash256_preimages as <PSKT_IN_HASH256, sha256d::Hash>)
        }

        impl_pskt_get_pair! {
            rv.push(self.tap_key_sig as <PSKT_IN_TAP_KEY_SIG, _>)
        }

        impl_pskt_get_pair! {
            rv.push(self.tap_script_sigs as <PSKT_IN_TAP_SCRIPT_SIG, (XOnlyPublicKey, TapLeafHash)>)
        }

        for (leaf, controls) in &self.tap_scripts {
            for control in controls {
                rv.push(raw::Pair {
                    key: raw::Key {
                        type_value: PSKT_IN_TAP_LEAF_SCRIPT,
                        key: control.clone(),
                    },
                    value: Serialize::serialize(leaf),
                });
            }
        }

        impl_pskt_get_pair! {
            rv.push(self.tap_key_origins as <PSKT_IN_TAP_BIP32_DERIVATION, XOnlyPublicKey>)
        }

        impl_pskt_get_pair! {
            rv.push(self.tap_internal_key as <PSKT_IN_TAP_INTERNAL_KEY, _>)
        }

        impl_pskt_get_pair! {
            rv.push(self.tap_merkle_root as <PSKT_IN_TAP_MERKLE_ROOT, _>)
        }

        for (key, value) in self.proprietary.iter() {
            rv.push(raw::Pair {
                key: key.to_key(),
                value: value.clone(),
            });
        }

        for (key, value) in self.unknown.iter() {
            rv.push(raw::Pair {
                key: key.clone(),
                value: value.clone(),
            });
        }

        Ok(rv)
    }

    fn merge(&mut self, other: Self) -> Result<(), Error> {
        merge!(non_witness_utxo, self, other);

        if let (&None, Some(witness_utxo)) = (&self.witness_utxo, other.witness_utxo) {
            self.witness_utxo = Some(witness_utxo);
        }

        merge_map!(partial_sigs, self, other);
        merge_map!(bip32_derivation, self, other);
        merge_map!(ripemd160_preimages, self, other);
        merge_map!(sha256_preimages, self, other);
        merge_map!(hash160_preimages, self, other);
        merge_map!(hash256_preimages, self, other);
        merge_map!(tap_script_sigs, self, other);
        merge_map!(tap_key_origins, self, other);
        merge_map!(proprietary, self, other);
        merge_map!(unknown, self, other);

        // Control-block sets union per leaf.
        for (leaf, controls) in other.tap_scripts {
            self.tap_scripts
                .entry(leaf)
                .or_insert_with(BTreeSet::new)
                .extend(controls);
        }

        merge!(redeem_script, self, other);
        merge!(witness_script, self, other);
        merge!(final_script_sig, self, other);
        merge!(final_script_witness, self, other);
        merge!(tap_key_sig, self, other);
        merge!(tap_internal_key, self, other);
        merge!(tap_merkle_root, self, other);
        merge!(sighash_type, self, other);

        Ok(())
    }
}

impl_psktmap_consensus_enc_dec_oding!(Input);

fn pskt_insert_hash_pair<H>(
    map: &mut BTreeMap<H, Vec<u8>>,
    raw_key: raw::Key,
    raw_value: Vec<u8>,
    hash_type: error::PsktHash,
) -> Result<(), encode::Error>
where
    H: hashes::Hash + serialize::Deserialize,
{
    if raw_key.key.is_empty() {
        return Err(Error::InvalidKey(raw_key).into());
    }
    let key_val: H = serialize::Deserialize::deserialize(&raw_key.key)?;
    match map.entry(key_val) {
        Entry::Vacant(empty_key) => {
            let val: Vec<u8> = serialize::Deserialize::deserialize(&raw_value)?;
            if <H as hashes::Hash>::hash(&val) != key_val {
                return Err(Error::InvalidPreimageHashPair {
                    preimage: val,
                    hash: Vec::from(key_val.borrow()),
                    hash_type,
                }
                .into());
            }
            empty_key.insert(val);
            Ok(())
        }
        Entry::Occupied(_) => Err(Error::DuplicateKey(raw_key).into()),
    }
}
