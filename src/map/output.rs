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

use bitcoin::util::bip32::KeySource;
use bitcoin::util::taproot::TapLeafHash;
use bitcoin::{PublicKey, Script, XOnlyPublicKey};

use crate::encode;
use crate::map::Map;
use crate::raw;
use crate::serialize::TapTree;
use crate::Error;

/// Type: Redeem Script PSKT_OUT_REDEEM_SCRIPT = 0x00
const PSKT_OUT_REDEEM_SCRIPT: u8 = 0x00;
/// Type: Witness Script PSKT_OUT_WITNESS_SCRIPT = 0x01
const PSKT_OUT_WITNESS_SCRIPT: u8 = 0x01;
/// Type: BIP 32 Derivation Path PSKT_OUT_BIP32_DERIVATION = 0x02
const PSKT_OUT_BIP32_DERIVATION: u8 = 0x02;
/// Type: Taproot Internal Key PSKT_OUT_TAP_INTERNAL_KEY = 0x05
const PSKT_OUT_TAP_INTERNAL_KEY: u8 = 0x05;
/// Type: Taproot Tree PSKT_OUT_TAP_TREE = 0x06
const PSKT_OUT_TAP_TREE: u8 = 0x06;
/// Type: Taproot Key BIP 32 Derivation Path PSKT_OUT_TAP_BIP32_DERIVATION = 0x07
const PSKT_OUT_TAP_BIP32_DERIVATION: u8 = 0x07;
/// Type: Proprietary Use Type PSKT_OUT_PROPRIETARY = 0xFC
const PSKT_OUT_PROPRIETARY: u8 = 0xFC;

/// A key-value map for an output of the corresponding index in the unsigned
/// transaction.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct Output {
    /// The redeem script for this output.
    pub redeem_script: Option<Script>,
    /// The witness script for this output.
    pub witness_script: Option<Script>,
    /// A map from public keys needed to spend this output to their
    /// corresponding master key fingerprints and derivation paths.
    pub bip32_derivation: BTreeMap<PublicKey, KeySource>,
    /// The internal pubkey
    pub tap_internal_key: Option<XOnlyPublicKey>,
    /// Taproot output tree, as depth-first ordered
    /// (depth, leaf version, script) tuples
    pub tap_tree: Option<TapTree>,
    /// Map of taproot x-only keys to origin info and leaf hashes contained
    /// in it
    pub tap_key_origins: BTreeMap<XOnlyPublicKey, (Vec<TapLeafHash>, KeySource)>,
    /// Proprietary key-value pairs for this output.
    pub proprietary: BTreeMap<raw::ProprietaryKey, Vec<u8>>,
    /// Unknown key-value pairs for this output.
    pub unknown: BTreeMap<raw::Key, Vec<u8>>,
}

impl Output {
    /// Whether every field of this output is absent or empty.
    pub fn is_null(&self) -> bool {
        self.redeem_script.is_none()
            && self.witness_script.is_none()
            && self.bip32_derivation.is_empty()
            && self.tap_internal_key.is_none()
            && self.tap_tree.is_none()
            && self.tap_key_origins.is_empty()
            && self.proprietary.is_empty()
            && self.unknown.is_empty()
    }
}

impl Map for Output {
    fn insert_pair(&mut self, pair: raw::Pair) -> Result<(), encode::Error> {
        let raw::Pair {
            key: raw_key,
            value: raw_value,
        } = pair;

        match raw_key.type_value {
            PSKT_OUT_REDEEM_SCRIPT => {
                impl_pskt_insert_pair! {
                    self.redeem_script <= <raw_key: _>|<raw_value: Script>
                }
            }
            PSKT_OUT_WITNESS_SCRIPT => {
                impl_pskt_insert_pair! {
                    self.witness_script <= <raw_key: _>|<raw_value: Script>
                }
            }
            PSKT_OUT_BIP32_DERIVATION => {
                impl_pskt_insert_pair! {
                    self.bip32_derivation <= <raw_key: PublicKey>|<raw_value: KeySource>
                }
            }
            PSKT_OUT_TAP_INTERNAL_KEY => {
                impl_pskt_insert_pair! {
                    self.tap_internal_key <= <raw_key: _>|<raw_value: XOnlyPublicKey>
                }
            }
            PSKT_OUT_TAP_TREE => {
                impl_pskt_insert_pair! {
                    self.tap_tree <= <raw_key: _>|<raw_value: TapTree>
                }
            }
            PSKT_OUT_TAP_BIP32_DERIVATION => {
                impl_pskt_insert_pair! {
                    self.tap_key_origins <= <raw_key: XOnlyPublicKey>|<raw_value: (Vec<TapLeafHash>, KeySource)>
                }
            }
            PSKT_OUT_PROPRIETARY => {
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
            rv.push(self.redeem_script as <PSKT_OUT_REDEEM_SCRIPT, _>)
        }

        impl_pskt_get_pair! {
            rv.push(self.witness_script as <PSKT_OUT_WITNESS_SCRIPT, _>)
        }

        impl_pskt_get_pair! {
            rv.push(self.bip32_derivation as <PSKT_OUT_BIP32_DERIVATION, PublicKey>)
        }

        impl_pskt_get_pair! {
            rv.push(self.tap_internal_key as <PSKT_OUT_TAP_INTERNAL_KEY, _>)
        }

        impl_pskt_get_pair! {
            rv.push(self.tap_tree as <PSKT_OUT_TAP_TREE, _>)
        }

        impl_pskt_get_pair! {
            rv.push(self.tap_key_origins as <PSKT_OUT_TAP_BIP32_DERIVATION, XOnlyPublicKey>)
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
        merge_map!(bip32_derivation, self, other);
        merge_map!(tap_key_origins, self, other);
        merge_map!(proprietary, self, other);
        merge_map!(unknown, self, other);

        merge!(redeem_script, self, other);
        merge!(witness_script, self, other);
        merge!(tap_internal_key, self, other);
        merge!(tap_tree, self, other);

        Ok(())
    }
}

impl_psktmap_consensus_enc_dec_oding!(Output);
