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
use std::io;

use bitcoin::util::bip32::{ExtendedPubKey, KeySource};
use bitcoin::Transaction;

use crate::encode::{self, Decodable};
use crate::map::Map;
use crate::raw;
use crate::serialize::{Deserialize, Serialize};
use crate::Error;

/// Type: Unsigned Transaction PSKT_GLOBAL_UNSIGNED_TX = 0x00
const PSKT_GLOBAL_UNSIGNED_TX: u8 = 0x00;
/// Type: Extended Public Key PSKT_GLOBAL_XPUB = 0x01
const PSKT_GLOBAL_XPUB: u8 = 0x01;
/// Type: Version Number PSKT_GLOBAL_VERSION = 0xFB
const PSKT_GLOBAL_VERSION: u8 = 0xFB;
/// Type: Proprietary Use Type PSKT_GLOBAL_PROPRIETARY = 0xFC
const PSKT_GLOBAL_PROPRIETARY: u8 = 0xFC;

/// A key-value map for global data.
#[derive(Clone, Debug, PartialEq)]
pub struct Global {
    /// The unsigned transaction, scriptSigs and witnesses for each input
    /// must be empty.
    pub unsigned_tx: Transaction,
    /// The version number of this PSKT. If omitted, the version number is 0.
    pub version: Option<u32>,
    /// A global map from key-origin information (master fingerprint and
    /// derivation path) to the set of extended public keys declared for it.
    pub xpubs: BTreeMap<KeySource, Vec<ExtendedPubKey>>,
    /// Global proprietary key-value pairs.
    pub proprietary: BTreeMap<raw::ProprietaryKey, Vec<u8>>,
    /// Unknown global key-value pairs.
    pub unknown: BTreeMap<raw::Key, Vec<u8>>,
}

impl Global {
    /// Create a global map carrying `tx` and no other records.
    ///
    /// The transaction must not carry any signature data of its own; final
    /// signatures live in the per-input records.
    pub fn from_unsigned_tx(tx: Transaction) -> Result<Self, Error> {
        for txin in &tx.input {
            if !txin.script_sig.is_empty() {
                return Err(Error::UnsignedTxHasScriptSigs);
            }
            if !txin.witness.is_empty() {
                return Err(Error::UnsignedTxHasScriptWitnesses);
            }
        }
        Ok(Global {
            unsigned_tx: tx,
            version: None,
            xpubs: BTreeMap::new(),
            proprietary: BTreeMap::new(),
            unknown: BTreeMap::new(),
        })
    }

    /// The PSKT format version; 0 when the optional version record is absent.
    pub fn version(&self) -> u32 {
        self.version.unwrap_or(0)
    }
}

impl Map for Global {
    fn insert_pair(&mut self, pair: raw::Pair) -> Result<(), encode::Error> {
        let raw::Pair {
            key: raw_key,
            value: raw_value,
        } = pair;

        match raw_key.type_value {
            // The unsigned transaction is mandatory and consumed by the
            // section decoder before pairs are inserted.
            PSKT_GLOBAL_UNSIGNED_TX => return Err(Error::DuplicateKey(raw_key).into()),
            PSKT_GLOBAL_XPUB => {
                if raw_key.key.is_empty() {
                    return Err(Error::InvalidKey(raw_key).into());
                }
                let xpub: ExtendedPubKey = Deserialize::deserialize(&raw_key.key)?;
                let key_source: KeySource = Deserialize::deserialize(&raw_value)?;
                if self.xpubs.values().any(|xpubs| xpubs.contains(&xpub)) {
                    return Err(Error::DuplicateKey(raw_key).into());
                }
                self.xpubs.entry(key_source).or_insert_with(Vec::new).push(xpub);
            }
            PSKT_GLOBAL_VERSION => {
                if !raw_key.key.is_empty() {
                    return Err(Error::InvalidKey(raw_key).into());
                }
                if self.version.is_some() {
                    return Err(Error::DuplicateKey(raw_key).into());
                }
                let version: u32 = Deserialize::deserialize(&raw_value)?;
                if version > 0 {
                    return Err(Error::UnsupportedVersion(version).into());
                }
                self.version = Some(version);
            }
            PSKT_GLOBAL_PROPRIETARY => {
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

        rv.push(raw::Pair {
            key: raw::Key {
                type_value: PSKT_GLOBAL_UNSIGNED_TX,
                key: vec![],
            },
            value: Serialize::serialize(&self.unsigned_tx),
        });

        for (key_source, xpubs) in &self.xpubs {
            for xpub in xpubs {
                rv.push(raw::Pair {
                    key: raw::Key {
                        type_value: PSKT_GLOBAL_XPUB,
                        key: Serialize::serialize(xpub),
                    },
                    value: Serialize::serialize(key_source),
                });
            }
        }

        impl_pskt_get_pair! {
            rv.push(self.version as <PSKT_GLOBAL_VERSION, _>)
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

    // According to BIP 174 the combiner must be commutative: merging A into B
    // and B into A must produce the same map.
    fn merge(&mut self, other: Self) -> Result<(), Error> {
        for (key_source, xpubs) in other.xpubs {
            let known = self.xpubs.entry(key_source).or_insert_with(Vec::new);
            for xpub in xpubs {
                if !known.contains(&xpub) {
                    known.push(xpub);
                }
            }
        }

        merge!(version, self, other);
        merge_map!(proprietary, self, other);
        merge_map!(unknown, self, other);
        Ok(())
    }
}

impl_psktmap_consensus_encoding!(Global);

impl Decodable for Global {
    fn consensus_decode<D: io::BufRead>(mut d: D) -> Result<Self, encode::Error> {
        let mut tx: Option<Transaction> = None;
        let mut pairs: Vec<raw::Pair> = vec![];

        loop {
            match raw::Pair::consensus_decode(&mut d) {
                Ok(pair) => {
                    if pair.key.type_value == PSKT_GLOBAL_UNSIGNED_TX {
                        if !pair.key.key.is_empty() {
                            return Err(Error::InvalidKey(pair.key).into());
                        }
                        if tx.is_some() {
                            return Err(Error::DuplicateKey(pair.key).into());
                        }
                        tx = Some(Deserialize::deserialize(&pair.value)?);
                    } else {
                        pairs.push(pair);
                    }
                }
                Err(encode::Error::Pskt(Error::NoMorePairs)) => break,
                Err(e) => return Err(e),
            }
        }

        let tx = tx.ok_or(Error::MustHaveUnsignedTx)?;
        let mut global = Global::from_unsigned_tx(tx)?;
        for pair in pairs {
            global.insert_pair(pair)?;
        }
        Ok(global)
    }
}
