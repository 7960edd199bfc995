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

//! # PSKT serialization
//!
//! Traits used for (de)serializing PSKT values into/from the raw bytes of
//! PSKT key-value pairs, together with the impls for every payload type the
//! type schedule uses. Payloads are *not* length-prefixed; the record
//! grammar already carries the value length.

use std::io::Cursor;

use bitcoin::consensus::encode::VarInt;
use bitcoin::hashes::{hash160, ripemd160, sha256, sha256d, Hash};
use bitcoin::util::bip32::{ChildNumber, ExtendedPubKey, Fingerprint, KeySource};
use bitcoin::util::taproot::{LeafVersion, TapBranchHash, TapLeafHash};
use bitcoin::{PublicKey, Script, Transaction, TxOut, Witness, XOnlyPublicKey};

use crate::encode::{self, deserialize_partial, Decodable};
use crate::map::PsktSighashType;

/// A trait for serializing a value as raw data for insertion into PSKT
/// key-value pairs.
pub trait Serialize {
    /// Serialize a value as raw data.
    fn serialize(&self) -> Vec<u8>;
}

/// A trait for deserializing a value from raw data in PSKT key-value pairs.
pub trait Deserialize: Sized {
    /// Deserialize a value from raw data.
    fn deserialize(bytes: &[u8]) -> Result<Self, encode::Error>;
}

impl_pskt_de_serialize!(Transaction);
impl_pskt_de_serialize!(TxOut);
impl_pskt_de_serialize!(Witness);
impl_pskt_de_serialize!(u32);

impl_pskt_hash_de_serialize!(ripemd160::Hash);
impl_pskt_hash_de_serialize!(sha256::Hash);
impl_pskt_hash_de_serialize!(hash160::Hash);
impl_pskt_hash_de_serialize!(sha256d::Hash);
impl_pskt_hash_de_serialize!(TapLeafHash);
impl_pskt_hash_de_serialize!(TapBranchHash);

impl Serialize for Script {
    fn serialize(&self) -> Vec<u8> {
        self.to_bytes()
    }
}

impl Deserialize for Script {
    fn deserialize(bytes: &[u8]) -> Result<Self, encode::Error> {
        Ok(Script::from(bytes.to_vec()))
    }
}

impl Serialize for Vec<u8> {
    fn serialize(&self) -> Vec<u8> {
        self.clone()
    }
}

impl Deserialize for Vec<u8> {
    fn deserialize(bytes: &[u8]) -> Result<Self, encode::Error> {
        Ok(bytes.to_vec())
    }
}

impl Serialize for PublicKey {
    fn serialize(&self) -> Vec<u8> {
        self.to_bytes()
    }
}

impl Deserialize for PublicKey {
    fn deserialize(bytes: &[u8]) -> Result<Self, encode::Error> {
        PublicKey::from_slice(bytes)
            .map_err(|_| encode::Error::ParseFailed("invalid public key"))
    }
}

impl Serialize for XOnlyPublicKey {
    fn serialize(&self) -> Vec<u8> {
        XOnlyPublicKey::serialize(self).to_vec()
    }
}

impl Deserialize for XOnlyPublicKey {
    fn deserialize(bytes: &[u8]) -> Result<Self, encode::Error> {
        XOnlyPublicKey::from_slice(bytes)
            .map_err(|_| encode::Error::ParseFailed("invalid xonly public key"))
    }
}

impl Serialize for PsktSighashType {
    fn serialize(&self) -> Vec<u8> {
        encode::serialize(&self.to_u32())
    }
}

impl Deserialize for PsktSighashType {
    fn deserialize(bytes: &[u8]) -> Result<Self, encode::Error> {
        let raw: u32 = encode::deserialize(bytes)?;
        Ok(PsktSighashType::from_u32(raw))
    }
}

impl Serialize for KeySource {
    fn serialize(&self) -> Vec<u8> {
        let mut rv: Vec<u8> = Vec::with_capacity(4 + 4 * self.1.len());

        rv.extend(self.0.as_bytes());

        for cnum in self.1.into_iter() {
            rv.extend(&encode::serialize(&u32::from(*cnum)));
        }

        rv
    }
}

impl Deserialize for KeySource {
    fn deserialize(bytes: &[u8]) -> Result<Self, encode::Error> {
        if bytes.len() < 4 || bytes.len() % 4 != 0 {
            return Err(encode::Error::ParseFailed("invalid key source length"));
        }

        let fprint: Fingerprint = Fingerprint::from(&bytes[0..4]);
        let mut dpath: Vec<ChildNumber> = Default::default();

        let mut d = Cursor::new(&bytes[4..]);
        while let Ok(index) = u32::consensus_decode(&mut d) {
            dpath.push(index.into());
        }

        Ok((fprint, dpath.into()))
    }
}

impl Serialize for ExtendedPubKey {
    fn serialize(&self) -> Vec<u8> {
        self.encode().to_vec()
    }
}

impl Deserialize for ExtendedPubKey {
    fn deserialize(bytes: &[u8]) -> Result<Self, encode::Error> {
        ExtendedPubKey::decode(bytes)
            .map_err(|_| encode::Error::ParseFailed("invalid extended public key"))
    }
}

impl Serialize for bitcoin::SchnorrSig {
    fn serialize(&self) -> Vec<u8> {
        self.to_vec()
    }
}

impl Deserialize for bitcoin::SchnorrSig {
    fn deserialize(bytes: &[u8]) -> Result<Self, encode::Error> {
        bitcoin::SchnorrSig::from_slice(bytes)
            .map_err(|_| encode::Error::ParseFailed("invalid schnorr signature"))
    }
}

impl Serialize for (XOnlyPublicKey, TapLeafHash) {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.extend(&self.0.serialize());
        buf.extend(self.1.into_inner().iter());
        buf
    }
}

impl Deserialize for (XOnlyPublicKey, TapLeafHash) {
    fn deserialize(bytes: &[u8]) -> Result<Self, encode::Error> {
        if bytes.len() != 64 {
            return Err(encode::Error::ParseFailed(
                "invalid xonly public key and leaf hash pair",
            ));
        }
        let a: XOnlyPublicKey = Deserialize::deserialize(&bytes[..32])?;
        let b: TapLeafHash = Deserialize::deserialize(&bytes[32..])?;
        Ok((a, b))
    }
}

// leaf script as contained in a tap leaf script record: script bytes with
// the single leaf version byte appended
impl Serialize for (Script, u8) {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.0.len() + 1);
        buf.extend(self.0.as_bytes());
        buf.push(self.1);
        buf
    }
}

impl Deserialize for (Script, u8) {
    fn deserialize(bytes: &[u8]) -> Result<Self, encode::Error> {
        if bytes.is_empty() {
            return Err(encode::Error::ParseFailed("empty leaf script record"));
        }
        let (script, leaf_version) = bytes.split_at(bytes.len() - 1);
        LeafVersion::from_consensus(leaf_version[0])
            .map_err(|_| encode::Error::ParseFailed("invalid leaf version"))?;
        Ok((Script::from(script.to_vec()), leaf_version[0]))
    }
}

impl Serialize for (Vec<TapLeafHash>, KeySource) {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend(encode::serialize(&VarInt(self.0.len() as u64)));
        for hash in &self.0 {
            buf.extend(hash.into_inner().iter());
        }
        buf.extend(Serialize::serialize(&self.1));
        buf
    }
}

impl Deserialize for (Vec<TapLeafHash>, KeySource) {
    fn deserialize(bytes: &[u8]) -> Result<Self, encode::Error> {
        let (VarInt(count), mut consumed) = deserialize_partial::<VarInt>(bytes)?;
        let mut hashes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            if bytes.len() < consumed + 32 {
                return Err(encode::Error::ParseFailed("short taproot bip32 record"));
            }
            hashes.push(TapLeafHash::deserialize(&bytes[consumed..consumed + 32])?);
            consumed += 32;
        }
        let key_source = KeySource::deserialize(&bytes[consumed..])?;
        Ok((hashes, key_source))
    }
}

/// The taproot script tree of an output: depth-first ordered
/// (depth, leaf version, script) tuples.
pub type TapTree = Vec<(u8, u8, Script)>;

impl Serialize for TapTree {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for (depth, leaf_version, script) in self {
            buf.push(*depth);
            buf.push(*leaf_version);
            buf.extend(encode::serialize(&VarInt(script.len() as u64)));
            buf.extend(script.as_bytes());
        }
        buf
    }
}

impl Deserialize for TapTree {
    fn deserialize(bytes: &[u8]) -> Result<Self, encode::Error> {
        let mut tree = Vec::new();
        let mut consumed = 0;
        while consumed < bytes.len() {
            if bytes.len() < consumed + 2 {
                return Err(encode::Error::ParseFailed("short taproot tree record"));
            }
            let depth = bytes[consumed];
            let leaf_version = bytes[consumed + 1];
            LeafVersion::from_consensus(leaf_version)
                .map_err(|_| encode::Error::ParseFailed("invalid leaf version"))?;
            consumed += 2;
            let (VarInt(script_len), len_size) = deserialize_partial::<VarInt>(&bytes[consumed..])?;
            consumed += len_size;
            let script_len = script_len as usize;
            if bytes.len() < consumed + script_len {
                return Err(encode::Error::ParseFailed("short taproot tree record"));
            }
            let script = Script::from(bytes[consumed..consumed + script_len].to_vec());
            consumed += script_len;
            tree.push((depth, leaf_version, script));
        }
        Ok(tree)
    }
}
