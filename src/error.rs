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

use std::{error, fmt};

use bitcoin::hashes;
use bitcoin::{OutPoint, Txid};

use crate::raw;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
/// Enum for marking pskt hash error
pub enum PsktHash {
    /// RIPEMD160 preimage record
    Ripemd160,
    /// SHA256 preimage record
    Sha256,
    /// HASH160 preimage record
    Hash160,
    /// HASH256 preimage record
    Hash256,
}

/// Ways that a Partially Signed Transaction might fail.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Error {
    /// Magic bytes for a PSKT must be the ASCII for "pskt" serialized in most
    /// significant byte order.
    InvalidMagic,
    /// The separator for a PSKT must be `0xff`.
    InvalidSeparator,
    /// A known key carries key data it must not have, or is missing key
    /// data it needs.
    InvalidKey(raw::Key),
    /// Non-proprietary key type found when proprietary key was expected
    InvalidProprietaryKey,
    /// Keys within key-value map should never be duplicated.
    DuplicateKey(raw::Key),
    /// The scriptSigs for the unsigned transaction must be empty.
    UnsignedTxHasScriptSigs,
    /// The scriptWitnesses for the unsigned transaction must be empty.
    UnsignedTxHasScriptWitnesses,
    /// A PSKT must have an unsigned transaction.
    MustHaveUnsignedTx,
    /// Signals that there are no more key-value pairs in a key-value map.
    NoMorePairs,
    /// Attempting to merge with a PSKT describing a different unsigned
    /// transaction.
    UniqueIdMismatch {
        /// Expected
        expected: Txid,
        /// Actual
        actual: Txid,
    },
    /// Unable to parse as a standard sighash type.
    NonStandardSighashType(u32),
    /// Parsing errors from bitcoin_hashes
    HashParseError(hashes::Error),
    /// The pre-image must hash to the corresponding pskt hash
    InvalidPreimageHashPair {
        /// Hash-type
        hash_type: PsktHash,
        /// Pre-image
        preimage: Vec<u8>,
        /// Hash value
        hash: Vec<u8>,
    },
    /// Serialization error in consensus-encoded structures
    ConsensusEncoding,
    /// Too large PSKT
    TooLargePskt,
    /// The per-input records do not pair up with the unsigned transaction's
    /// inputs
    InputCountMismatch,
    /// The per-output records do not pair up with the unsigned transaction's
    /// outputs
    OutputCountMismatch,
    /// PSKT version numbers beyond 0 are not supported
    UnsupportedVersion(u32),
    /// An input being added spends an outpoint the PSKT already spends
    DuplicateOutpoint(OutPoint),
    /// The referenced input index does not exist in the PSKT
    IndexOutOfBounds {
        /// Requested index
        index: usize,
        /// Number of inputs available
        length: usize,
    },
    /// No UTXO information is available for an input
    UtxoMissing(usize),
    /// The non-witness UTXO does not match the input's prevout
    UtxoMismatch(usize),
    /// A witness signature was required but the provider produced a
    /// non-witness one
    WitnessSignatureRequired(usize),
    /// The signing provider failed to produce a usable signature
    ProviderFailure(usize),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::InvalidMagic => f.write_str("invalid magic"),
            Error::InvalidSeparator => f.write_str("invalid separator"),
            Error::InvalidKey(ref rkey) => write!(f, "invalid key: {}", rkey),
            Error::InvalidProprietaryKey => write!(
                f,
                "non-proprietary key type found when proprietary key was expected"
            ),
            Error::DuplicateKey(ref rkey) => write!(f, "duplicate key: {}", rkey),
            Error::UnsignedTxHasScriptSigs => {
                f.write_str("the unsigned transaction has script sigs")
            }
            Error::UnsignedTxHasScriptWitnesses => {
                f.write_str("the unsigned transaction has script witnesses")
            }
            Error::MustHaveUnsignedTx => {
                f.write_str("partially signed transactions must have an unsigned transaction")
            }
            Error::NoMorePairs => f.write_str("no more key-value pairs for this pskt map"),
            Error::UniqueIdMismatch {
                expected: ref e,
                actual: ref a,
            } => write!(f, "different unsigned transaction: expected {}, actual {}", e, a),
            Error::NonStandardSighashType(ref sht) => {
                write!(f, "non-standard sighash type: {}", sht)
            }
            Error::HashParseError(ref e) => write!(f, "hash parse error: {}", e),
            Error::InvalidPreimageHashPair {
                ref preimage,
                ref hash,
                ref hash_type,
            } => {
                write!(
                    f,
                    "preimage {:?} does not match {:?} hash {:?}",
                    preimage, hash_type, hash
                )
            }
            Error::ConsensusEncoding => f.write_str("consensus encoding error"),
            Error::TooLargePskt => {
                write!(f, "PSKTs with 10_000 or more inputs/outputs unsupported")
            }
            Error::InputCountMismatch => f.write_str(
                "PSKT per-input records must match the number of transaction inputs",
            ),
            Error::OutputCountMismatch => f.write_str(
                "PSKT per-output records must match the number of transaction outputs",
            ),
            Error::UnsupportedVersion(v) => write!(f, "unsupported PSKT version number: {}", v),
            Error::DuplicateOutpoint(ref out) => {
                write!(f, "input {} exists in the PSKT already", out)
            }
            Error::IndexOutOfBounds { index, length } => {
                write!(f, "input index {} out of bounds (PSKT has {} inputs)", index, length)
            }
            Error::UtxoMissing(i) => write!(f, "input {} has no UTXO information", i),
            Error::UtxoMismatch(i) => {
                write!(f, "input {} non-witness UTXO does not match prevout", i)
            }
            Error::WitnessSignatureRequired(i) => write!(
                f,
                "input {} spends a witness UTXO but no witness signature was produced",
                i
            ),
            Error::ProviderFailure(i) => {
                write!(f, "signing provider failed on input {}", i)
            }
        }
    }
}

impl error::Error for Error {}

#[doc(hidden)]
impl From<hashes::Error> for Error {
    fn from(e: hashes::Error) -> Error {
        Error::HashParseError(e)
    }
}

impl From<crate::encode::Error> for Error {
    fn from(err: crate::encode::Error) -> Self {
        match err {
            crate::encode::Error::Pskt(err) => err,
            _ => Error::ConsensusEncoding,
        }
    }
}
