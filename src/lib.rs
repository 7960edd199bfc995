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

//! # Rust Koyotecoin PSKT Library
//!
//! Implementation of the Partially Signed Koyotecoin Transaction (PSKT)
//! interchange format, a BIP-174 compatible key-value container that lets
//! multiple parties cooperatively build, augment, sign, combine, finalize
//! and extract a fully signed transaction without a shared signing session.
//!
//! The workflow is driven by five ordered roles: a *Creator* builds the
//! container over an unsigned transaction, *Updaters* attach UTXO, script
//! and key-derivation metadata, *Signers* contribute partial signatures,
//! a *Combiner* fuses independently augmented copies, and a *Finalizer* /
//! *Extractor* promotes the partial signatures into final scripts and
//! assembles the broadcast-ready transaction.

// Coding conventions
#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![deny(missing_docs)]

/// Re-export of the bitcoin crate, which supplies the transaction,
/// script, key, and hash primitives the container is built from
pub extern crate bitcoin;

use std::{fmt, io};

#[macro_use]
mod macros;

pub mod analyzer;
pub mod encode;
mod error;
pub mod finalizer;
mod map;
pub mod raw;
pub mod rpc;
pub mod serialize;
pub mod sign;

use bitcoin::{OutPoint, Transaction, TxIn, TxOut};

use crate::encode::{Decodable, Encodable};
pub use crate::error::{Error, PsktHash};
pub use crate::map::{Global, Input, Output, PsktSighashType};

/// The magic prefix of every serialized PSKT: ASCII "pskt".
pub const PSKT_MAGIC: [u8; 4] = *b"pskt";
/// The byte separating the magic prefix from the global section.
pub const PSKT_SEPARATOR: u8 = 0xff;

// Maximum supported number of inputs or outputs.
const MAX_PSKT_SECTIONS: usize = 10_000;

/// A Partially Signed Koyotecoin Transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct PartiallySignedTransaction {
    /// The key-value pairs for all global data, including the unsigned
    /// transaction.
    pub global: Global,
    /// The corresponding key-value map for each input in the unsigned
    /// transaction.
    pub inputs: Vec<Input>,
    /// The corresponding key-value map for each output in the unsigned
    /// transaction.
    pub outputs: Vec<Output>,
}

/// A role in the cooperative signing workflow. The ordering is meaningful:
/// the "next role" of a whole PSKT is the minimum of the next roles of its
/// inputs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PsktRole {
    /// Builds the container over an unsigned transaction
    Creator,
    /// Attaches UTXO, script and key-derivation metadata
    Updater,
    /// Contributes partial signatures
    Signer,
    /// Promotes complete partial signatures into final scripts
    Finalizer,
    /// Assembles the broadcast-ready network transaction
    Extractor,
}

impl PsktRole {
    /// The lower-case name used in the analyzer's JSON output.
    pub fn name(self) -> &'static str {
        match self {
            PsktRole::Creator => "creator",
            PsktRole::Updater => "updater",
            PsktRole::Signer => "signer",
            PsktRole::Finalizer => "finalizer",
            PsktRole::Extractor => "extractor",
        }
    }
}

impl fmt::Display for PsktRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl PartiallySignedTransaction {
    /// Create a PSKT from an unsigned transaction, allocating one empty
    /// record per input and output.
    ///
    /// # Errors
    ///
    /// If the transaction carries scriptSigs or witnesses.
    pub fn from_unsigned_tx(tx: Transaction) -> Result<Self, Error> {
        let global = Global::from_unsigned_tx(tx)?;
        let inputs = vec![Default::default(); global.unsigned_tx.input.len()];
        let outputs = vec![Default::default(); global.unsigned_tx.output.len()];
        Ok(PartiallySignedTransaction {
            global,
            inputs,
            outputs,
        })
    }

    /// Accessor for the unsigned transaction.
    pub fn unsigned_tx(&self) -> &Transaction {
        &self.global.unsigned_tx
    }

    /// The PSKT format version; 0 when the optional version record is
    /// absent.
    pub fn version(&self) -> u32 {
        self.global.version()
    }

    /// Append an input to the PSKT, keeping the unsigned transaction and
    /// the per-input records paired.
    ///
    /// Any signature data on the incoming record is dropped; signatures made
    /// against the previous transaction shape cannot stay valid. Rejects
    /// outpoints the PSKT already spends.
    pub fn add_input(&mut self, txin: TxIn, mut psktin: Input) -> Result<(), Error> {
        if self
            .global
            .unsigned_tx
            .input
            .iter()
            .any(|old| old.previous_output == txin.previous_output)
        {
            return Err(Error::DuplicateOutpoint(txin.previous_output));
        }
        psktin.partial_sigs.clear();
        psktin.final_script_sig = None;
        psktin.final_script_witness = None;
        self.global.unsigned_tx.input.push(txin);
        self.inputs.push(psktin);
        Ok(())
    }

    /// Append an output to the PSKT, keeping the unsigned transaction and
    /// the per-output records paired.
    pub fn add_output(&mut self, txout: TxOut, psktout: Output) {
        self.global.unsigned_tx.output.push(txout);
        self.outputs.push(psktout);
    }

    /// Return the output being spent by input `index`, if the PSKT carries
    /// enough information to know it.
    ///
    /// A `non_witness_utxo` is preferred and verified against the input's
    /// prevout (hash and index); a bare `witness_utxo` is taken as is.
    /// `Ok(None)` means no UTXO information is present at all.
    pub fn get_input_utxo(&self, index: usize) -> Result<Option<TxOut>, Error> {
        let input = self.inputs.get(index).ok_or(Error::IndexOutOfBounds {
            index,
            length: self.inputs.len(),
        })?;
        let prevout = &self.global.unsigned_tx.input[index].previous_output;

        if let Some(ref non_witness_utxo) = input.non_witness_utxo {
            if prevout.vout as usize >= non_witness_utxo.output.len() {
                return Err(Error::UtxoMismatch(index));
            }
            if non_witness_utxo.txid() != prevout.txid {
                return Err(Error::UtxoMismatch(index));
            }
            Ok(Some(non_witness_utxo.output[prevout.vout as usize].clone()))
        } else if let Some(ref witness_utxo) = input.witness_utxo {
            Ok(Some(witness_utxo.clone()))
        } else {
            Ok(None)
        }
    }

    /// The outpoints spent by this PSKT, in input order.
    pub fn spent_outpoints(&self) -> Vec<OutPoint> {
        self.global
            .unsigned_tx
            .input
            .iter()
            .map(|txin| txin.previous_output)
            .collect()
    }

    /// Count the inputs that do not yet carry a final scriptSig or witness.
    pub fn count_unsigned_inputs(&self) -> usize {
        self.inputs.iter().filter(|input| !input.is_signed()).count()
    }

    /// Drop every `non_witness_utxo` record, but only when all inputs carry
    /// a `witness_utxo` (i.e. the whole transaction is known to spend segwit
    /// outputs). A PSKT with any legacy input keeps the full previous
    /// transactions; non-witness signatures cannot be verified without them.
    pub fn strip_non_witness_utxos(&mut self) {
        if self.inputs.iter().all(|input| input.witness_utxo.is_some()) {
            for input in &mut self.inputs {
                input.non_witness_utxo = None;
            }
        }
    }

    /// Sanity check the pairing between the unsigned transaction and the
    /// per-input / per-output records.
    pub fn sanity_check(&self) -> Result<(), Error> {
        if self.global.unsigned_tx.input.len() != self.inputs.len() {
            Err(Error::InputCountMismatch)
        } else if self.global.unsigned_tx.output.len() != self.outputs.len() {
            Err(Error::OutputCountMismatch)
        } else {
            Ok(())
        }
    }

    /// Attempt to merge with another `PartiallySignedTransaction`.
    ///
    /// Succeeds only when both describe the same unsigned transaction.
    /// Map-valued fields take the first-writer-wins union; optional scalar
    /// fields fill only when currently empty, so the operation is
    /// commutative and idempotent.
    pub fn merge(&mut self, other: Self) -> Result<(), Error> {
        let expected = self.unsigned_tx().txid();
        let actual = other.unsigned_tx().txid();
        if expected != actual {
            return Err(Error::UniqueIdMismatch { expected, actual });
        }

        map::Map::merge(&mut self.global, other.global)?;

        for (self_input, other_input) in self.inputs.iter_mut().zip(other.inputs.into_iter()) {
            map::Map::merge(self_input, other_input)?;
        }

        for (self_output, other_output) in self.outputs.iter_mut().zip(other.outputs.into_iter()) {
            map::Map::merge(self_output, other_output)?;
        }

        Ok(())
    }

    /// Fold a sequence of PSKTs over [`merge`](Self::merge).
    ///
    /// Any pair over different unsigned transactions aborts the whole
    /// combine. At least one PSKT is required.
    pub fn combine(psktxs: Vec<Self>) -> Result<Self, Error> {
        let mut iter = psktxs.into_iter();
        let mut first = iter.next().ok_or(Error::MustHaveUnsignedTx)?;
        for pskt in iter {
            first.merge(pskt)?;
        }
        Ok(first)
    }

}

impl Encodable for PartiallySignedTransaction {
    fn consensus_encode<S: io::Write>(&self, mut s: S) -> Result<usize, encode::Error> {
        let mut len = 0;
        for b in &PSKT_MAGIC {
            len += b.consensus_encode(&mut s)?;
        }
        len += PSKT_SEPARATOR.consensus_encode(&mut s)?;

        len += self.global.consensus_encode(&mut s)?;

        for i in &self.inputs {
            len += i.consensus_encode(&mut s)?;
        }

        for i in &self.outputs {
            len += i.consensus_encode(&mut s)?;
        }

        Ok(len)
    }
}

impl Decodable for PartiallySignedTransaction {
    fn consensus_decode<D: io::BufRead>(mut d: D) -> Result<Self, encode::Error> {
        let mut magic = [0u8; 4];
        for b in &mut magic {
            *b = u8::consensus_decode(&mut d)?;
        }

        if PSKT_MAGIC != magic {
            return Err(Error::InvalidMagic.into());
        }

        if PSKT_SEPARATOR != u8::consensus_decode(&mut d)? {
            return Err(Error::InvalidSeparator.into());
        }

        let global: Global = Decodable::consensus_decode(&mut d)?;

        let inputs: Vec<Input> = {
            let inputs_len = global.unsigned_tx.input.len();

            if inputs_len > MAX_PSKT_SECTIONS {
                return Err(Error::TooLargePskt.into());
            }

            let mut inputs: Vec<Input> = Vec::with_capacity(inputs_len);

            for _ in 0..inputs_len {
                inputs.push(Decodable::consensus_decode(&mut d)?);
            }

            inputs
        };

        let outputs: Vec<Output> = {
            let outputs_len = global.unsigned_tx.output.len();

            if outputs_len > MAX_PSKT_SECTIONS {
                return Err(Error::TooLargePskt.into());
            }

            let mut outputs: Vec<Output> = Vec::with_capacity(outputs_len);

            for _ in 0..outputs_len {
                outputs.push(Decodable::consensus_decode(&mut d)?);
            }

            outputs
        };

        let pskt = PartiallySignedTransaction {
            global,
            inputs,
            outputs,
        };
        pskt.sanity_check()?;
        Ok(pskt)
    }
}

/// Possible errors when parsing a PSKT from its base64 string form
#[derive(Debug)]
pub enum ParseError {
    /// Base64 decoding error
    Base64(base64::DecodeError),
    /// PSKT binary encoding error
    Deserialize(encode::Error),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Base64(e) => write!(f, "base64 error: {}", e),
            ParseError::Deserialize(e) => write!(f, "deserialize error: {}", e),
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParseError::Base64(e) => Some(e),
            ParseError::Deserialize(e) => Some(e),
        }
    }
}

impl std::str::FromStr for PartiallySignedTransaction {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = base64::decode(s).map_err(ParseError::Base64)?;
        encode::deserialize(&bytes).map_err(ParseError::Deserialize)
    }
}

impl fmt::Display for PartiallySignedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = encode::serialize(self);
        write!(f, "{}", base64::encode(bytes))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use bitcoin::hashes::hex::FromHex;

    use super::*;

    fn fixture_tx() -> Transaction {
        // 1-in 1-out signet-style template
        let hex = "0200000001aad73931018bd25f84ae400b68848be09db706eac2ac18298babee71ab656f8b0000000000fdffffff0152f5054a000000001976a9143545e6e33b832c47050f24d3eeb93c9c03948bc788ac00000000";
        encode::deserialize(&Vec::<u8>::from_hex(hex).unwrap()).unwrap()
    }

    #[test]
    fn blank_pskt_round_trip() {
        let pskt = PartiallySignedTransaction::from_unsigned_tx(fixture_tx()).unwrap();
        let ser = encode::serialize(&pskt);
        assert_eq!(&ser[..5], b"pskt\xff");

        let decoded: PartiallySignedTransaction = encode::deserialize(&ser).unwrap();
        assert_eq!(pskt, decoded);
        // canonical encoding
        assert_eq!(encode::serialize(&decoded), ser);
    }

    #[test]
    fn base64_round_trip() {
        let pskt = PartiallySignedTransaction::from_unsigned_tx(fixture_tx()).unwrap();
        let b64 = pskt.to_string();
        let decoded = PartiallySignedTransaction::from_str(&b64).unwrap();
        assert_eq!(pskt, decoded);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let pskt = PartiallySignedTransaction::from_unsigned_tx(fixture_tx()).unwrap();
        let mut ser = encode::serialize(&pskt);
        ser[0] = b'x';
        assert!(encode::deserialize::<PartiallySignedTransaction>(&ser).is_err());
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let pskt = PartiallySignedTransaction::from_unsigned_tx(fixture_tx()).unwrap();
        let mut ser = encode::serialize(&pskt);
        ser.push(0x00);
        assert!(encode::deserialize::<PartiallySignedTransaction>(&ser).is_err());
    }

    #[test]
    fn unknown_records_round_trip() {
        let mut pskt = PartiallySignedTransaction::from_unsigned_tx(fixture_tx()).unwrap();
        pskt.global.unknown.insert(
            raw::Key {
                type_value: 0x0f,
                key: vec![0x01, 0x02],
            },
            vec![0xde, 0xad, 0xbe, 0xef],
        );
        pskt.inputs[0].unknown.insert(
            raw::Key {
                type_value: 0x2f,
                key: vec![],
            },
            vec![0x00],
        );

        let ser = encode::serialize(&pskt);
        let decoded: PartiallySignedTransaction = encode::deserialize(&ser).unwrap();
        assert_eq!(pskt, decoded);
        assert_eq!(encode::serialize(&decoded), ser);
    }

    #[test]
    fn duplicate_unknown_key_is_rejected() {
        let pskt = PartiallySignedTransaction::from_unsigned_tx(fixture_tx()).unwrap();
        let mut ser = encode::serialize(&pskt);

        // splice the same unknown record twice into the global section,
        // right after the unsigned tx record
        let record = [
            0x01, 0x0f, // keylen 1, type 0x0f
            0x01, 0xaa, // vallen 1, value
        ];
        let insert_at = ser.len() - 3; // before global terminator + two empty sections
        for _ in 0..2 {
            for (i, b) in record.iter().enumerate() {
                ser.insert(insert_at + i, *b);
            }
        }
        match encode::deserialize::<PartiallySignedTransaction>(&ser) {
            Err(encode::Error::Pskt(Error::DuplicateKey(_))) => {}
            other => panic!("expected duplicate key error, got {:?}", other),
        }
    }

    #[test]
    fn roles_are_ordered() {
        assert!(PsktRole::Creator < PsktRole::Updater);
        assert!(PsktRole::Updater < PsktRole::Signer);
        assert!(PsktRole::Signer < PsktRole::Finalizer);
        assert!(PsktRole::Finalizer < PsktRole::Extractor);
        assert_eq!(PsktRole::Signer.name(), "signer");
    }

    #[test]
    fn add_input_rejects_duplicate_outpoint() {
        let mut pskt = PartiallySignedTransaction::from_unsigned_tx(fixture_tx()).unwrap();
        let txin = pskt.unsigned_tx().input[0].clone();
        match pskt.add_input(txin, Default::default()) {
            Err(Error::DuplicateOutpoint(_)) => {}
            other => panic!("expected duplicate outpoint error, got {:?}", other),
        }
    }
}
