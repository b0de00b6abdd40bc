//! The three object kinds held in the pool, and their wire encoding.
//!
//! Blobs are raw bytes. Trees and Backups are MessagePack, with a fixed
//! canonical form so that two trees with identical logical contents always
//! serialize to the same bytes (and therefore hash to the same [`Ref`]).

use std::collections::BTreeMap;
use std::fmt;
use std::io::prelude::*;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow, bail, ensure};
use data_encoding::HEXLOWER;
use jiff::Timestamp;
use serde::de::{self, Visitor};
use serde_bytes::ByteBuf;
use sha1::{Digest, Sha1};

/// A 40-hex-character SHA-1 digest identifying an object in the pool.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Ref([u8; 20]);

impl Ref {
    /// Hash `bytes` and return the resulting ref.
    pub fn hash(bytes: &[u8]) -> Self {
        let digest = Sha1::digest(bytes);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest);
        Ref(out)
    }

    /// Build a ref from a raw 20-byte digest (e.g. from an incremental
    /// hasher that already has the finalized bytes).
    pub fn from_hex_bytes(raw: [u8; 20]) -> Self {
        Ref(raw)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// The ref as it appears on disk: 40 lowercase hex characters.
    pub fn to_hex(self) -> String {
        HEXLOWER.encode(&self.0)
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Ref {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        ensure!(s.len() == 40, "{s} isn't a 40-character hex ref");
        let bytes = HEXLOWER
            .decode(s.as_bytes())
            .with_context(|| format!("{s} isn't valid hex"))?;
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(Ref(out))
    }
}

impl serde::Serialize for Ref {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for Ref {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct RefVisitor;

        impl Visitor<'_> for RefVisitor {
            type Value = Ref;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a 40-character hex string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Ref, E> {
                v.parse().map_err(de::Error::custom)
            }
        }

        d.deserialize_str(RefVisitor)
    }
}

/// A raw byte sequence. Its on-disk encoding is the identity.
pub struct Blob;

/// A scalar attribute value attached to a [`TreeItem`].
///
/// Limited to what the codec round-trips losslessly: the value types the
/// on-disk format actually needs (§3's attribute table), plus an extension
/// slot for remote-defined pass-through keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    String(String),
    Bytes(Vec<u8>),
    Timestamp(Timestamp),
}

impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Integer(i) => s.serialize_i64(*i),
            Value::String(v) => s.serialize_str(v),
            Value::Bytes(v) => s.serialize_bytes(v),
            Value::Timestamp(t) => {
                // Extension type code 1: ISO-8601 string payload.
                let iso = t.to_string();
                let payload = (1i8, serde_bytes::Bytes::new(iso.as_bytes()));
                s.serialize_newtype_struct(TIMESTAMP_EXT_MARKER, &payload)
            }
        }
    }
}

/// Internal marker type name rmp-serde recognizes for ext-type round-trips.
const TIMESTAMP_EXT_MARKER: &str = "_ExtStruct";

impl<'de> serde::Deserialize<'de> for Value {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = Value;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "an integer, string, byte string, or timestamp extension")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
                Ok(Value::Integer(v))
            }
            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
                Ok(Value::Integer(v as i64))
            }
            fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
                Ok(Value::String(v.to_owned()))
            }
            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Value, E> {
                Ok(Value::Bytes(v.to_vec()))
            }
            fn visit_newtype_struct<D2>(self, d: D2) -> Result<Value, D2::Error>
            where
                D2: serde::Deserializer<'de>,
            {
                let payload: (i8, ByteBuf) = serde::Deserialize::deserialize(d)?;
                let (code, bytes) = payload;
                if code != 1 {
                    return Err(de::Error::custom(format!("unknown ext type {code}")));
                }
                let s = std::str::from_utf8(&bytes).map_err(de::Error::custom)?;
                let ts = parse_timestamp(s).map_err(de::Error::custom)?;
                Ok(Value::Timestamp(ts))
            }
        }

        d.deserialize_any(ValueVisitor)
    }
}

/// Accepts both RFC3339 and the legacy `YYYYMMDDT%H:%M:%S.%f` form (§4.1).
pub fn parse_timestamp(s: &str) -> Result<Timestamp> {
    if let Ok(t) = s.parse::<Timestamp>() {
        return Ok(t);
    }
    // Legacy form: 20230102T03:04:05.678900
    let re = regex::Regex::new(
        r"^(\d{4})(\d{2})(\d{2})T(\d{2}):(\d{2}):(\d{2})\.(\d+)$",
    )
    .unwrap();
    let caps = re
        .captures(s)
        .ok_or_else(|| anyhow!("{s} isn't a recognized timestamp"))?;
    let iso = format!(
        "{}-{}-{}T{}:{}:{}.{}Z",
        &caps[1], &caps[2], &caps[3], &caps[4], &caps[5], &caps[6], &caps[7]
    );
    iso.parse::<Timestamp>()
        .with_context(|| format!("{s} isn't a recognized timestamp"))
}

/// A single item within a [`Tree`]: the open attribute mapping described in §3.
pub type TreeItem = BTreeMap<String, Value>;

/// `item["type"]` as a string, if present and well-formed.
pub fn item_type(item: &TreeItem) -> Option<&str> {
    match item.get("type") {
        Some(Value::String(s)) => Some(s.as_str()),
        _ => None,
    }
}

/// `item["ref"]` decoded as a [`Ref`], if present and well-formed.
pub fn item_ref(item: &TreeItem) -> Option<Ref> {
    match item.get("ref") {
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

/// An ordered mapping from entry name to attributes; the unit of directory
/// representation.
///
/// `BTreeMap` gives us sorted-by-name iteration for free, which is exactly
/// the canonical ordering the wire format requires (§3, §4.1): two trees
/// with the same logical items always serialize identically.
pub type Tree = BTreeMap<String, TreeItem>;

/// Canonical on-the-wire form of a [`Tree`]: `[[name, [[key, value]...]]...]`,
/// names sorted ascending, attribute keys sorted ascending within each item.
fn to_wire(tree: &Tree) -> Vec<(String, Vec<(String, Value)>)> {
    tree.iter()
        .map(|(name, attrs)| {
            let pairs = attrs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            (name.clone(), pairs)
        })
        .collect()
}

fn from_wire(wire: Vec<(String, Vec<(String, Value)>)>) -> Tree {
    wire.into_iter()
        .map(|(name, pairs)| (name, pairs.into_iter().collect::<TreeItem>()))
        .collect()
}

/// Serialize a tree to its canonical MessagePack bytes and return the
/// resulting ref.
pub fn encode_tree(tree: &Tree) -> Result<(Vec<u8>, Ref)> {
    let wire = to_wire(tree);
    let mut buf = Vec::new();
    rmp_serde::encode::write(&mut buf, &wire).context("encoding tree")?;
    let r = Ref::hash(&buf);
    Ok((buf, r))
}

pub fn decode_tree(bytes: &[u8]) -> Result<Tree> {
    let wire: Vec<(String, Vec<(String, Value)>)> =
        rmp_serde::decode::from_slice(bytes).context("decoding tree")?;
    Ok(from_wire(wire))
}

/// A completed backup: the root tree, optional parent, stats and error log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    pub root: Ref,
    pub parent: Option<Ref>,
    pub stats: BTreeMap<String, u64>,
    pub errors: BTreeMap<String, String>,
    pub start_date: Timestamp,
    pub end_date: Timestamp,
}

#[derive(serde_derive::Serialize, serde_derive::Deserialize)]
struct BackupWire {
    root: Ref,
    parent: Option<Ref>,
    stats: BTreeMap<String, u64>,
    errors: BTreeMap<String, String>,
    start_date: Value,
    end_date: Value,
}

pub fn encode_backup(backup: &Backup) -> Result<(Vec<u8>, Ref)> {
    let wire = BackupWire {
        root: backup.root,
        parent: backup.parent,
        stats: backup.stats.clone(),
        errors: backup.errors.clone(),
        start_date: Value::Timestamp(backup.start_date),
        end_date: Value::Timestamp(backup.end_date),
    };
    let mut buf = Vec::new();
    rmp_serde::encode::write(&mut buf, &wire).context("encoding backup")?;
    let r = Ref::hash(&buf);
    Ok((buf, r))
}

pub fn decode_backup(bytes: &[u8]) -> Result<Backup> {
    let wire: BackupWire = rmp_serde::decode::from_slice(bytes).context("decoding backup")?;
    let start_date = match wire.start_date {
        Value::Timestamp(t) => t,
        _ => bail!("backup start_date wasn't a timestamp"),
    };
    let end_date = match wire.end_date {
        Value::Timestamp(t) => t,
        _ => bail!("backup end_date wasn't a timestamp"),
    };
    Ok(Backup {
        root: wire.root,
        parent: wire.parent,
        stats: wire.stats,
        errors: wire.errors,
        start_date,
        end_date,
    })
}

/// Decode errors that are distinct from a plain "not found".
#[derive(Debug)]
pub struct DecodeFailure(pub String);

impl fmt::Display for DecodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "decode failure: {}", self.0)
    }
}
impl std::error::Error for DecodeFailure {}

pub fn read_all<R: Read>(mut r: R) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    r.read_to_end(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hash_identity() {
        let r = Ref::hash(b"hello");
        assert_eq!(r.to_hex(), "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
    }

    #[test]
    fn ref_round_trips_through_string() {
        let r = Ref::hash(b"hello");
        let parsed: Ref = r.to_hex().parse().unwrap();
        assert_eq!(r, parsed);
    }

    #[test]
    fn tree_canonical_form_is_order_independent() {
        let mut t1 = Tree::new();
        let mut item_a = TreeItem::new();
        item_a.insert("type".to_owned(), Value::String("blob".to_owned()));
        item_a.insert("ref".to_owned(), Value::String(Ref::hash(b"a").to_hex()));
        t1.insert("a".to_owned(), item_a.clone());

        let mut item_b = TreeItem::new();
        item_b.insert("type".to_owned(), Value::String("blob".to_owned()));
        item_b.insert("ref".to_owned(), Value::String(Ref::hash(b"b").to_hex()));
        t1.insert("b".to_owned(), item_b);

        // BTreeMap already iterates in sorted order regardless of insertion
        // order, so two trees built by inserting "b" then "a" hash the same.
        let mut t2 = Tree::new();
        t2.insert("b".to_owned(), t1["b"].clone());
        t2.insert("a".to_owned(), item_a);

        let (_, r1) = encode_tree(&t1).unwrap();
        let (_, r2) = encode_tree(&t2).unwrap();
        assert_eq!(r1, r2);
    }

    #[test]
    fn tree_round_trip() {
        let mut t = Tree::new();
        let mut item = TreeItem::new();
        item.insert("type".to_owned(), Value::String("blob".to_owned()));
        item.insert("mode".to_owned(), Value::Integer(0o644));
        t.insert("f".to_owned(), item);

        let (bytes, r) = encode_tree(&t).unwrap();
        let decoded = decode_tree(&bytes).unwrap();
        assert_eq!(decoded, t);
        let (bytes2, r2) = encode_tree(&decoded).unwrap();
        assert_eq!(bytes, bytes2);
        assert_eq!(r, r2);
    }

    #[test]
    fn backup_round_trip() {
        let backup = Backup {
            root: Ref::hash(b"root"),
            parent: Some(Ref::hash(b"parent")),
            stats: BTreeMap::from([("new-blob".to_owned(), 1)]),
            errors: BTreeMap::new(),
            start_date: "2020-01-01T00:00:00Z".parse().unwrap(),
            end_date: "2020-01-01T00:01:00Z".parse().unwrap(),
        };
        let (bytes, r) = encode_backup(&backup).unwrap();
        let decoded = decode_backup(&bytes).unwrap();
        assert_eq!(decoded, backup);
        let (bytes2, r2) = encode_backup(&decoded).unwrap();
        assert_eq!(bytes, bytes2);
        assert_eq!(r, r2);
    }

    #[test]
    fn legacy_timestamp_parses() {
        let t = parse_timestamp("20201030T06:30:25.034542").unwrap();
        assert_eq!(t.to_string(), "2020-10-30T06:30:25.034542Z");
    }
}
