// Copyright 2017 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Digest;

///
/// An opaque content identifier: a handle to an immutable blob that is equal to another CID iff
/// the blobs they identify are byte-equal.
///
/// The CAS client is the only thing that constructs a Cid from a `Digest`; everywhere else, a Cid
/// should be treated as an opaque string, not decomposed back into hash bytes.
///
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cid(String);

impl Cid {
    ///
    /// The CID of a blob is the hex encoding of its SHA-256 digest. Two equal blobs always produce
    /// the same Cid, and SHA-256 collisions are treated as impossible (see the CAS client's cache).
    ///
    pub fn from_digest(digest: &Digest) -> Cid {
        Cid(digest.hash.to_hex())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({})", self.0)
    }
}

impl FromStr for Cid {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Cid(s.to_owned()))
    }
}

impl AsRef<str> for Cid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
