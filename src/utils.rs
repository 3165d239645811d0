//! Identifier helpers for sanctions and registrations

use bech32::Bech32m;
use uuid7::uuid7;

use crate::types::SanctionKind;

pub const REGISTRATION_HRP: &str = "reg_";

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Mint a fresh id for a sanction of the given kind, e.g. `embargo_1...`
pub fn new_sanction_id(kind: SanctionKind) -> anyhow::Result<String> {
    new_uuid_to_bech32(kind.id_prefix())
}

pub fn new_registration_id() -> anyhow::Result<String> {
    new_uuid_to_bech32(REGISTRATION_HRP)
}

