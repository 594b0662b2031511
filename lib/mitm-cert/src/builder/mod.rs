/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use anyhow::anyhow;
use chrono::{TimeDelta, Utc};
use openssl::asn1::Asn1Time;
use std::time::Duration;

mod pkey;
pub use pkey::new_rsa;

mod serial;
pub use serial::random_20;

mod subject;
pub use subject::SubjectNameBuilder;

mod root;
pub use root::RootCertBuilder;

mod leaf;
pub use leaf::LeafCertBuilder;

/// The validity window of a fresh root authority when none is given.
pub const DEFAULT_ROOT_VALIDITY: Duration = Duration::from_secs(365 * 24 * 3600);

fn validity_bounds(validity: Duration) -> anyhow::Result<(Asn1Time, Asn1Time)> {
    let delta = TimeDelta::from_std(validity)
        .map_err(|e| anyhow!("validity window out of range: {e}"))?;
    let time_now = Utc::now();
    let not_before = asn1_time_from_unix((time_now - delta).timestamp())?;
    let not_after = asn1_time_from_unix((time_now + delta).timestamp())?;
    Ok((not_before, not_after))
}

fn asn1_time_from_unix(secs: i64) -> anyhow::Result<Asn1Time> {
    Asn1Time::from_unix(secs).map_err(|e| anyhow!("failed to get asn1 time: {e}"))
}
