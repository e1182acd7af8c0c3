//! Big-integer and hashing helpers shared by the user and device SRP flows.

use chrono::{DateTime, Utc};
use digest::Digest;
use num_bigint::BigUint;
use rand::RngCore;

use crate::constant::{DERIVE_KEY_INFO, G, N};
use crate::error::SrpError;

/// Extra entropy bytes drawn per paranoia level when blinding an SRP scalar.
const PARANOIA_STRIDE: usize = 16;

/// The server reads protocol values as signed big-endian integers; a leading
/// byte with the high bit set needs an explicit pad byte so the value stays
/// non-negative.
pub(crate) fn left_pad(bytes: &[u8], pad: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 1);
    if bytes.first().is_some_and(|first| first & 0x80 != 0) {
        out.push(pad);
    }
    out.extend_from_slice(bytes);
    out
}

/// Hex strings on the wire may arrive with an odd number of digits; pad so
/// they decode to whole bytes.
pub(crate) fn left_pad_to_even_length(value: &str, pad: char) -> String {
    if value.len() % 2 == 0 {
        value.to_string()
    } else {
        format!("{pad}{value}")
    }
}

/// Parse a hex-encoded big integer as the service transmits it.
pub(crate) fn parse_hex(name: &str, value: &str) -> Result<BigUint, SrpError> {
    BigUint::parse_bytes(left_pad_to_even_length(value, '0').as_bytes(), 16)
        .ok_or_else(|| SrpError::InvalidArgument(format!("Invalid {name}. Expected hex")))
}

/// Draw a uniformly distributed scalar in `[1, modulus)`.
///
/// Paranoia widens the entropy pool the scalar is reduced from; the range
/// itself does not change.
pub(crate) fn random_in_range<R: RngCore + Default>(
    modulus: &BigUint,
    paranoia: u8,
) -> Result<BigUint, SrpError> {
    let width = (modulus.bits() as usize + 7) / 8;
    let mut buf = vec![0u8; width + PARANOIA_STRIDE * usize::from(paranoia)];
    R::default()
        .try_fill_bytes(&mut buf)
        .map_err(|err| SrpError::Rng(err.to_string()))?;

    let one = BigUint::from(1u8);
    Ok(BigUint::from_bytes_be(&buf) % (modulus - &one) + one)
}

/// `(a - b) mod modulus`, staying in `[0, modulus)`.
pub(crate) fn mod_sub(a: &BigUint, b: &BigUint, modulus: &BigUint) -> BigUint {
    let a = a % modulus;
    let b = b % modulus;
    if a >= b {
        a - b
    } else {
        modulus - b + a
    }
}

/// Compute the SRP multiplier `k = H(pad(N) || pad(g))`.
pub(crate) fn compute_k<D: Digest>() -> BigUint {
    let mut d = D::new();
    d.update(left_pad(&N.to_bytes_be(), 0));
    d.update(left_pad(&G.to_bytes_be(), 0));
    BigUint::from_bytes_be(&d.finalize())
}

/// Compute the scrambling parameter `u = H(pad(A) || pad(B))`.
pub(crate) fn compute_u<D: Digest>(a_pub: &BigUint, b_pub: &BigUint) -> Result<BigUint, SrpError> {
    let mut d = D::new();
    d.update(left_pad(&a_pub.to_bytes_be(), 0));
    d.update(left_pad(&b_pub.to_bytes_be(), 0));

    let u = BigUint::from_bytes_be(&d.finalize());
    if u.bits() == 0 {
        return Err(SrpError::ZeroScalar("u"));
    }
    Ok(u)
}

/// Compute the private key `x = H(pad(salt) || identity)` where `identity`
/// is the digest of the realm/identifier/password triple.
pub(crate) fn compute_x<D: Digest>(identity: &[u8], salt: &BigUint) -> BigUint {
    let mut d = D::new();
    d.update(left_pad(&salt.to_bytes_be(), 0));
    d.update(identity);
    BigUint::from_bytes_be(&d.finalize())
}

/// Compute the shared secret `S = (B - k·g^x)^(a + u·x) mod N`.
pub(crate) fn compute_s(
    a: &BigUint,
    u: &BigUint,
    x: &BigUint,
    k: &BigUint,
    b_pub: &BigUint,
) -> BigUint {
    let g_pow_x = G.modpow(x, &N);
    let base = mod_sub(b_pub, &(k * g_pow_x), &N);
    base.modpow(&(a + u * x), &N)
}

/// Info block for the HKDF expansion step: the literal info string followed
/// by the block counter.
pub(crate) fn generate_key_derive_data() -> Vec<u8> {
    let mut data = Vec::with_capacity(DERIVE_KEY_INFO.len() + 1);
    data.extend_from_slice(DERIVE_KEY_INFO);
    data.push(1);
    data
}

/// Wire-format timestamp covered by the password claim signature. English
/// names, UTC, day of month not zero-padded (`Tue Apr 9 07:04:32 UTC 2024`).
pub(crate) fn format_timestamp(now: DateTime<Utc>) -> String {
    now.format("%a %b %-d %H:%M:%S UTC %Y").to_string()
}
