//! Client half of the SRP-6a handshake as the user pool service profiles it.
//!
//! One [`SrpEngine`] covers a single handshake: the user flow (realm is the
//! pool-id suffix, identifier is the SRP user id) and the device flow (realm
//! is the device group key, identifier is the device key) differ only in the
//! strings mixed into the identity hash.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use digest::{Digest, Output};
use hmac::{Hmac, Mac};
use log::info;
use num_bigint::BigUint;
use rand::rngs::ThreadRng;
use rand::RngCore;
use sha2::Sha256;
use std::marker::PhantomData;

use crate::constant::{DERIVED_KEY_SIZE, N};
use crate::error::SrpError;

pub(crate) mod helper;
pub(crate) mod proof;

pub(crate) type HmacSha256 = Hmac<Sha256>;

/// The salt, verifier and password generated for a device confirmation.
///
/// The verifier and salt travel to the server; the password never leaves the
/// client and is what the device authenticates with on later logins.
#[derive(Debug, Eq, PartialEq)]
pub struct PasswordVerifierParameters {
    /// Base64 of the padded verifier `g^x mod N`.
    pub verifier: String,

    /// Base64 of the padded salt the verifier was derived with.
    pub salt: String,

    /// Base64 of the 40 random bytes acting as the device password.
    pub password: String,
}

/// Per-handshake SRP state: the private scalar `a`, its public counterpart
/// `A = g^a mod N`, and the realm the identity hash is bound to.
///
/// Single-use. Drop the engine once the handshake it belongs to completes or
/// fails; a fresh handshake needs a fresh blinding scalar.
#[derive(Debug)]
pub struct SrpEngine<R: RngCore + Default = ThreadRng> {
    realm: String,
    a: BigUint,
    a_pub: BigUint,
    // The generator is instantiated per draw; a fn-pointer marker keeps the
    // engine Send + Sync even for thread-local generators.
    _rng: PhantomData<fn() -> R>,
}

impl<R: RngCore + Default> SrpEngine<R> {
    /// Create an engine for one handshake in the given realm.
    ///
    /// The blinding scalar is drawn eagerly so `SRP_A` is available before
    /// the first request goes out. A public value that reduces to zero is
    /// rejected by redrawing the scalar.
    pub fn new(realm: &str, paranoia: u8) -> Result<Self, SrpError> {
        let (a, a_pub) = Self::generate_key_pair(paranoia)?;

        Ok(Self {
            realm: realm.to_string(),
            a,
            a_pub,
            _rng: PhantomData,
        })
    }

    fn generate_key_pair(paranoia: u8) -> Result<(BigUint, BigUint), SrpError> {
        // With g = 2 and 1 <= a < N the public value cannot reduce to zero,
        // but the invariant is cheap to uphold against a broken generator.
        for _ in 0..3 {
            let a = helper::random_in_range::<R>(&N, paranoia)?;
            let a_pub = crate::constant::G.modpow(&a, &N);
            if a_pub.bits() != 0 {
                return Ok((a, a_pub));
            }
        }
        Err(SrpError::ZeroScalar("A"))
    }

    /// The public `A` value for this handshake. Memoised; every call returns
    /// the same scalar.
    pub fn large_a_value(&self) -> &BigUint {
        &self.a_pub
    }

    /// Hex form of `A` as the `SRP_A` parameter expects it.
    pub fn large_a_hex(&self) -> String {
        hex::encode(self.a_pub.to_bytes_be())
    }

    /// The realm identifier this engine mixes into the identity hash.
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Derive the 16-byte signing key from the server's `SRP_B` and `SALT`
    /// challenge parameters.
    ///
    /// The identity pair is `(identifier, password)`: the SRP user id and the
    /// user password in the user flow, the device key and the random device
    /// password in the device flow.
    pub fn password_authentication_key(
        &self,
        identifier: &str,
        password: &str,
        server_b: &str,
        salt: &str,
    ) -> Result<Vec<u8>, SrpError> {
        let b_pub = helper::parse_hex("SRP_B", server_b)?;
        if (&b_pub % &*N).bits() == 0 {
            return Err(SrpError::ZeroScalar("B"));
        }
        let salt = helper::parse_hex("salt", salt)?;

        let u = helper::compute_u::<Sha256>(&self.a_pub, &b_pub)?;
        let identity = self.compute_identity::<Sha256>(identifier, password);
        let x = helper::compute_x::<Sha256>(identity.as_slice(), &salt);
        let k = helper::compute_k::<Sha256>();

        let s = helper::compute_s(&self.a, &u, &x, &k, &b_pub);

        // HKDF-SHA256: extract with the padded scrambler as salt, expand one
        // block with the fixed info string, truncate to the key size.
        let mut hkdf = HmacSha256::new_from_slice(&helper::left_pad(&u.to_bytes_be(), 0))?;
        hkdf.update(&helper::left_pad(&s.to_bytes_be(), 0));
        let prk = hkdf.finalize().into_bytes();

        hkdf = HmacSha256::new_from_slice(&prk)?;
        hkdf.update(&helper::generate_key_derive_data());

        Ok(hkdf.finalize().into_bytes()[..DERIVED_KEY_SIZE].to_vec())
    }

    /// Generate the salt, verifier and random password for a new device.
    ///
    /// The verifier is an independent SRP credential the client manufactures
    /// itself: the server only ever learns `g^x mod N`, never the password.
    pub fn generate_hash_device(
        device_group_key: &str,
        device_key: &str,
    ) -> Result<PasswordVerifierParameters, SrpError> {
        let password = Self::generate_device_password()?;
        let salt = Self::generate_device_salt()?;

        let mut hasher = Sha256::new();
        hasher.update(device_group_key.as_bytes());
        hasher.update(device_key.as_bytes());
        hasher.update(b":");
        hasher.update(password.as_bytes());
        let device_hash = hasher.finalize();

        let x = helper::compute_x::<Sha256>(device_hash.as_slice(), &salt);
        let verifier = crate::constant::G.modpow(&x, &N);

        info!(device_key = device_key; "Generated verifier and random password for device");

        Ok(PasswordVerifierParameters {
            verifier: BASE64.encode(helper::left_pad(&verifier.to_bytes_be(), 0)),
            salt: BASE64.encode(helper::left_pad(&salt.to_bytes_be(), 0)),
            password,
        })
    }

    fn generate_device_password() -> Result<String, SrpError> {
        let mut bytes = [0u8; 40];
        R::default()
            .try_fill_bytes(&mut bytes)
            .map_err(|err| SrpError::Rng(err.to_string()))?;
        Ok(BASE64.encode(bytes))
    }

    fn generate_device_salt() -> Result<BigUint, SrpError> {
        let mut bytes = [0u8; 16];
        R::default()
            .try_fill_bytes(&mut bytes)
            .map_err(|err| SrpError::Rng(err.to_string()))?;
        Ok(BigUint::from_bytes_be(&bytes))
    }

    /// Compute the identity (`I`) digest: `H(realm || identifier || ":" ||
    /// password)`.
    fn compute_identity<D: Digest>(&self, identifier: &str, password: &str) -> Output<D> {
        let mut d = D::new();
        d.update(self.realm.as_bytes());
        d.update(identifier.as_bytes());
        d.update(b":");
        d.update(password.as_bytes());
        d.finalize()
    }
}
