//! Shamir secret sharing over GF(2^8).
//!
//! Every byte of the secret gets its own random polynomial of degree `threshold - 1` whose
//! constant term is the byte. Share `x` holds the evaluations of all polynomials at `x`, and any
//! `threshold` shares recover the constant terms by Lagrange interpolation at zero.

use rand::RngCore;

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Share {
    /// The evaluation point. Never zero, since the secret sits at zero.
    pub x: u8,
    pub y: Vec<u8>,
}

/// Multiplication modulo the AES polynomial x^8 + x^4 + x^3 + x + 1.
fn mul(mut a: u8, mut b: u8) -> u8 {
    let mut product = 0;
    while b != 0 {
        if b & 1 != 0 {
            product ^= a;
        }
        let carry = a & 0x80;
        a <<= 1;
        if carry != 0 {
            a ^= 0x1B;
        }
        b >>= 1;
    }
    product
}

/// Multiplicative inverse, computed as `a^254`. `a` must not be zero.
fn inv(a: u8) -> u8 {
    let mut result = 1;
    let mut base = a;
    let mut exp = 254u8;
    while exp > 0 {
        if exp & 1 != 0 {
            result = mul(result, base);
        }
        base = mul(base, base);
        exp >>= 1;
    }
    result
}

/// Evaluates the polynomial with `coefficients`, constant term first, at `x`.
fn evaluate(coefficients: &[u8], x: u8) -> u8 {
    coefficients
        .iter()
        .rev()
        .fold(0, |acc, &coefficient| mul(acc, x) ^ coefficient)
}

/// Splits `secret` into `shares` shares, any `threshold` of which reconstruct it.
pub fn split<R: RngCore + ?Sized>(
    secret: &[u8],
    shares: u8,
    threshold: u8,
    rng: &mut R,
) -> Result<Vec<Share>> {
    if threshold == 0 || threshold > shares {
        return Err(Error::InvalidParameters(format!(
            "threshold {} must be in [1, {}]",
            threshold, shares
        )));
    }

    let mut ret: Vec<Share> = (1..=shares)
        .map(|x| Share {
            x,
            y: Vec::with_capacity(secret.len()),
        })
        .collect();
    let mut coefficients = vec![0u8; threshold as usize];
    for &byte in secret {
        coefficients[0] = byte;
        rng.fill_bytes(&mut coefficients[1..]);
        for share in &mut ret {
            share.y.push(evaluate(&coefficients, share.x));
        }
    }
    Ok(ret)
}

/// Reconstructs the secret from `shares`. The result is only the original secret if at least
/// `threshold` distinct shares of it are given.
pub fn combine(shares: &[Share]) -> Result<Vec<u8>> {
    let len = match shares.first() {
        Some(share) => share.y.len(),
        None => return Err(Error::InvalidParameters("no shares to combine".to_string())),
    };
    for (i, share) in shares.iter().enumerate() {
        if share.x == 0 || share.y.len() != len {
            return Err(Error::InvalidParameters(format!("malformed share {}", share.x)));
        }
        if shares[..i].iter().any(|other| other.x == share.x) {
            return Err(Error::InvalidParameters(format!("duplicate share {}", share.x)));
        }
    }

    // Lagrange basis polynomials evaluated at zero; subtraction is XOR in GF(2^8).
    let basis: Vec<u8> = shares
        .iter()
        .map(|share| {
            shares
                .iter()
                .filter(|other| other.x != share.x)
                .fold(1, |acc, other| {
                    mul(acc, mul(other.x, inv(other.x ^ share.x)))
                })
        })
        .collect();

    Ok((0..len)
        .map(|i| {
            shares
                .iter()
                .zip(&basis)
                .fold(0, |acc, (share, &l)| acc ^ mul(share.y[i], l))
        })
        .collect())
}
