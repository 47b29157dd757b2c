//! Hash-secret initialization
//!
//! Produces the process-wide secret used to salt string hashing, so that
//! hash-flooding attacks against dict-like containers can't rely on a fixed
//! hash function. Grounded in `Python/random.c`: same source precedence,
//! same OS-entropy fallback chain, same `HASHSEED=0` disable behavior.

use crate::error::RuntimeError;
use std::fs::File;
use std::io::Read as _;
use std::sync::OnceLock;

/// Size of the hash secret, in bytes. CPython uses a `_Py_HashSecret_t`
/// union sized for its internal hash algorithms; 24 bytes covers the widest
/// member (siphash's two 64-bit keys plus a djbx33a suffix) without needing
/// the union itself.
pub const HASH_SECRET_LEN: usize = 24;

static HASH_SECRET: OnceLock<[u8; HASH_SECRET_LEN]> = OnceLock::new();

/// Where the seed value came from — surfaced for diagnostics/logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedSource {
    /// `HASHSEED=0`: hashing is deterministic, secret is all zero bytes.
    Disabled,
    /// `HASHSEED=<integer>`: secret expanded from the integer via an LCG.
    FixedSeed,
    /// `HASHSEED=random`, unset, or any other value: OS entropy.
    OsEntropy,
}

/// Initialize the process-wide hash secret from the `HASHSEED` environment
/// variable, following CPython's precedence:
/// 1. `HASHSEED` parses as an integer in `[0, 2^32)` → LCG-expand it.
/// 2. `HASHSEED` is unset or equals `"random"` → OS entropy.
/// 3. Any other value is a configuration error.
///
/// Idempotent: the first call wins, matching `OnceLock` semantics and the
/// "frozen after `core_initialized`" contract on [`crate::preconfig`].
pub fn init_hash_secret(hashseed_env: Option<&str>) -> Result<SeedSource, RuntimeError> {
    let (secret, source) = match hashseed_env {
        None => (os_entropy_secret()?, SeedSource::OsEntropy),
        Some(s) if s == "random" => (os_entropy_secret()?, SeedSource::OsEntropy),
        Some(s) => {
            let seed: u64 = s.parse().map_err(|_| {
                RuntimeError::user(format!("HASHSEED must be 'random' or an integer, got {s:?}"))
            })?;
            if seed > u64::from(u32::MAX) {
                return Err(RuntimeError::user(
                    "HASHSEED must fit in an unsigned 32-bit integer",
                ));
            }
            if seed == 0 {
                ([0u8; HASH_SECRET_LEN], SeedSource::Disabled)
            } else {
                (lcg_expand(seed as u32), SeedSource::FixedSeed)
            }
        }
    };
    let _ = HASH_SECRET.set(secret);
    Ok(source)
}

/// Return the current hash secret, initializing it from OS entropy with
/// default precedence if nothing has set it yet (mirrors CPython lazily
/// calling `_Py_HashRandomization_Init` the first time it's needed).
pub fn hash_secret() -> [u8; HASH_SECRET_LEN] {
    *HASH_SECRET.get_or_init(|| os_entropy_secret().unwrap_or([0u8; HASH_SECRET_LEN]))
}

/// Expand a 32-bit seed into a full-width secret using a linear congruential
/// generator, matching the byte-by-byte expansion CPython performs for
/// `PYTHONHASHSEED=<int>` so that a fixed seed is reproducible across runs.
fn lcg_expand(seed: u32) -> [u8; HASH_SECRET_LEN] {
    // Numerical Recipes LCG constants, same family CPython's
    // `lcg_urandom` uses.
    const MULTIPLIER: u32 = 214_013;
    const INCREMENT: u32 = 2_531_011;

    let mut out = [0u8; HASH_SECRET_LEN];
    let mut x = seed;
    for byte in out.iter_mut() {
        x = x.wrapping_mul(MULTIPLIER).wrapping_add(INCREMENT);
        *byte = ((x >> 16) & 0xff) as u8;
    }
    out
}

/// Fill a secret from OS entropy, preferring `getrandom(2)` (non-blocking),
/// then `/dev/urandom`, then `getentropy(2)`.
fn os_entropy_secret() -> Result<[u8; HASH_SECRET_LEN], RuntimeError> {
    let mut buf = [0u8; HASH_SECRET_LEN];
    if getrandom_fill(&mut buf).is_ok() {
        return Ok(buf);
    }
    if urandom_fill(&mut buf).is_ok() {
        return Ok(buf);
    }
    getentropy_fill(&mut buf)?;
    Ok(buf)
}

/// Try `getrandom(2)` in non-blocking mode. Returns an error (rather than
/// blocking) if the kernel entropy pool isn't ready yet, so the caller can
/// fall back to `/dev/urandom`.
fn getrandom_fill(buf: &mut [u8]) -> Result<(), RuntimeError> {
    #[cfg(target_os = "linux")]
    {
        let mut filled = 0usize;
        while filled < buf.len() {
            let rc = unsafe {
                libc::syscall(
                    libc::SYS_getrandom,
                    buf[filled..].as_mut_ptr(),
                    buf.len() - filled,
                    libc::GRND_NONBLOCK,
                )
            };
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                return Err(RuntimeError::os(format!("getrandom failed: {err}")));
            }
            filled += rc as usize;
        }
        Ok(())
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = buf;
        Err(RuntimeError::os("getrandom unavailable on this platform"))
    }
}

fn urandom_fill(buf: &mut [u8]) -> Result<(), RuntimeError> {
    let mut f = File::open("/dev/urandom")
        .map_err(|e| RuntimeError::os(format!("failed to open /dev/urandom: {e}")))?;
    f.read_exact(buf)
        .map_err(|e| RuntimeError::os(format!("failed to read /dev/urandom: {e}")))
}

fn getentropy_fill(buf: &mut [u8]) -> Result<(), RuntimeError> {
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    {
        // getentropy() caps a single call at 256 bytes; our secret is well
        // under that, so one call suffices.
        let rc = unsafe { libc::getentropy(buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if rc != 0 {
            return Err(RuntimeError::os(format!(
                "getentropy failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        let _ = buf;
        Err(RuntimeError::os("getentropy unavailable on this platform"))
    }
}
