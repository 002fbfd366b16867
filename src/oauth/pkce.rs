use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// The only PKCE challenge method this server accepts (RFC 7636 S256).
pub const CHALLENGE_METHOD_S256: &str = "S256";

/// Generate a PKCE code verifier (RFC 7636)
///
/// 32 bytes of cryptographically secure random data, base64url encoded with
/// no padding (43 characters, within the RFC's 43-128 range).
pub fn generate_verifier() -> String {
    let mut rng = rand::thread_rng();
    let mut verifier_bytes = [0u8; 32];
    rng.fill(&mut verifier_bytes);
    URL_SAFE_NO_PAD.encode(verifier_bytes)
}

/// Derive the S256 code challenge from a verifier: BASE64URL(SHA256(verifier)).
///
/// Pure and deterministic; the same verifier always yields the same challenge.
pub fn derive_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Generate an opaque flow-correlation token.
///
/// 32 random bytes, base64url encoded. Independent of any verifier; this is
/// the server-side storage key for an in-flight authorization request.
pub fn generate_state() -> String {
    let mut rng = rand::thread_rng();
    let state_bytes: [u8; 32] = rng.gen();
    URL_SAFE_NO_PAD.encode(state_bytes)
}

/// Check a code verifier against a stored challenge.
///
/// Recomputes the S256 challenge and compares in constant time so the
/// comparison leaks nothing about the stored value. Returns a boolean only;
/// callers must not surface the stored challenge on failure.
pub fn verify_challenge(verifier: &str, expected_challenge: &str) -> bool {
    let computed = derive_challenge(verifier);
    computed
        .as_bytes()
        .ct_eq(expected_challenge.as_bytes())
        .into()
}
