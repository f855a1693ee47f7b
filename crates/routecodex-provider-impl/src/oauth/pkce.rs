use base64::Engine;
use rand::RngCore;
use sha2::Digest;

pub fn generate_state() -> String {
    random_urlsafe_32()
}

pub fn generate_code_verifier() -> String {
    random_urlsafe_32()
}

pub fn generate_code_challenge(verifier: &str) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(verifier.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

fn random_urlsafe_32() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_is_s256_of_verifier() {
        // RFC 7636 appendix B vector.
        let challenge = generate_code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn verifier_and_state_are_unique() {
        assert_ne!(generate_code_verifier(), generate_code_verifier());
        assert_ne!(generate_state(), generate_state());
    }
}
