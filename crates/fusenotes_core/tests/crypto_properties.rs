use fusenotes_core::{
    check_key_valid, generate_private_key, AesNoteCipher, EcdsaSigner, NoteCipher, Signature,
    SignerVerifier,
};
use once_cell::sync::Lazy;
use proptest::prelude::*;

static KEY: Lazy<String> = Lazy::new(generate_private_key);
static SIGNER: Lazy<EcdsaSigner> =
    Lazy::new(|| EcdsaSigner::from_private_key_str(&KEY).unwrap());
static CIPHER: Lazy<AesNoteCipher> = Lazy::new(|| AesNoteCipher::from_key_string(&KEY));

proptest! {
    #[test]
    fn decrypt_inverts_encrypt(plaintext in ".*") {
        let sealed = CIPHER.encrypt(&plaintext).unwrap();
        prop_assert_eq!(CIPHER.decrypt(&sealed).unwrap(), plaintext);
    }

    #[test]
    fn signatures_verify_and_any_flip_breaks_them(
        message in proptest::collection::vec(any::<u8>(), 1..256),
        index in any::<prop::sample::Index>(),
        mask in 1u8..=255,
    ) {
        let public_key = SIGNER.public_key_bytes();
        let signature = SIGNER.sign(&message).unwrap();
        prop_assert!(SIGNER.verify(&public_key, &message, &signature));

        let mut flipped_message = message.clone();
        let at = index.index(flipped_message.len());
        flipped_message[at] ^= mask;
        prop_assert!(!SIGNER.verify(&public_key, &flipped_message, &signature));

        let mut flipped_signature = signature.as_bytes().to_vec();
        let at = index.index(flipped_signature.len());
        flipped_signature[at] ^= mask;
        prop_assert!(!SIGNER.verify(
            &public_key,
            &message,
            &Signature::from_bytes(flipped_signature)
        ));
    }
}

#[test]
fn empty_ciphertext_decrypts_to_empty() {
    assert_eq!(CIPHER.decrypt("").unwrap(), "");
    assert_eq!(CIPHER.decrypt_body(None).unwrap(), "");
}

#[test]
fn generated_keys_validate_and_garbage_does_not() {
    assert!(check_key_valid(&KEY));
    assert!(!check_key_valid(""));
    assert!(!check_key_valid("not a key"));
    assert!(!check_key_valid("AAAA"));
}
