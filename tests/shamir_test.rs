use proptest::prelude::*;

use shamir_unseal::secret::{SECRET_VERSION, decode_secret, encode_secret};
use shamir_unseal::{MASTER_KEY_LEN, ShamirEngine, Share, UnsealError};

/// (threshold, total, shuffled subset of `threshold` share positions)
fn parameters() -> impl Strategy<Value = (u8, u8, Vec<usize>)> {
    (2u8..=6)
        .prop_flat_map(|k| (Just(k), k..=10u8))
        .prop_flat_map(|(k, n)| {
            let positions: Vec<usize> = (0..n as usize).collect();
            (
                Just(k),
                Just(n),
                prop::sample::subsequence(positions, k as usize).prop_shuffle(),
            )
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn any_threshold_subset_recovers_secret(
        secret in prop::collection::vec(any::<u8>(), 1..=32),
        (k, n, subset) in parameters(),
    ) {
        let mut engine = ShamirEngine::new().unwrap();
        let shares = engine.split(&secret, k, n).unwrap();
        prop_assert_eq!(shares.len(), n as usize);

        let chosen: Vec<Share> = subset.iter().map(|&i| shares[i].clone()).collect();
        prop_assert_eq!(ShamirEngine::combine(&chosen).unwrap(), secret);
    }

    #[test]
    fn fewer_than_threshold_never_recovers(
        secret in prop::collection::vec(any::<u8>(), 1..=32),
        (k, n, subset) in parameters().prop_filter("k >= 3", |(k, _, _)| *k >= 3),
    ) {
        let mut engine = ShamirEngine::new().unwrap();
        let shares = engine.split(&secret, k, n).unwrap();

        let chosen: Vec<Share> = subset[1..].iter().map(|&i| shares[i].clone()).collect();
        match ShamirEngine::combine(&chosen) {
            Ok(key) => prop_assert_ne!(key, secret),
            Err(e) => prop_assert!(matches!(e, UnsealError::MalformedSecret(_))),
        }
    }

    #[test]
    fn share_text_survives_transport(
        secret in prop::collection::vec(any::<u8>(), 1..=32),
    ) {
        let mut engine = ShamirEngine::new().unwrap();
        let texts = engine.split_to_strings(&secret, 2, 3).unwrap();

        for text in &texts {
            let share = Share::from_base64(text).unwrap();
            prop_assert_eq!(&share.to_base64(), text);
        }
        let padded: Vec<String> = texts.iter().map(|t| format!("  {t}\n")).collect();
        prop_assert_eq!(ShamirEngine::combine_strings(&padded[1..]).unwrap(), secret);
    }

    #[test]
    fn share_blob_is_reproduced_byte_for_byte(
        blob in prop::collection::vec(any::<u8>(), 3..80),
    ) {
        let share = Share::from_bytes(&blob).unwrap();
        prop_assert_eq!(share.to_bytes(), blob);
    }

    #[test]
    fn secret_encoding_recovers_every_key(
        secret in prop::collection::vec(any::<u8>(), 1..=32),
    ) {
        let encoded = encode_secret(&secret, SECRET_VERSION).unwrap();
        let decoded = decode_secret(&encoded).unwrap();
        prop_assert_eq!(decoded.key, secret);
        prop_assert_eq!(decoded.version, SECRET_VERSION);
    }
}

#[test]
fn test_small_key_three_of_five() {
    let secret = [5u8, 6, 7, 8];
    let mut engine = ShamirEngine::new().unwrap();
    let texts = engine.split_to_strings(&secret, 3, 5).unwrap();
    assert_eq!(texts.len(), 5);

    let subsets: [[usize; 3]; 4] = [[0, 1, 2], [4, 0, 2], [3, 4, 1], [2, 3, 4]];
    for subset in subsets {
        let chosen: Vec<&str> = subset.iter().map(|&i| texts[i].as_str()).collect();
        assert_eq!(ShamirEngine::combine_strings(&chosen).unwrap(), secret);
    }

    let all: Vec<&str> = texts.iter().map(String::as_str).collect();
    assert_eq!(ShamirEngine::combine_strings(&all).unwrap(), secret);
}

#[test]
fn test_generated_master_key_is_consistent() {
    let texts = ShamirEngine::generate_master_shares(5, 3).unwrap();
    assert_eq!(texts.len(), 5);

    let first = ShamirEngine::combine_strings(&texts[0..3]).unwrap();
    let second = ShamirEngine::combine_strings(&texts[2..5]).unwrap();
    assert_eq!(first.len(), MASTER_KEY_LEN);
    assert_eq!(first, second);

    // two generations never share a key
    let other = ShamirEngine::generate_master_shares(5, 3).unwrap();
    assert_ne!(ShamirEngine::combine_strings(&other[0..3]).unwrap(), first);
}

#[test]
fn test_generate_master_shares_validates() {
    assert!(matches!(
        ShamirEngine::generate_master_shares(2, 3),
        Err(UnsealError::InvalidShareCount { .. })
    ));
    assert!(matches!(
        ShamirEngine::generate_master_shares(5, 1),
        Err(UnsealError::InvalidThreshold(1))
    ));
}

#[test]
fn test_malformed_share_text() {
    let mut engine = ShamirEngine::new().unwrap();
    let texts = engine.split_to_strings(&[1u8; 16], 2, 3).unwrap();

    let not_base64 = [texts[0].as_str(), "not base64!"];
    assert!(matches!(
        ShamirEngine::combine_strings(&not_base64),
        Err(UnsealError::MalformedShare(_))
    ));

    // "AQI=" decodes to two bytes, one short of a share
    let too_short = [texts[0].as_str(), "AQI="];
    assert!(matches!(
        ShamirEngine::combine_strings(&too_short),
        Err(UnsealError::MalformedShare(_))
    ));
}

#[test]
fn test_mixed_polynomials_do_not_recover() {
    let mut engine = ShamirEngine::new().unwrap();
    let a = engine.split(&[0x11u8; 32], 2, 3).unwrap();
    let b = engine.split(&[0x22u8; 32], 2, 3).unwrap();

    let mixed = vec![a[0].clone(), b[1].clone()];
    match ShamirEngine::combine(&mixed) {
        Ok(key) => {
            assert_ne!(key, vec![0x11u8; 32]);
            assert_ne!(key, vec![0x22u8; 32]);
        }
        Err(e) => assert!(matches!(e, UnsealError::MalformedSecret(_))),
    }
}
