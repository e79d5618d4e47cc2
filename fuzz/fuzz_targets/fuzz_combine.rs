#![no_main]

use libfuzzer_sys::fuzz_target;
use shamir_unseal::{Share, ShamirEngine, secret::decode_secret};

// Splits the input into length-prefixed blobs and combines them as raw shares.
// Combination must return Ok or Err for any blob set, including empty magnitudes,
// repeated or zero indices and the sign bit.
fuzz_target!(|data: &[u8]| {
    let mut blobs = Vec::new();
    let mut rest = data;
    while let Some((&len, tail)) = rest.split_first() {
        let len = (len as usize).min(tail.len()).min(80);
        let (blob, tail) = tail.split_at(len);
        blobs.push(blob.to_vec());
        rest = tail;
        if blobs.len() == 16 {
            break;
        }
    }

    let _ = ShamirEngine::combine_bytes(&blobs);

    let shares: Vec<Share> = blobs
        .iter()
        .filter_map(|b| Share::from_bytes(b).ok())
        .collect();
    let _ = ShamirEngine::combine(&shares);
    for share in &shares {
        let _ = decode_secret(&share.value());
    }

    if let Ok(text) = std::str::from_utf8(data) {
        let _ = ShamirEngine::combine_strings(&text.split(',').collect::<Vec<_>>());
    }
});
