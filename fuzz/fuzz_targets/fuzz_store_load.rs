#![no_main]

use libfuzzer_sys::fuzz_target;
use shamir_unseal::{FileStore, KvStore};
use tempfile::tempdir;

// Writes arbitrary bytes as the store file and opens it. Opening must either fail with an
// error or yield a store that can be read and written again.
fuzz_target!(|data: &[u8]| {
    let Ok(temp_dir) = tempdir() else {
        return;
    };
    let path = temp_dir.path().join("store.db");
    if std::fs::write(&path, data).is_err() {
        return;
    }

    let Ok(store) = FileStore::open(&path) else {
        return;
    };
    let _ = store.view(|tx| Ok(tx.bucket_names().count()));
    let _ = store.update(|tx| {
        tx.create_bucket_if_missing("global");
        tx.put("global", b"unseal.init", data)
    });
    let _ = FileStore::open(&path);
});
