use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, UNIX_EPOCH};

use chrono::{DateTime, Utc};

pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
}

/// Writes `contents` to `path` and pins its mtime to `secs` since the epoch.
pub fn write_at(path: &Path, contents: &[u8], secs: u64) {
    let mut file = File::create(path).expect("create file");
    file.write_all(contents).expect("write file");
    file.set_modified(UNIX_EPOCH + Duration::from_secs(secs))
        .expect("set mtime");
}
