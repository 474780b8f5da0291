//! File digests and the canonical JSON record hashed by `Files` targets.

use std::path::Path;

use serde_json::{Map, Value};
use sha2::{Digest, Sha224};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::error::{FabError, Result};

const CHUNK_SIZE: usize = 64 * 1024;

pub fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha224::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// The hex SHA-224 digest of a file's contents, or the empty string if the
/// file does not exist (spec §4.5). Reads in fixed-size chunks so a
/// cancellation can be observed at the next chunk boundary rather than
/// only after the whole file is read.
#[tracing::instrument(level = "debug", skip(cancel))]
pub async fn file_digest(path: &Path, cancel: &CancellationToken) -> Result<String> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
        Err(err) => return Err(FabError::io(path, "open", err)),
    };

    let mut hasher = Sha224::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        if cancel.is_cancelled() {
            return Err(FabError::Cancelled);
        }
        let n = file
            .read(&mut buf)
            .await
            .map_err(|err| FabError::io(path, "read", err))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Builds the canonical JSON bytes hashed as a `Files` target's content key:
/// `{"in": [path, digest, ...], "out": [path, digest, ...], "target": <sub>,
/// "target_type": "<tag>"}`, with `in`/`out` sorted by path beforehand
/// (property: hash is independent of registration or filesystem order) and
/// object keys in `serde_json`'s default (sorted, `BTreeMap`-backed) order,
/// so the same inputs always produce the same bytes.
pub fn canonical_record(
    target: Value,
    target_type: &str,
    ins: &[(String, String)],
    outs: &[(String, String)],
) -> Vec<u8> {
    let mut map = Map::new();
    map.insert("in".to_string(), flatten(ins));
    map.insert("out".to_string(), flatten(outs));
    map.insert("target".to_string(), target);
    map.insert("target_type".to_string(), Value::String(target_type.to_string()));
    serde_json::to_vec(&Value::Object(map)).expect("canonical record is always serializable")
}

fn flatten(pairs: &[(String, String)]) -> Value {
    let mut sorted = pairs.to_vec();
    sorted.sort();
    let mut flat = Vec::with_capacity(sorted.len() * 2);
    for (path, digest) in sorted {
        flat.push(Value::String(path));
        flat.push(Value::String(digest));
    }
    Value::Array(flat)
}
